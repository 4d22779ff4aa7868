use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use anyhow::{anyhow, Error};

pub type Result<T, E = Failure> = std::result::Result<T, E>;

/// Shared failure; a failure re-raised from `throw` is the one thrown.
#[derive(Clone)]
pub struct Failure(Arc<Error>);

impl Failure {
    pub fn new(error: Error) -> Self {
        Self(Arc::new(error))
    }

    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::new(Error::msg(message))
    }

    pub(crate) fn unspecified() -> Self {
        Self::new(anyhow!("promise failed without a reason"))
    }

    pub fn ptr_eq(&self, other: &Failure) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn error(&self) -> &Error {
        &self.0
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        match error.downcast::<Failure>() {
            Ok(failure) => failure,
            Err(error)  => Self::new(error),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl StdError for Failure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}
