use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::debug;
use super::failure::{Failure, Result};
use super::promise::{OnError, Promise};

pub trait Thenable {
    fn then_with(&self, on_success: Promise, on_error: Option<OnError>) -> Result<Promise>;

    fn then(&self, on_success: Promise) -> Result<Promise> {
        self.then_with(on_success, None)
    }
}

pub trait Throwable {
    fn throw_with(&self, exc: Option<Failure>, propagate: bool) -> Result<()>;

    fn throw(&self, exc: Failure) -> Result<()> {
        self.throw_with(Some(exc), true)
    }
}

/// Stable handle that forwards to a promise assigned after construction.
#[derive(Clone, Default)]
pub struct PromiseProxy {
    target: Rc<RefCell<Option<Promise>>>,
}

impl PromiseProxy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_target(&self, promise: Promise) {
        *self.target.borrow_mut() = Some(promise);
    }

    pub fn target(&self) -> Option<Promise> {
        self.target.borrow().clone()
    }

    pub fn cancel(&self) {
        match self.target() {
            Some(promise) => promise.cancel(),
            None          => debug!("cancel on proxy without target"),
        }
    }

    pub fn throw1(&self, exc: Option<Failure>) -> Result<()> {
        self.require()?.throw1(exc)
    }

    pub fn cancelled(&self) -> bool {
        self.target().map_or(false, |p| p.cancelled())
    }

    pub fn ready(&self) -> bool {
        self.target().map_or(false, |p| p.ready())
    }

    pub fn failed(&self) -> bool {
        self.target().map_or(false, |p| p.failed())
    }

    fn require(&self) -> Result<Promise> {
        self.target().ok_or_else(|| Failure::msg("promise proxy has no target"))
    }
}

impl Thenable for PromiseProxy {
    fn then_with(&self, on_success: Promise, on_error: Option<OnError>) -> Result<Promise> {
        self.require()?.then_with(on_success, on_error)
    }
}

impl Throwable for PromiseProxy {
    fn throw_with(&self, exc: Option<Failure>, propagate: bool) -> Result<()> {
        self.require()?.throw_with(exc, propagate)
    }
}

impl fmt::Debug for PromiseProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseProxy").field("target", &self.target()).finish()
    }
}
