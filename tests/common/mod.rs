use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;
use pledge::{Args, Promise, Value};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, registry};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let mut filter = EnvFilter::from_default_env();
        filter = filter.add_directive(LevelFilter::WARN.into());
        let print = fmt::layer().compact().with_test_writer();
        registry().with(filter).with(print).init();
    });
}

/// Records every call made through the promises it hands out.
#[derive(Clone, Default)]
pub struct Mock {
    calls: Rc<RefCell<Vec<Args>>>,
}

impl Mock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn promise(&self) -> Promise {
        let calls = self.calls.clone();
        Promise::new(move |args: Args| {
            calls.borrow_mut().push(args);
            Ok(Value::null())
        })
    }

    pub fn calls(&self) -> Vec<Args> {
        self.calls.borrow().clone()
    }

    pub fn last(&self) -> Option<Args> {
        self.calls.borrow().last().cloned()
    }

    pub fn called(&self) -> bool {
        !self.calls.borrow().is_empty()
    }
}
