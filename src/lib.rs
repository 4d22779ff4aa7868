pub use crate::base::{Args, Failure, OnError, Promise, PromiseProxy, Result, Value};
pub use crate::base::{IntoArgs, Thenable, Throwable};

pub mod base;
pub mod ex;
