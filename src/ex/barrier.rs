use std::cell::RefCell;
use std::rc::Rc;
use tracing::trace;
use crate::base::{Args, Failure, IntoArgs, OnError, Promise, PromiseProxy, Result, Thenable, Throwable, Value};

/// Resolves its own promise with the bound args once `size` of the
/// promises it is attached to have resolved.
#[derive(Clone)]
pub struct Barrier {
    state: Rc<RefCell<State>>,
    proxy: PromiseProxy,
}

struct State {
    args:      Args,
    arrived:   usize,
    size:      usize,
    ready:     bool,
    finalized: bool,
}

impl Barrier {
    pub fn new<I, A>(promises: I, args: A, size: Option<usize>) -> Result<Self>
    where
        I: IntoIterator<Item = Promise>,
        A: IntoArgs,
    {
        let promises = promises.into_iter().collect::<Vec<_>>();

        let state = State {
            args:      args.into_args(),
            arrived:   0,
            size:      size.unwrap_or(promises.len()),
            ready:     false,
            finalized: false,
        };

        let barrier = Self {
            state: Rc::new(RefCell::new(state)),
            proxy: PromiseProxy::new(),
        };
        barrier.proxy.set_target(Promise::default());

        let finalized = !promises.is_empty() || barrier.state.borrow().size > 0;
        barrier.extend_noincr(promises)?;

        if finalized {
            barrier.state.borrow_mut().finalized = true;
            if barrier.complete() {
                barrier.fire()?;
            }
        }

        Ok(barrier)
    }

    pub fn arrive(&self) -> Result<()> {
        {
            let mut state = self.state.borrow_mut();
            if state.ready || self.proxy.cancelled() {
                return Ok(());
            }
            state.arrived += 1;
            trace!(arrived = state.arrived, size = state.size, "barrier arrival");
        }

        let fire = self.state.borrow().finalized && self.complete();
        match fire {
            true  => self.fire(),
            false => Ok(()),
        }
    }

    pub fn finalize(&self) -> Result<()> {
        let fire = {
            let mut state = self.state.borrow_mut();
            let fire = !state.finalized && state.arrived >= state.size;
            state.finalized = true;
            fire
        };

        match fire {
            true  => self.fire(),
            false => Ok(()),
        }
    }

    pub fn add(&self, promise: Promise) -> Result<()> {
        if self.proxy.cancelled() {
            return Ok(());
        }
        if self.state.borrow().ready {
            return Err(full());
        }
        self.state.borrow_mut().size += 1;
        self.add_noincr(promise).map(drop)
    }

    pub fn add_noincr(&self, promise: Promise) -> Result<Promise> {
        if self.proxy.cancelled() {
            return Ok(promise);
        }
        if self.state.borrow().ready {
            return Err(full());
        }
        promise.then(self.clone())?;
        Ok(promise)
    }

    pub fn extend<I: IntoIterator<Item = Promise>>(&self, promises: I) -> Result<()> {
        if !self.proxy.cancelled() {
            let promises = promises.into_iter().collect::<Vec<_>>();
            self.state.borrow_mut().size += promises.len();
            self.extend_noincr(promises)?;
        }
        Ok(())
    }

    pub fn extend_noincr<I: IntoIterator<Item = Promise>>(&self, promises: I) -> Result<()> {
        for promise in promises {
            self.add_noincr(promise)?;
        }
        Ok(())
    }

    pub fn cancel(&self) {
        self.proxy.cancel();
    }

    pub fn throw1(&self, exc: Option<Failure>) -> Result<()> {
        self.proxy.throw1(exc)
    }

    pub fn ready(&self) -> bool {
        self.state.borrow().ready
    }

    pub fn cancelled(&self) -> bool {
        self.proxy.cancelled()
    }

    pub fn failed(&self) -> bool {
        self.proxy.failed()
    }

    pub fn size(&self) -> usize {
        self.state.borrow().size
    }

    pub fn promise(&self) -> Option<Promise> {
        self.proxy.target()
    }

    fn complete(&self) -> bool {
        let state = self.state.borrow();
        state.arrived >= state.size
    }

    fn fire(&self) -> Result<()> {
        let args = {
            let mut state = self.state.borrow_mut();
            state.ready = true;
            state.args.clone()
        };

        match self.proxy.target() {
            Some(target) => target.resolve(args).map(drop),
            None         => Ok(()),
        }
    }
}

fn full() -> Failure {
    Failure::msg("cannot add promise to a fulfilled barrier")
}

impl Thenable for Barrier {
    fn then_with(&self, on_success: Promise, on_error: Option<OnError>) -> Result<Promise> {
        self.proxy.then_with(on_success, on_error)
    }
}

impl Throwable for Barrier {
    fn throw_with(&self, exc: Option<Failure>, propagate: bool) -> Result<()> {
        self.proxy.throw_with(exc, propagate)
    }
}

impl From<Barrier> for Promise {
    fn from(barrier: Barrier) -> Self {
        Promise::new(move |_: Args| {
            barrier.arrive()?;
            Ok(Value::null())
        })
    }
}
