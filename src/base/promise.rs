use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::rc::Rc;
use tracing::{debug, trace, warn};
use super::failure::{Failure, Result};
use super::types::{Thenable, Throwable};
use super::value::{Args, Function, IntoArgs, Value};

/// Shared handle to a resolvable unit of deferred computation. Cloning the
/// handle refers to the same promise; [`clone_with`](Promise::clone_with)
/// makes a structural copy.
#[derive(Clone, Default)]
pub struct Promise {
    inner: Rc<RefCell<Inner>>,
}

#[derive(Clone)]
pub enum OnError {
    Function(Function),
    Promise(Promise),
}

pub struct Builder {
    function: Option<Function>,
    args:     Args,
    callback: Option<Promise>,
    on_error: Option<OnError>,
}

#[derive(Default)]
struct Inner {
    function:  Option<Function>,
    bound:     Args,
    cancelled: bool,
    ready:     bool,
    failed:    bool,
    value:     Option<Args>,
    reason:    Option<Failure>,
    on_error:  Option<OnError>,
    pending:   Pending,
}

#[derive(Clone, Default)]
enum Pending {
    #[default]
    Empty,
    One(Promise),
    Many(Rc<RefCell<VecDeque<Promise>>>),
}

enum Settled {
    Cancelled,
    Failed(Failure),
    Ready(Args),
    Pending,
}

impl Promise {
    pub fn new<F>(function: F) -> Self
    where
        F: Fn(Args) -> anyhow::Result<Value> + 'static,
    {
        Self::builder().function(function).build()
    }

    pub fn bound<F, A>(function: F, args: A) -> Self
    where
        F: Fn(Args) -> anyhow::Result<Value> + 'static,
        A: IntoArgs,
    {
        Self::builder().function(function).args(args).build()
    }

    pub fn builder() -> Builder {
        Builder {
            function: None,
            args:     Args::new(),
            callback: None,
            on_error: None,
        }
    }

    /// Returns the bound function's return value, or null when unbound. A
    /// failing function is routed to [`throw_with`](Promise::throw_with).
    pub fn resolve<A: IntoArgs>(&self, args: A) -> Result<Value> {
        let (function, args) = {
            let inner = self.inner.borrow();
            if inner.cancelled {
                return Ok(Value::null());
            }
            (inner.function.clone(), inner.bound.merge(args.into_args()))
        };

        let (value, retval) = match function {
            Some(function) => match function(args) {
                Ok(retval) => (Args::new().arg(retval.clone()), retval),
                Err(e)     => {
                    self.throw_with(Some(e.into()), true)?;
                    return Ok(Value::null());
                }
            },
            None => (args, Value::null()),
        };

        let pending = {
            let mut inner = self.inner.borrow_mut();
            if inner.cancelled {
                return Ok(retval);
            }
            inner.ready  = true;
            inner.failed = false;
            inner.value  = Some(value.clone());
            mem::take(&mut inner.pending)
        };

        trace!(listeners = pending.len(), "promise resolved");

        match pending {
            Pending::Empty     => (),
            Pending::One(next) => {
                next.resolve(value)?;
            }
            Pending::Many(queue) => {
                drain(&queue, |next| next.resolve(value.clone()).map(drop))?;
            }
        }

        Ok(retval)
    }

    pub fn then<P: Into<Promise>>(&self, callback: P) -> Result<Promise> {
        self.then_with(callback, None)
    }

    /// Register `callback` to run when this promise settles, or replay the
    /// outcome into it at once if it already has. `on_error` is installed
    /// only when `callback` has no error handler of its own.
    pub fn then_with<P: Into<Promise>>(&self, callback: P, on_error: Option<OnError>) -> Result<Promise> {
        let next = callback.into();
        if let Some(on_error) = on_error {
            let mut inner = next.inner.borrow_mut();
            if inner.on_error.is_none() {
                inner.on_error = Some(on_error);
            }
        }

        let settled = {
            let mut inner = self.inner.borrow_mut();
            if inner.cancelled {
                Settled::Cancelled
            } else if inner.failed {
                Settled::Failed(inner.reason.clone().unwrap_or_else(Failure::unspecified))
            } else if inner.ready {
                Settled::Ready(inner.value.clone().unwrap_or_default())
            } else {
                inner.pending.push(next.clone());
                Settled::Pending
            }
        };

        match settled {
            Settled::Cancelled      => next.cancel(),
            Settled::Failed(reason) => next.throw1(Some(reason))?,
            Settled::Ready(value)   => {
                next.resolve(value)?;
            }
            Settled::Pending        => (),
        }

        Ok(next)
    }

    pub fn throw1(&self, exc: Option<Failure>) -> Result<()> {
        let (on_error, args) = {
            let mut inner = self.inner.borrow_mut();
            if inner.cancelled {
                return Ok(());
            }
            let exc = exc.or_else(|| inner.reason.clone()).unwrap_or_else(Failure::unspecified);
            inner.failed = true;
            inner.ready  = false;
            inner.reason = Some(exc.clone());
            let args = inner.bound.clone().arg(exc);
            (inner.on_error.clone(), args)
        };

        match on_error {
            Some(on_error) => on_error.call(args),
            None           => Ok(()),
        }
    }

    pub fn throw<E: Into<Failure>>(&self, exc: E) -> Result<()> {
        self.throw_with(Some(exc.into()), true)
    }

    /// Fail this promise and every directly attached continuation. Without
    /// an error handler and with `propagate` set, `exc` is handed back.
    pub fn throw_with(&self, exc: Option<Failure>, propagate: bool) -> Result<()> {
        let exc = {
            let inner = self.inner.borrow();
            if inner.cancelled {
                return Ok(());
            }
            exc.or_else(|| inner.reason.clone()).unwrap_or_else(Failure::unspecified)
        };

        debug!(%exc, "promise failed");

        let local   = self.throw1(Some(exc.clone()));
        let pending = mem::take(&mut self.inner.borrow_mut().pending);
        let cascade = match pending {
            Pending::Empty       => Ok(()),
            Pending::One(next)   => next.throw1(Some(exc.clone())),
            Pending::Many(queue) => drain(&queue, |next| next.throw1(Some(exc.clone()))),
        };

        if propagate && self.inner.borrow().on_error.is_none() {
            warn!(%exc, "unhandled promise failure");
            return Err(exc);
        }

        local.and(cascade)
    }

    pub fn cancel(&self) {
        let (pending, on_error) = {
            let mut inner = self.inner.borrow_mut();
            inner.cancelled = true;
            (mem::take(&mut inner.pending), inner.on_error.take())
        };

        debug!(listeners = pending.len(), "promise cancelled");

        for next in pending.listeners() {
            next.cancel();
        }

        if let Some(OnError::Promise(handler)) = on_error {
            handler.cancel();
        }
    }

    pub fn partial<A: IntoArgs>(&self, args: A) -> Promise {
        self.clone_with(args)
    }

    pub fn partial_in_place<A: IntoArgs>(&self, args: A) {
        self.inner.borrow_mut().bound.prepend(args.into_args());
    }

    // continuation storage is shared with the original, not copied
    pub fn clone_with<A: IntoArgs>(&self, args: A) -> Promise {
        let inner = self.inner.borrow();

        let mut bound = inner.bound.clone();
        bound.prepend(args.into_args());

        let inner = Inner {
            function:  inner.function.clone(),
            bound:     bound,
            cancelled: inner.cancelled,
            ready:     inner.ready,
            failed:    inner.failed,
            value:     inner.value.clone(),
            reason:    inner.reason.clone(),
            on_error:  None,
            pending:   inner.pending.clone(),
        };

        Promise { inner: Rc::new(RefCell::new(inner)) }
    }

    pub fn set_on_error<E: Into<OnError>>(&self, on_error: E) {
        self.inner.borrow_mut().on_error = Some(on_error.into());
    }

    pub fn listeners(&self) -> Vec<Promise> {
        self.inner.borrow().pending.listeners()
    }

    pub fn args(&self) -> Args {
        self.inner.borrow().bound.clone()
    }

    pub fn value(&self) -> Option<Args> {
        self.inner.borrow().value.clone()
    }

    pub fn reason(&self) -> Option<Failure> {
        self.inner.borrow().reason.clone()
    }

    pub fn cancelled(&self) -> bool {
        self.inner.borrow().cancelled
    }

    pub fn ready(&self) -> bool {
        self.inner.borrow().ready
    }

    pub fn failed(&self) -> bool {
        self.inner.borrow().failed
    }

    pub fn is_bound(&self) -> bool {
        self.inner.borrow().function.is_some()
    }

    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Builder {
    pub fn function<F>(mut self, function: F) -> Self
    where
        F: Fn(Args) -> anyhow::Result<Value> + 'static,
    {
        self.function = Some(Rc::new(function));
        self
    }

    pub fn args<A: IntoArgs>(mut self, args: A) -> Self {
        self.args = args.into_args();
        self
    }

    pub fn callback<P: Into<Promise>>(mut self, callback: P) -> Self {
        self.callback = Some(callback.into());
        self
    }

    pub fn on_error<E: Into<OnError>>(mut self, on_error: E) -> Self {
        self.on_error = Some(on_error.into());
        self
    }

    pub fn build(self) -> Promise {
        let Self { function, args, callback, on_error } = self;

        let mut inner = Inner {
            function: function,
            bound:    args,
            on_error: on_error,
            ..Inner::default()
        };

        if let Some(callback) = callback {
            inner.pending.push(callback);
        }

        Promise { inner: Rc::new(RefCell::new(inner)) }
    }
}

impl OnError {
    fn call(&self, args: Args) -> Result<()> {
        match self {
            OnError::Function(function) => function(args).map(drop).map_err(Failure::from),
            OnError::Promise(promise)   => promise.resolve(args).map(drop),
        }
    }
}

impl Pending {
    fn push(&mut self, next: Promise) {
        *self = match mem::take(self) {
            Pending::Empty       => Pending::One(next),
            Pending::One(first)  => Pending::Many(Rc::new(RefCell::new(VecDeque::from([first, next])))),
            Pending::Many(queue) => {
                queue.borrow_mut().push_back(next);
                Pending::Many(queue)
            }
        };
    }

    fn len(&self) -> usize {
        match self {
            Pending::Empty       => 0,
            Pending::One(_)      => 1,
            Pending::Many(queue) => queue.borrow().len(),
        }
    }

    fn listeners(&self) -> Vec<Promise> {
        match self {
            Pending::Empty       => Vec::new(),
            Pending::One(next)   => vec![next.clone()],
            Pending::Many(queue) => queue.borrow().iter().cloned().collect(),
        }
    }
}

// each continuation is popped before it runs
fn drain<F>(queue: &RefCell<VecDeque<Promise>>, mut f: F) -> Result<()>
where
    F: FnMut(Promise) -> Result<()>,
{
    loop {
        let next = queue.borrow_mut().pop_front();
        match next {
            Some(next) => f(next)?,
            None       => return Ok(()),
        }
    }
}

impl Thenable for Promise {
    fn then_with(&self, on_success: Promise, on_error: Option<OnError>) -> Result<Promise> {
        Promise::then_with(self, on_success, on_error)
    }
}

impl Throwable for Promise {
    fn throw_with(&self, exc: Option<Failure>, propagate: bool) -> Result<()> {
        Promise::throw_with(self, exc, propagate)
    }
}

impl<F> From<F> for Promise
where
    F: Fn(Args) -> anyhow::Result<Value> + 'static,
{
    fn from(function: F) -> Self {
        Promise::new(function)
    }
}

impl From<Promise> for OnError {
    fn from(promise: Promise) -> Self {
        OnError::Promise(promise)
    }
}

impl<F> From<F> for OnError
where
    F: Fn(Args) -> anyhow::Result<Value> + 'static,
{
    fn from(function: F) -> Self {
        OnError::Function(Rc::new(function))
    }
}

impl From<Promise> for Value {
    fn from(promise: Promise) -> Self {
        Value::Thenable(Rc::new(promise))
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Promise")
            .field("bound",     &inner.function.is_some())
            .field("cancelled", &inner.cancelled)
            .field("ready",     &inner.ready)
            .field("failed",    &inner.failed)
            .field("listeners", &inner.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use anyhow::{anyhow, Result};
    use crate::base::{Args, Failure, Value};
    use super::Promise;

    type Log = Rc<RefCell<Vec<(&'static str, Args)>>>;

    fn recorder(log: &Log, name: &'static str) -> Promise {
        let log = log.clone();
        Promise::new(move |args: Args| {
            log.borrow_mut().push((name, args));
            Ok(Value::null())
        })
    }

    #[test]
    fn unbound_delivers_call_args() -> Result<()> {
        let log = Log::default();
        let p   = Promise::default();
        p.then(recorder(&log, "a"))?;

        p.resolve(Args::new().arg(20).kwarg("k", "v"))?;

        assert!(p.ready());
        assert_eq!(log.borrow()[0].1, Args::new().arg(20).kwarg("k", "v"));
        Ok(())
    }

    #[test]
    fn bound_delivers_return_value() -> Result<()> {
        let p = Promise::new(|args: Args| {
            let n = args.first().and_then(Value::as_i64).unwrap_or_default();
            Ok(Value::from(n * 2))
        });
        let next = p.then(Promise::default())?;

        let ret = p.resolve(Value::from(21))?;

        assert_eq!(ret, Value::from(42));
        assert_eq!(next.value(), Some(Args::new().arg(42)));
        Ok(())
    }

    #[test]
    fn fifo_order_across_upgrade() -> Result<()> {
        let log = Log::default();
        let p   = Promise::default();
        p.then(recorder(&log, "a"))?;
        p.then(recorder(&log, "b"))?;
        p.then(recorder(&log, "c"))?;
        assert_eq!(p.listeners().len(), 3);

        p.resolve(Value::from("v"))?;

        let names = log.borrow().iter().map(|(n, _)| *n).collect::<Vec<_>>();
        assert_eq!(names, ["a", "b", "c"]);
        assert!(log.borrow().iter().all(|(_, a)| *a == Args::new().arg("v")));
        assert!(p.listeners().is_empty());
        Ok(())
    }

    #[test]
    fn late_then_replays() -> Result<()> {
        let log = Log::default();
        let p   = Promise::default();
        p.resolve(Value::from(1))?;

        p.then(recorder(&log, "late"))?;

        assert_eq!(log.borrow().len(), 1);
        assert!(p.listeners().is_empty());
        Ok(())
    }

    #[test]
    fn late_then_replays_failure_locally() -> Result<()> {
        let p   = Promise::default();
        let exc = Failure::msg("gone");
        p.set_on_error(|_: Args| -> anyhow::Result<Value> { Ok(Value::null()) });
        p.throw(exc.clone())?;

        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        let next = Promise::builder()
            .on_error(move |args: Args| -> anyhow::Result<Value> {
                *sink.borrow_mut() = args.last().and_then(Value::as_failure).cloned();
                Ok(Value::null())
            })
            .build();

        p.then(next.clone())?;

        assert!(next.failed());
        assert!(seen.borrow().as_ref().map_or(false, |f| f.ptr_eq(&exc)));
        Ok(())
    }

    #[test]
    fn continuation_may_register_during_drain() -> Result<()> {
        let log  = Log::default();
        let p    = Promise::default();
        let late = recorder(&log, "late");
        let hook = {
            let p = p.clone();
            Promise::new(move |_: Args| {
                p.then(late.clone())?;
                Ok(Value::null())
            })
        };
        p.then(hook)?;
        p.then(recorder(&log, "second"))?;

        p.resolve(())?;

        let names = log.borrow().iter().map(|(n, _)| *n).collect::<Vec<_>>();
        assert_eq!(names, ["late", "second"]);
        Ok(())
    }

    #[test]
    fn function_failure_goes_to_handler() -> Result<()> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let p = Promise::builder()
            .function(|_: Args| Err(anyhow!("bad")))
            .args(Value::from("ctx"))
            .on_error(move |args: Args| -> anyhow::Result<Value> {
                sink.borrow_mut().push(args);
                Ok(Value::null())
            })
            .build();

        let ret = p.resolve(())?;

        assert!(ret.is_null());
        assert!(p.failed());
        assert!(!p.ready());
        let seen = seen.borrow();
        assert_eq!(seen[0].first(), Some(&Value::from("ctx")));
        assert_eq!(seen[0].last().and_then(Value::as_failure).map(|f| f.to_string()), Some("bad".into()));
        Ok(())
    }

    #[test]
    fn unhandled_failure_reraises_same_object() {
        let p   = Promise::default();
        let exc = Failure::msg("loud");

        let err = p.throw(exc.clone()).unwrap_err();

        assert!(err.ptr_eq(&exc));
        assert!(p.failed());
        assert!(p.reason().map_or(false, |r| r.ptr_eq(&exc)));
    }

    #[test]
    fn throw_without_propagate_is_quiet() {
        let p = Promise::default();
        assert!(p.throw_with(Some(Failure::msg("x")), false).is_ok());
        assert!(p.failed());
    }

    #[test]
    fn throw_defaults_to_recorded_reason() {
        let p   = Promise::default();
        let exc = Failure::msg("first");
        let _   = p.throw(exc.clone());

        let err = p.throw_with(None, true).unwrap_err();
        assert!(err.ptr_eq(&exc));
    }

    #[test]
    fn throw_cascades_one_hop() -> Result<()> {
        let seen  = Rc::new(RefCell::new(0));
        let sink  = seen.clone();
        let p     = Promise::default();
        let q     = p.then_with(Promise::default(), Some((move |_: Args| -> anyhow::Result<Value> {
            *sink.borrow_mut() += 1;
            Ok(Value::null())
        }).into()))?;
        let r     = q.then(Promise::default())?;
        let extra = p.then(Promise::default())?;

        let err = p.throw(Failure::msg("boom"));

        assert!(err.is_err());
        assert!(q.failed());
        assert!(extra.failed());
        assert!(!r.failed());
        assert_eq!(*seen.borrow(), 1);
        Ok(())
    }

    #[test]
    fn handled_failure_does_not_reraise() -> Result<()> {
        let p = Promise::builder().on_error(|_: Args| -> anyhow::Result<Value> { Ok(Value::null()) }).build();
        let q = p.then(Promise::default())?;

        p.throw(Failure::msg("handled"))?;

        assert!(q.failed());
        Ok(())
    }

    #[test]
    fn continuation_keeps_its_own_handler() -> Result<()> {
        let log = Log::default();
        let p   = Promise::builder().on_error(Promise::default()).build();
        let q   = Promise::builder().on_error(recorder(&log, "own")).build();

        p.then_with(q.clone(), Some(recorder(&log, "chained").into()))?;
        p.throw(Failure::msg("boom"))?;

        let names = log.borrow().iter().map(|(n, _)| *n).collect::<Vec<_>>();
        assert_eq!(names, ["own"]);
        assert!(q.failed());
        Ok(())
    }

    #[test]
    fn function_cancelling_itself_stays_unresolved() -> Result<()> {
        let log  = Log::default();
        let slot = Rc::new(RefCell::new(None::<Promise>));
        let p    = {
            let slot = slot.clone();
            Promise::new(move |_: Args| {
                if let Some(p) = slot.borrow().as_ref() {
                    p.cancel();
                }
                Ok(Value::from(1))
            })
        };
        *slot.borrow_mut() = Some(p.clone());
        let q = p.then(recorder(&log, "q"))?;

        p.resolve(())?;
        slot.borrow_mut().take();

        assert!(p.cancelled());
        assert!(!p.ready());
        assert_eq!(p.value(), None);
        assert!(q.cancelled());
        assert!(log.borrow().is_empty());
        Ok(())
    }

    #[test]
    fn cancel_suppresses_everything() -> Result<()> {
        let log     = Log::default();
        let handler = recorder(&log, "handler");
        let p       = Promise::builder().on_error(handler.clone()).build();
        let q       = p.then(recorder(&log, "q"))?;

        p.cancel();
        p.resolve(Value::from(1))?;
        p.throw(Failure::msg("ignored"))?;

        assert!(p.cancelled());
        assert!(q.cancelled());
        assert!(handler.cancelled());
        assert!(!p.ready());
        assert!(log.borrow().is_empty());

        let late = p.then(recorder(&log, "late"))?;
        assert!(late.cancelled());
        assert!(p.listeners().is_empty());
        Ok(())
    }

    #[test]
    fn partial_in_place_orders_args() -> Result<()> {
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        let p = Promise::new(move |args: Args| {
            *sink.borrow_mut() = Some(args);
            Ok(Value::null())
        });

        p.partial_in_place(Args::new().arg(1).arg(2).kwarg("x", 3).kwarg("y", 0));
        p.resolve(Args::new().arg(9).kwarg("y", 5))?;

        let expect = Args::new().arg(1).arg(2).arg(9).kwarg("x", 3).kwarg("y", 5);
        assert_eq!(seen.borrow().clone(), Some(expect));
        Ok(())
    }

    #[test]
    fn partial_leaves_original() {
        let p = Promise::bound(|_: Args| Ok(Value::null()), Value::from("b"));
        let q = p.partial(Value::from("a"));

        assert_eq!(p.args(), Args::new().arg("b"));
        assert_eq!(q.args(), Args::new().arg("a").arg("b"));
        assert!(q.is_bound());
        assert!(!q.ptr_eq(&p));
    }

    #[test]
    fn clone_with_copies_state() -> Result<()> {
        let p = Promise::default();
        p.resolve(Value::from(3))?;

        let c = p.clone_with(Args::new().arg("x").kwarg("k", 1));

        assert!(c.ready());
        assert!(!c.failed());
        assert!(!c.cancelled());
        assert_eq!(c.value(), p.value());
        assert_eq!(c.args(), Args::new().arg("x").kwarg("k", 1));
        assert!(p.args().is_empty());
        Ok(())
    }

    #[test]
    fn clone_with_shares_pending_continuations() -> Result<()> {
        let log = Log::default();
        let p   = Promise::default();
        p.then(recorder(&log, "a"))?;
        p.then(recorder(&log, "b"))?;

        let c = p.clone_with(());
        c.then(recorder(&log, "c"))?;
        assert_eq!(p.listeners().len(), 3);

        c.resolve(Value::from(1))?;
        assert_eq!(log.borrow().len(), 3);
        assert!(p.listeners().is_empty());
        assert!(!p.ready());
        Ok(())
    }

    #[test]
    fn builder_callback_is_first_listener() -> Result<()> {
        let log = Log::default();
        let p   = Promise::builder().callback(recorder(&log, "cb")).build();
        p.then(recorder(&log, "then"))?;

        p.resolve(())?;

        let names = log.borrow().iter().map(|(n, _)| *n).collect::<Vec<_>>();
        assert_eq!(names, ["cb", "then"]);
        Ok(())
    }

    #[test]
    fn failing_continuation_clears_storage() {
        let p = Promise::default();
        let _ = p.then(|_: Args| -> anyhow::Result<Value> { Err(anyhow!("first")) });
        let _ = p.then(Promise::default());

        assert!(p.resolve(()).is_err());
        assert!(p.ready());
        assert!(p.listeners().is_empty());
    }
}
