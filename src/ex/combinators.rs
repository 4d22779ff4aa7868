use crate::base::{Args, Failure, IntoArgs, Promise, Value};

pub fn maybe<P: Into<Promise>>(target: Option<P>) -> Option<Promise> {
    target.map(Into::into)
}

pub fn ensure<P: Into<Promise>>(target: Option<P>) -> Promise {
    maybe(target).unwrap_or_default()
}

pub fn bind_args<P: Into<Promise>, A: IntoArgs>(target: Option<P>, args: A) -> Promise {
    let promise = ensure(target);
    promise.partial_in_place(args);
    promise
}

pub fn replace<P: Into<Promise>, A: IntoArgs>(target: P, args: A) -> Promise {
    let target = target.into();
    let args   = args.into_args();
    Promise::new(move |_: Args| {
        Ok(target.resolve(args.clone())?)
    })
}

pub fn fire_now<P: Into<Promise>, A: IntoArgs>(target: Option<P>, args: A) -> crate::Result<Promise> {
    let promise = ensure(target);
    promise.resolve(args)?;
    Ok(promise)
}

pub fn make_bound<F, A>(function: F, args: A) -> Promise
where
    F: Fn(Args) -> anyhow::Result<Value> + 'static,
    A: IntoArgs,
{
    Promise::bound(function, args)
}

/// Resolve `callback` with `filter(filter_args.., v)` for a trailing value
/// `v`. Filter failures, and failures thrown into the returned promise,
/// land on `callback` instead of the caller.
pub fn transform<F, P, A>(filter: F, callback: P, filter_args: A) -> Promise
where
    F: Fn(Args) -> anyhow::Result<Value> + 'static,
    P: Into<Promise>,
    A: IntoArgs,
{
    let callback    = callback.into();
    let filter_args = filter_args.into_args();

    let transformed = {
        let callback = callback.clone();
        Promise::new(move |args: Args| {
            let value = args.last().cloned().unwrap_or_default();
            match filter(filter_args.clone().arg(value)) {
                Ok(value) => Ok(callback.resolve(value)?),
                Err(e)    => {
                    callback.throw(e)?;
                    Ok(Value::null())
                }
            }
        })
    };

    transformed.set_on_error(move |args: Args| -> anyhow::Result<Value> {
        let exc = match failure_of(&args) {
            Some(exc) => exc,
            None      => return Ok(Value::null()),
        };
        if !callback.reason().map_or(false, |r| r.ptr_eq(&exc)) {
            callback.throw_with(Some(exc), false)?;
        }
        Ok(Value::null())
    });

    transformed
}

/// Callable that attaches `target` to a lone thenable argument instead of
/// resolving `target` with it.
pub fn wrap<P: Into<Promise>>(target: P) -> impl Fn(Args) -> anyhow::Result<Value> {
    let target = target.into();
    move |args: Args| -> anyhow::Result<Value> {
        if let [Value::Thenable(thenable)] = args.args.as_slice() {
            let next = thenable.then(target.clone())?;
            return Ok(Value::from(next));
        }
        Ok(target.resolve(args)?)
    }
}

fn failure_of(args: &Args) -> Option<Failure> {
    args.last().and_then(Value::as_failure).cloned()
}
