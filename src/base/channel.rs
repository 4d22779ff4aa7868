#[cfg(not(feature = "tokio"))]
use crossbeam_channel::{bounded, Sender, Receiver, TryRecvError};
#[cfg(feature = "tokio")]
use std::{future::Future, pin::Pin, task::{Context, Poll}};
use std::cell::RefCell;
use std::rc::Rc;
#[cfg(feature = "tokio")]
use tokio::sync::oneshot::{channel, Sender, Receiver, error::TryRecvError};
use super::failure::{Failure, Result};
use super::promise::{OnError, Promise};
use super::value::{Args, Value};

struct Tx(RefCell<Option<Sender<Result<Args>>>>);

pub struct Rx(Receiver<Result<Args>>);

#[cfg(not(feature = "tokio"))]
fn channel<T>() -> (Sender<T>, Receiver<T>) {
    bounded(1)
}

/// Forward the outcome of `promise` to a oneshot channel. Cancelling the
/// promise closes the channel.
pub fn listen(promise: &Promise) -> Result<Rx> {
    let (tx, rx) = channel();
    let tx = Rc::new(Tx(RefCell::new(Some(tx))));

    let on_success = {
        let tx = tx.clone();
        move |args: Args| -> anyhow::Result<Value> {
            tx.send(Ok(args));
            Ok(Value::null())
        }
    };

    let on_error = move |args: Args| -> anyhow::Result<Value> {
        let failure = match args.last().and_then(Value::as_failure) {
            Some(failure) => failure.clone(),
            None          => Failure::unspecified(),
        };
        tx.send(Err(failure));
        Ok(Value::null())
    };

    promise.then_with(on_success, Some(OnError::from(on_error)))?;

    Ok(Rx(rx))
}

impl Tx {
    fn send(&self, result: Result<Args>) {
        if let Some(sender) = self.0.borrow_mut().take() {
            match sender.send(result) {
                Ok(()) => (),
                Err(_) => (),
            }
        }
    }
}

impl Rx {
    pub fn try_recv(&mut self) -> Result<Option<Args>> {
        match self.0.try_recv() {
            Ok(result)                   => result.map(Some),
            Err(TryRecvError::Empty)     => Ok(None),
            Err(_)                       => Err(dropped()),
        }
    }
}

#[cfg(feature = "tokio")]
impl Future for Rx {
    type Output = Result<Args>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.0).poll(cx) {
            Poll::Ready(Ok(r))  => Poll::Ready(r),
            Poll::Ready(Err(_)) => Poll::Ready(Err(dropped())),
            Poll::Pending       => Poll::Pending,
        }
    }
}

fn dropped() -> Failure {
    Failure::msg("listener dropped before the promise settled")
}
