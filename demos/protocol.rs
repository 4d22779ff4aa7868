use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use anyhow::Result;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, registry};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use pledge::{Args, Promise, Value};
use pledge::ex::{ensure, transform, wrap};

fn main() -> Result<()> {
    let mut filter = EnvFilter::from_default_env();
    filter = filter.add_directive(LevelFilter::INFO.into());
    let print = fmt::layer().compact();
    registry().with(filter).with(print).init();

    let stream   = Stream::new(b"\x00\x00\x00\x05hello\x00\x00\x00\x05world");
    let protocol = Protocol::new(stream.clone());

    for _ in 0..2 {
        protocol.receive_message()?;
        while stream.pump()? {}
    }

    for message in protocol.buffer.borrow().iter() {
        println!("received {message}");
    }

    Ok(())
}

/// Byte source that completes pending reads when pumped, standing in for
/// an event loop.
#[derive(Clone)]
struct Stream {
    data:  Rc<RefCell<VecDeque<u8>>>,
    reads: Rc<RefCell<VecDeque<(usize, Promise)>>>,
}

#[derive(Clone)]
struct Protocol {
    stream: Stream,
    buffer: Rc<RefCell<Vec<String>>>,
}

impl Stream {
    fn new(data: &[u8]) -> Self {
        Self {
            data:  Rc::new(RefCell::new(data.iter().copied().collect())),
            reads: Rc::default(),
        }
    }

    fn read(&self, size: usize, callback: Option<Promise>) -> Promise {
        let callback = ensure(callback);
        self.reads.borrow_mut().push_back((size, callback.clone()));
        callback
    }

    fn pump(&self) -> Result<bool> {
        let (size, callback) = match self.reads.borrow_mut().pop_front() {
            Some(read) => read,
            None       => return Ok(false),
        };

        let bytes = {
            let mut data = self.data.borrow_mut();
            let size = size.min(data.len());
            data.drain(..size).collect::<Vec<_>>()
        };

        info!(size, "read complete");
        callback.resolve(Value::from(serde_json::Value::from(bytes)))?;
        Ok(true)
    }
}

impl Protocol {
    fn new(stream: Stream) -> Self {
        Self { stream, buffer: Rc::default() }
    }

    fn receive_message(&self) -> Result<Promise> {
        let body    = self.clone();
        let prepare = self.clone();

        let next = self.read_header()
            .then(move |args: Args| -> anyhow::Result<Value> {
                let size = args.first().and_then(Value::as_i64).unwrap_or_default();
                Ok(Value::from(body.read_body(size as usize)))
            })?
            .then(wrap(move |args: Args| -> anyhow::Result<Value> {
                prepare.prepare_body(args);
                Ok(Value::null())
            }))?;

        Ok(next)
    }

    fn read_header(&self) -> Promise {
        let header = Promise::default();
        self.stream.read(4, Some(transform(decode_header, header.clone(), ())));
        header
    }

    fn read_body(&self, size: usize) -> Promise {
        self.stream.read(size, None)
    }

    fn prepare_body(&self, args: Args) {
        let bytes = bytes(&args);
        self.buffer.borrow_mut().push(String::from_utf8_lossy(&bytes).into_owned());
    }
}

fn decode_header(args: Args) -> anyhow::Result<Value> {
    let bytes  = bytes(&args);
    let header = <[u8; 4]>::try_from(bytes.as_slice())?;
    Ok(Value::from(u32::from_be_bytes(header)))
}

fn bytes(args: &Args) -> Vec<u8> {
    args.last()
        .and_then(Value::as_data)
        .and_then(|data| data.as_array().cloned())
        .unwrap_or_default()
        .iter()
        .filter_map(|b| b.as_u64())
        .map(|b| b as u8)
        .collect()
}
