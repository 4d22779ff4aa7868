use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use serde_json::Value as Data;
use super::failure::Failure;
use super::types::Thenable;

/// Callable bound into a promise.
pub type Function = Rc<dyn Fn(Args) -> anyhow::Result<Value>>;

#[derive(Clone)]
pub enum Value {
    Data(Data),
    Failure(Failure),
    Thenable(Rc<dyn Thenable>),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Args {
    pub args:   Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
}

pub trait IntoArgs {
    fn into_args(self) -> Args;
}

impl Value {
    pub fn null() -> Self {
        Value::Data(Data::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Data(Data::Null))
    }

    pub fn as_data(&self) -> Option<&Data> {
        match self {
            Value::Data(data) => Some(data),
            _                 => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_data().and_then(Data::as_i64)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_data().and_then(Data::as_str)
    }

    pub fn as_failure(&self) -> Option<&Failure> {
        match self {
            Value::Failure(failure) => Some(failure),
            _                       => None,
        }
    }

    pub fn as_thenable(&self) -> Option<&Rc<dyn Thenable>> {
        match self {
            Value::Thenable(thenable) => Some(thenable),
            _                         => None,
        }
    }
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg<V: Into<Value>>(mut self, value: V) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    /// Positional arguments of `self` followed by those of `rest`; keywords
    /// of `rest` win on collision.
    pub fn merge(&self, rest: Args) -> Args {
        let Args { args, kwargs } = rest;

        let mut merged = self.clone();
        merged.args.extend(args);
        merged.kwargs.extend(kwargs);
        merged
    }

    pub(crate) fn prepend(&mut self, front: Args) {
        let Args { mut args, kwargs } = front;
        args.append(&mut self.args);
        self.args = args;
        self.kwargs.extend(kwargs);
    }

    pub fn first(&self) -> Option<&Value> {
        self.args.first()
    }

    pub fn last(&self) -> Option<&Value> {
        self.args.last()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Data(a),     Value::Data(b))     => a == b,
            (Value::Failure(a),  Value::Failure(b))  => a.ptr_eq(b),
            (Value::Thenable(a), Value::Thenable(b)) => Rc::ptr_eq(a, b),
            _                                        => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Data(data)       => write!(f, "{data}"),
            Value::Failure(failure) => write!(f, "Failure({failure})"),
            Value::Thenable(_)      => write!(f, "Thenable"),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::null()
    }
}

impl From<Data> for Value {
    fn from(data: Data) -> Self {
        Value::Data(data)
    }
}

impl From<Failure> for Value {
    fn from(failure: Failure) -> Self {
        Value::Failure(failure)
    }
}

impl From<Rc<dyn Thenable>> for Value {
    fn from(thenable: Rc<dyn Thenable>) -> Self {
        Value::Thenable(thenable)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Self::null()
    }
}

macro_rules! data {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::Data(v.into())
            }
        })*
    };
}

data!(bool, i32, i64, u32, u64, f64, String, &str);

impl IntoArgs for () {
    fn into_args(self) -> Args {
        Args::new()
    }
}

impl IntoArgs for Value {
    fn into_args(self) -> Args {
        Args::new().arg(self)
    }
}

impl IntoArgs for Data {
    fn into_args(self) -> Args {
        Args::new().arg(self)
    }
}

impl IntoArgs for Vec<Value> {
    fn into_args(self) -> Args {
        Args { args: self, kwargs: BTreeMap::new() }
    }
}

impl IntoArgs for Args {
    fn into_args(self) -> Args {
        self
    }
}
