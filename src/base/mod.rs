pub use channel::listen;
pub use channel::Rx;
pub use failure::Failure;
pub use failure::Result;
pub use promise::Builder;
pub use promise::OnError;
pub use promise::Promise;
pub use types::PromiseProxy;
pub use types::Thenable;
pub use types::Throwable;
pub use value::Args;
pub use value::Function;
pub use value::IntoArgs;
pub use value::Value;

mod channel;
mod failure;
mod promise;
mod types;
mod value;
