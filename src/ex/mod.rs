pub use barrier::Barrier;
pub use combinators::{bind_args, ensure, fire_now, make_bound, maybe, replace, transform, wrap};

pub mod barrier;
pub mod combinators;
