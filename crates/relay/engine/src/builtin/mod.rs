//! Builtin step runners

mod noop;
mod wait;

pub use noop::NoopRunner;
pub use wait::WaitRunner;
