mod backoff;
mod engine;

pub use backoff::backoff_delay;
pub(crate) use engine::{Buffered, Committed, Engine, RunScope, StreamStart, Streaming};
