//! Event emission and consumption.

pub mod stream;

pub use stream::{channel, EventSink, EventStream, DEFAULT_EVENT_CAPACITY};
