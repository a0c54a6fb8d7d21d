//! Core types shared by the RemoteControl crates: request timestamps and
//! tracing setup.

pub mod time;
pub mod tracing;

pub use time::{RequestTime, TimeParseError};
pub use tracing::{init_tracing, TracingConfig, TracingError, TracingOutputFormat};
