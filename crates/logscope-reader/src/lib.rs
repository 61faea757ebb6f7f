//! Line sources for logscope
//!
//! This crate turns a single followed file, a pipe, or several followed files
//! into one bounded stream of lines with a shared lifecycle.

mod error;
mod options;
mod pipe;
mod reader;
mod sink;
mod tail;

pub use error::{ReaderError, Result};
pub use options::{DEFAULT_CAPACITY, DEFAULT_POLL_INTERVAL_MS, ReaderOptions};
pub use pipe::PipeSource;
pub use reader::{ErrorNotifier, Reader, ReaderKind};
