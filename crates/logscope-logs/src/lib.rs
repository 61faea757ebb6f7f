//! Log parsing, filtering, and ingestion for logscope

mod engine;
pub mod filter;
mod parser;
mod sampler;
mod settings;
mod store;

pub use engine::{Engine, EngineError, EngineEvent, EngineState};
pub use filter::{CompileError, EvalError, Expression, compile};
pub use parser::LogParser;
pub use sampler::{DEFAULT_SAMPLE_SIZE, infer_schema};
pub use settings::EngineSettings;
pub use store::LogStore;
