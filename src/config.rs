use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use logscope_logs::EngineSettings;
use logscope_reader::ReaderOptions;

/// Settings file contents. Every section and key is optional.
///
/// ```toml
/// [engine]
/// scroll_batch = 10
/// redraw_interval_ms = 500
///
/// [reader]
/// poll_interval_ms = 250
/// capacity = 256
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub engine: EngineSettings,
    pub reader: ReaderOptions,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load `path` if given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
