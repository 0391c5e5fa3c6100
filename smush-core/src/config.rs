//! Player configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::zlib_stream::DEFAULT_INPUT_BUFFER;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Physical read size for compressed movies
    pub input_buffer_size: usize,
    /// Capacity hint passed to the audio sink when its stream opens
    pub audio_buffer_bytes: usize,
    /// Largest chunk payload the parser will buffer in memory
    pub max_chunk_bytes: u32,
    /// Pace ticks with a frame timer instead of decoding flat out
    pub realtime: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            input_buffer_size: DEFAULT_INPUT_BUFFER,
            audio_buffer_bytes: 500_000,
            max_chunk_bytes: 16 * 1024 * 1024,
            realtime: false,
        }
    }
}

impl PlayerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }
}
