//! Configuration parsing and validation for particle redistribution

use serde::{Deserialize, Serialize};
use std::fs;

use crate::plan::HandshakeMode;

/// Redistribution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedistributeConfig {
    /// How ranks learn inbound message sizes
    #[serde(default = "default_handshake")]
    pub handshake: HandshakeMode,
    /// Ranks this rank may exchange particles with (local handshake only)
    #[serde(default)]
    pub neighbor_ranks: Vec<usize>,
}

fn default_handshake() -> HandshakeMode {
    HandshakeMode::Local
}

impl Default for RedistributeConfig {
    fn default() -> Self {
        Self {
            handshake: default_handshake(),
            neighbor_ranks: Vec::new(),
        }
    }
}

impl RedistributeConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &str) -> Result<Self, String> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;
        Self::from_str(&contents)
    }

    /// Parse configuration from a JSON string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, String> {
        let config: RedistributeConfig = serde_json::from_str(contents)
            .map_err(|e| format!("Failed to parse config JSON: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = self.neighbor_ranks.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != self.neighbor_ranks.len() {
            return Err("neighbor_ranks must not contain duplicates".to_string());
        }

        if self.handshake == HandshakeMode::Local && self.neighbor_ranks.is_empty() {
            // Legal for a serial run, but a multi-rank local handshake
            // with no neighbors drops every outbound particle loudly.
            tracing::warn!("Local handshake configured with an empty neighbor set");
        }

        Ok(())
    }
}
