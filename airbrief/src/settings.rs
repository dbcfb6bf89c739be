use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::{error::ApplicationResult, guardrail::GuardrailConfig};

/// Runtime configuration. Layered from an optional `airbrief.toml` and the
/// environment (`GUARDRAIL_THRESHOLD_KT`, `MAX_LOOPS`, ...); read-only once
/// constructed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub guardrail_threshold_kt: f64,
    pub max_loops: u32,
    pub use_gust_for_verification: bool,
    pub magnetic_correction_enabled: bool,
    pub llm_backend: String,
    pub llm_endpoint: String,
    pub llm_timeout_ms: u64,
    pub request_deadline_ms: u64,
    pub audit_log_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            guardrail_threshold_kt: 3.0,
            max_loops: 8,
            use_gust_for_verification: false,
            magnetic_correction_enabled: true,
            llm_backend: "pattern".to_string(),
            llm_endpoint: "http://127.0.0.1:8080/v1/chat/completions".to_string(),
            llm_timeout_ms: 20_000,
            request_deadline_ms: 30_000,
            audit_log_path: PathBuf::from("airbrief-audit.jsonl"),
        }
    }
}

impl Settings {
    pub fn load(config_file: Option<&Path>) -> ApplicationResult<Self> {
        let mut builder = Config::builder();
        builder = match config_file {
            Some(path) => builder.add_source(File::from(path.to_path_buf()).required(true)),
            None => builder.add_source(File::with_name("airbrief").required(false)),
        };
        let settings = builder
            .add_source(Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn guardrail(&self) -> GuardrailConfig {
        GuardrailConfig {
            threshold_kt: self.guardrail_threshold_kt,
            use_gust: self.use_gust_for_verification,
            magnetic_correction: self.magnetic_correction_enabled,
        }
    }
}
