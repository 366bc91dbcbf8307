//! Service configuration from the environment

use crate::flow::{presets, GraphError, StepGraph};
use crate::runtime::{RuntimeSettings, DEFAULT_IDLE_TIMEOUT};
use crate::state_machine::EngineConfig;
use crate::supabase::SupabaseConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
    #[error("SUPABASE_URL and SUPABASE_ANON_KEY must be set together")]
    IncompleteSupabase,
    #[error("Unknown flow preset: {0}")]
    UnknownPreset(String),
    #[error("Failed to read flow file {path}: {source}")]
    ReadFlow {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid flow: {0}")]
    Flow(#[from] GraphError),
}

/// Where the step graph comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowSource {
    Preset(String),
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub flow: FlowSource,
    /// Default `source` tag for sessions that don't send one
    pub source: String,
    /// Hosted store; the local database is used when absent
    pub supabase: Option<SupabaseConfig>,
    pub flush_interval: Duration,
    pub typing_delay: Duration,
    pub idle_timeout: Option<Duration>,
    pub record_validation_failures: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let db_path = var("LEADBOT_DB_PATH").map_or_else(
            || {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".leadbot").join("leadbot.db")
            },
            PathBuf::from,
        );

        let flow = match var("LEADBOT_FLOW_PATH") {
            Some(path) => FlowSource::File(PathBuf::from(path)),
            None => FlowSource::Preset(var("LEADBOT_FLOW_PRESET").unwrap_or_else(|| "lead".to_string())),
        };

        let supabase = match (var("SUPABASE_URL"), var("SUPABASE_ANON_KEY")) {
            (Some(url), Some(anon_key)) => Some(SupabaseConfig {
                url,
                anon_key,
                leads_table: var("LEADBOT_LEADS_TABLE").unwrap_or_else(|| "leads".to_string()),
                events_table: var("LEADBOT_EVENTS_TABLE")
                    .unwrap_or_else(|| "chatbot_analytics".to_string()),
            }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteSupabase),
        };

        let idle_timeout = match var("LEADBOT_IDLE_TIMEOUT_SECS") {
            Some(raw) => match parse_value::<u64>("LEADBOT_IDLE_TIMEOUT_SECS", &raw)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            None => Some(DEFAULT_IDLE_TIMEOUT),
        };

        Ok(Self {
            port: parse_or::<u16>(&var, "LEADBOT_PORT", 8000)?,
            db_path,
            flow,
            source: var("LEADBOT_SOURCE").unwrap_or_else(|| "chatbot".to_string()),
            supabase,
            flush_interval: Duration::from_secs(parse_or::<u64>(&var, "LEADBOT_FLUSH_INTERVAL_SECS", 10)?.max(1)),
            typing_delay: Duration::from_millis(parse_or::<u64>(&var, "LEADBOT_TYPING_DELAY_MS", 800)?),
            idle_timeout,
            record_validation_failures: match var("LEADBOT_RECORD_VALIDATION_FAILURES") {
                Some(raw) => parse_bool("LEADBOT_RECORD_VALIDATION_FAILURES", &raw)?,
                None => false,
            },
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            typing_delay: self.typing_delay,
            record_validation_failures: self.record_validation_failures,
            ..EngineConfig::default()
        }
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            flush_interval: self.flush_interval,
            idle_timeout: self.idle_timeout,
            ..RuntimeSettings::default()
        }
    }

    /// Load and validate the configured flow
    pub fn load_flow(&self) -> Result<StepGraph, ConfigError> {
        match &self.flow {
            FlowSource::Preset(name) => presets::by_name(name)
                .ok_or_else(|| ConfigError::UnknownPreset(name.clone()))?
                .map_err(ConfigError::from),
            FlowSource::File(path) => {
                let json = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFlow {
                    path: path.clone(),
                    source,
                })?;
                Ok(StepGraph::from_json(&json)?)
            }
        }
    }
}

fn parse_or<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    var(name).map_or(Ok(default), |raw| parse_value(name, &raw))
}

fn parse_value<T: FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: raw.to_string(),
    })
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: raw.to_string(),
        }),
    }
}
