//! Pipeline settings and logging setup.

use crate::error::ConfigError;
use crate::streaming::Framing;
use serde::Deserialize;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Settings of a [`Pipeline`](crate::Pipeline), usually read from JSON.
///
/// # Example
/// ```
/// use micro_rest::PipelineConfig;
///
/// let config = PipelineConfig::from_json(r#"{ "worker_threads": 4, "max_body_size": 1024 }"#).unwrap();
/// assert_eq!(config.worker_threads, 4);
/// assert_eq!(config.stream_demand, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// elements of a streaming reply in flight at most, unless the emitter sets its own demand
    pub stream_demand: usize,
    /// size of the worker pool running blocking operations
    pub worker_threads: usize,
    /// largest request body the body reader buffers, in bytes
    pub max_body_size: usize,
    /// add a `Date` header to operation replies
    pub date_header: bool,
    /// framing of streaming replies built without an explicit one
    pub default_framing: Framing,
    pub log_level: String,
    /// chunks buffered between the driver and the transport in [`Pipeline::handle`](crate::Pipeline::handle)
    pub response_channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stream_demand: 1,
            worker_threads: 16,
            max_body_size: 2 * 1024 * 1024,
            date_header: true,
            default_framing: Framing::Array,
            log_level: "info".to_string(),
            response_channel_capacity: 16,
        }
    }
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream_demand == 0 {
            return Err(ConfigError::invalid("stream_demand must be at least 1"));
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::invalid("worker_threads must be at least 1"));
        }
        if self.response_channel_capacity == 0 {
            return Err(ConfigError::invalid("response_channel_capacity must be at least 1"));
        }
        self.level()?;
        Ok(())
    }

    pub fn level(&self) -> Result<Level, ConfigError> {
        self.log_level.parse::<Level>().map_err(|e| ConfigError::invalid(format!("log_level '{}': {e}", self.log_level)))
    }
}

/// Installs a formatting subscriber as the global default, a no-op when one is already set.
pub fn init_tracing(level: Level) {
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("global tracing subscriber already set");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.level().unwrap(), Level::INFO);
        assert_eq!(PipelineConfig::from_json("{}").unwrap(), config);
    }

    #[test]
    fn parse_overrides() {
        let config = PipelineConfig::from_json(
            r#"{ "stream_demand": 8, "date_header": false, "default_framing": "newline_delimited", "log_level": "debug" }"#,
        )
        .unwrap();
        assert_eq!(config.stream_demand, 8);
        assert!(!config.date_header);
        assert_eq!(config.default_framing, Framing::NewlineDelimited);
        assert_eq!(config.level().unwrap(), Level::DEBUG);
    }

    #[test]
    fn invalid_config() {
        assert!(matches!(PipelineConfig::from_json(r#"{ "stream_demand": 0 }"#), Err(ConfigError::Invalid { .. })));
        assert!(matches!(PipelineConfig::from_json(r#"{ "log_level": "loud" }"#), Err(ConfigError::Invalid { .. })));
        assert!(matches!(PipelineConfig::from_json(r#"{ "unknown": 1 }"#), Err(ConfigError::Parse { .. })));
        assert!(matches!(PipelineConfig::from_json("not json"), Err(ConfigError::Parse { .. })));
    }
}
