use chorus_core::OrchestratorConfig;
use chorus_core::pipeline::PipelineConfig;
use chorus_core::segmenter::SegmenterConfig;
use chorus_core::task::TaskManagerConfig;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub openai_api_key: String,
    pub openai_api_base: Option<String>,
    pub chat_model: String,
    pub transcription_model: String,
    pub speech_model: String,
    pub speech_voice: String,
    /// Sample rate of the PCM16 audio clients stream to us.
    pub sample_rate: u32,
    pub segmenter: SegmenterConfig,
    pub response_debounce: Duration,
    pub task_ttl: Duration,
    pub task_capacity: usize,
    pub skill_timeout: Option<Duration>,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;
        let openai_api_base = std::env::var("OPENAI_API_BASE").ok();

        let chat_model = var_or("CHAT_MODEL", "gpt-4o-mini");
        let transcription_model = var_or("TRANSCRIPTION_MODEL", "whisper-1");
        let speech_model = var_or("SPEECH_MODEL", "tts-1");
        let speech_voice = var_or("SPEECH_VOICE", "alloy");

        let defaults = SegmenterConfig::default();
        let speech_threshold = parse_or("SPEECH_THRESHOLD", defaults.speech_threshold)?;
        if !(0.0..=1.0).contains(&speech_threshold) {
            return Err(ConfigError::InvalidValue(
                "SPEECH_THRESHOLD".to_string(),
                format!("{} is outside 0.0..=1.0", speech_threshold),
            ));
        }
        let segmenter = SegmenterConfig {
            speech_threshold,
            silence_duration: millis_or("SILENCE_DURATION_MS", defaults.silence_duration)?,
            no_new_audio_timeout: millis_or("NO_NEW_AUDIO_TIMEOUT_MS", defaults.no_new_audio_timeout)?,
            min_utterance_bytes: parse_or("MIN_UTTERANCE_BYTES", defaults.min_utterance_bytes)?,
        };

        let sample_rate = parse_or("SAMPLE_RATE", 16_000u32)?;
        if sample_rate == 0 {
            return Err(ConfigError::InvalidValue(
                "SAMPLE_RATE".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let task_defaults = TaskManagerConfig::default();
        let response_debounce = millis_or("RESPONSE_DEBOUNCE_MS", PipelineConfig::default().response_debounce)?;
        let task_ttl = Duration::from_secs(parse_or("TASK_TTL_SECS", task_defaults.ttl.as_secs())?);
        let task_capacity = parse_or("TASK_CAPACITY", task_defaults.capacity)?;
        let skill_timeout = match std::env::var("SKILL_TIMEOUT_MS") {
            Ok(raw) => Some(Duration::from_millis(parse_value("SKILL_TIMEOUT_MS", &raw)?)),
            Err(_) => None,
        };

        Ok(Self {
            bind_address,
            log_level,
            openai_api_key,
            openai_api_base,
            chat_model,
            transcription_model,
            speech_model,
            speech_voice,
            sample_rate,
            segmenter,
            response_debounce,
            task_ttl,
            task_capacity,
            skill_timeout,
        })
    }

    /// The engine configuration derived from these settings.
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            segmenter: self.segmenter.clone(),
            tasks: TaskManagerConfig {
                ttl: self.task_ttl,
                capacity: self.task_capacity,
                skill_timeout: self.skill_timeout,
                ..TaskManagerConfig::default()
            },
            pipeline: PipelineConfig {
                response_debounce: self.response_debounce,
                ..PipelineConfig::default()
            },
        }
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

fn parse_or<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn millis_or(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    parse_or(name, default.as_millis() as u64).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serial_test::serial;
    use std::env;

    const VARS: &[&str] = &[
        "BIND_ADDRESS",
        "RUST_LOG",
        "OPENAI_API_KEY",
        "OPENAI_API_BASE",
        "CHAT_MODEL",
        "TRANSCRIPTION_MODEL",
        "SPEECH_MODEL",
        "SPEECH_VOICE",
        "SPEECH_THRESHOLD",
        "SILENCE_DURATION_MS",
        "NO_NEW_AUDIO_TIMEOUT_MS",
        "MIN_UTTERANCE_BYTES",
        "SAMPLE_RATE",
        "RESPONSE_DEBOUNCE_MS",
        "TASK_TTL_SECS",
        "TASK_CAPACITY",
        "SKILL_TIMEOUT_MS",
    ];

    fn clear_env_vars() {
        unsafe {
            for var in VARS {
                env::remove_var(var);
            }
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("OPENAI_API_KEY", "test-openai-key");
        }
    }

    fn expect_invalid(var: &str) {
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(name, _) => assert_eq!(name, var),
            other => panic!("Expected InvalidValue for {var}, got {other:?}"),
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        clear_env_vars();
        set_minimal_env();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.openai_api_key, "test-openai-key");
        assert_eq!(config.openai_api_base, None);
        assert_eq!(config.chat_model, "gpt-4o-mini");
        assert_eq!(config.transcription_model, "whisper-1");
        assert_eq!(config.speech_model, "tts-1");
        assert_eq!(config.speech_voice, "alloy");
        assert_eq!(config.sample_rate, 16_000);
        assert_relative_eq!(config.segmenter.speech_threshold, 0.02);
        assert_eq!(config.segmenter.silence_duration, Duration::from_millis(1200));
        assert_eq!(config.segmenter.no_new_audio_timeout, Duration::from_millis(2500));
        assert_eq!(config.segmenter.min_utterance_bytes, 8000);
        assert_eq!(config.response_debounce, Duration::from_millis(2000));
        assert_eq!(config.task_ttl, Duration::from_secs(3600));
        assert_eq!(config.task_capacity, 1024);
        assert_eq!(config.skill_timeout, None);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:8080");
            env::set_var("RUST_LOG", "debug");
            env::set_var("OPENAI_API_BASE", "http://localhost:8000/v1");
            env::set_var("CHAT_MODEL", "gpt-4o");
            env::set_var("SPEECH_VOICE", "nova");
            env::set_var("SPEECH_THRESHOLD", "0.05");
            env::set_var("SILENCE_DURATION_MS", "800");
            env::set_var("MIN_UTTERANCE_BYTES", "4000");
            env::set_var("SAMPLE_RATE", "24000");
            env::set_var("RESPONSE_DEBOUNCE_MS", "500");
            env::set_var("TASK_CAPACITY", "16");
            env::set_var("SKILL_TIMEOUT_MS", "30000");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.openai_api_base.as_deref(), Some("http://localhost:8000/v1"));
        assert_eq!(config.chat_model, "gpt-4o");
        assert_eq!(config.speech_voice, "nova");
        assert_relative_eq!(config.segmenter.speech_threshold, 0.05);
        assert_eq!(config.segmenter.silence_duration, Duration::from_millis(800));
        assert_eq!(config.segmenter.min_utterance_bytes, 4000);
        assert_eq!(config.sample_rate, 24_000);
        assert_eq!(config.skill_timeout, Some(Duration::from_secs(30)));

        let engine = config.orchestrator();
        assert_eq!(engine.pipeline.response_debounce, Duration::from_millis(500));
        assert_eq!(engine.tasks.capacity, 16);
        assert_eq!(engine.tasks.skill_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    #[serial]
    fn test_config_missing_openai_key() {
        clear_env_vars();

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(msg) => assert!(msg.contains("OPENAI_API_KEY")),
            _ => panic!("Expected MissingVar for OPENAI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_bind_address() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("BIND_ADDRESS", "not-a-valid-address");
        }
        expect_invalid("BIND_ADDRESS");
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }
        expect_invalid("RUST_LOG");
    }

    #[test]
    #[serial]
    fn test_config_threshold_out_of_range() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("SPEECH_THRESHOLD", "1.5");
        }
        expect_invalid("SPEECH_THRESHOLD");
    }

    #[test]
    #[serial]
    fn test_config_non_numeric_duration() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("SILENCE_DURATION_MS", "soon");
        }
        expect_invalid("SILENCE_DURATION_MS");
    }

    #[test]
    #[serial]
    fn test_config_zero_sample_rate() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("SAMPLE_RATE", "0");
        }
        expect_invalid("SAMPLE_RATE");
    }
}
