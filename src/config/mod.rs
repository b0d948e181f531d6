use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub web: WebConfig,
    pub database: DatabaseConfig,
    pub asr: AsrConfig,
    pub status: StatusConfig,
    pub stt: SttConfig,
    pub refiner: RefinerConfig,
    pub spacing: SpacingConfig,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrConfig {
    /// Provider credential. Empty disables live and VOD transcription.
    /// Overridden by ASR_PROVIDER_KEY.
    pub api_key: String,
    pub model: String,
    pub language: String,
    /// End-of-utterance detection window in milliseconds.
    pub endpointing_ms: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    pub onair_url: String,
    pub referer: String,
    pub cache_ttl_secs: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// Start/stop workers automatically from broadcast status transitions.
    /// Overridden by AUTO_STT.
    pub auto_start: bool,
    pub poll_interval_secs: f64,
    pub keepalive_interval_secs: f64,
    pub stall_timeout_secs: f64,
    pub max_reconnect_delay_secs: f64,
    pub segment_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinerConfig {
    /// Rewriter credential. Empty disables the refiner.
    /// Overridden by REWRITER_API_KEY.
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub batch_size: usize,
    pub batch_interval_secs: f64,
    pub request_timeout_secs: u64,
    /// Known speaker names the rewriter may fix transcribed names against.
    pub roster: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpacingConfig {
    /// Directory holding the word-spacing model data. None uses the
    /// embedded default table.
    pub model_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            web: WebConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            database: DatabaseConfig {
                url: "sqlite://./assembly-captions.db".to_string(),
                max_connections: Some(10),
            },
            asr: AsrConfig {
                api_key: String::new(),
                model: "nova-3".to_string(),
                language: "ko".to_string(),
                endpointing_ms: 300,
            },
            status: StatusConfig {
                onair_url: "https://live.ggc.go.kr/getOnairListTodayData.do".to_string(),
                referer: "https://live.ggc.go.kr/".to_string(),
                cache_ttl_secs: 5,
                request_timeout_secs: 10,
            },
            stt: SttConfig {
                auto_start: true,
                poll_interval_secs: 2.0,
                keepalive_interval_secs: 8.0,
                stall_timeout_secs: 60.0,
                max_reconnect_delay_secs: 30.0,
                segment_timeout_secs: 10,
            },
            refiner: RefinerConfig {
                api_key: String::new(),
                api_url: "https://api.openai.com/v1/chat/completions".to_string(),
                model: "gpt-4o-mini".to_string(),
                batch_size: 8,
                batch_interval_secs: 2.0,
                request_timeout_secs: 30,
                roster: Vec::new(),
            },
            spacing: SpacingConfig { model_path: None },
            cors: CorsConfig {
                allowed_origins: vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:3001".to_string(),
                ],
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());

        let mut config: Self = if std::path::Path::new(&config_file).exists() {
            let contents = std::fs::read_to_string(&config_file)?;
            toml::from_str(&contents)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment variables take precedence over the config file so
    /// deployments can inject credentials without writing them to disk.
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("ASR_PROVIDER_KEY") {
            self.asr.api_key = key;
        }
        if let Ok(key) = std::env::var("REWRITER_API_KEY") {
            self.refiner.api_key = key;
        }
        if let Ok(auto) = std::env::var("AUTO_STT") {
            self.stt.auto_start = matches!(auto.to_lowercase().as_str(), "true" | "1" | "yes");
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(origins) = std::env::var("CORS_ALLOWED_ORIGINS") {
            self.cors.allowed_origins = origins
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect();
        }
    }

    pub fn asr_enabled(&self) -> bool {
        !self.asr.api_key.is_empty()
    }

    pub fn refiner_enabled(&self) -> bool {
        !self.refiner.api_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_allowlist_env_override_splits_on_commas() {
        let mut config = Config::default();
        std::env::set_var(
            "CORS_ALLOWED_ORIGINS",
            "https://captions.example, https://admin.example ,",
        );
        config.apply_env_overrides();
        std::env::remove_var("CORS_ALLOWED_ORIGINS");

        assert_eq!(
            config.cors.allowed_origins,
            vec![
                "https://captions.example".to_string(),
                "https://admin.example".to_string(),
            ]
        );
    }
}
