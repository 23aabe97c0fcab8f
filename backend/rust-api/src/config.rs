use std::env;
use std::time::Duration;

use crate::services::audio::AudioSettings;
use crate::services::experiment_service::ExperimentSettings;
use crate::services::presentation::TaskTiming;
use crate::services::task_controller::DEFAULT_DIGIT_DISPLAY_MS;

const DEFAULT_CORS_ORIGINS: [&str; 3] = [
    "http://localhost:3000",
    "http://localhost:3001",
    "http://localhost:5001",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    pub bind_addr: String,
    pub cors_origins: Vec<String>,
    pub audio: AudioSettings,
    pub digit_display_ms: u64,
    pub inter_digit_gap_ms: u64,
    /// Lifetime of saved experiment snapshots in Redis.
    pub state_ttl_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mongo_uri: "mongodb://localhost:27017".to_string(),
            redis_uri: "redis://127.0.0.1:6379/0".to_string(),
            mongo_database: "digitspan".to_string(),
            bind_addr: "0.0.0.0:3001".to_string(),
            cors_origins: DEFAULT_CORS_ORIGINS.iter().map(|o| o.to_string()).collect(),
            audio: AudioSettings::default(),
            digit_display_ms: DEFAULT_DIGIT_DISPLAY_MS,
            inter_digit_gap_ms: 500,
            state_ttl_seconds: 24 * 60 * 60,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml, then APP__ overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = Config::default();

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .or_else(|_| env::var("MONGODB_URI"))
            .unwrap_or(defaults.mongo_uri);

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or(defaults.mongo_database);

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or_else(|_| {
                let host = env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
                let port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
                match env::var("REDIS_PASSWORD") {
                    Ok(password) => format!("redis://:{}@{}:{}/0", password, host, port),
                    Err(_) => format!("redis://{}:{}/0", host, port),
                }
            });

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("PORT").map(|port| format!("0.0.0.0:{}", port)))
            .unwrap_or(defaults.bind_addr);

        let cors_origins = settings
            .get_string("server.cors_origins")
            .or_else(|_| env::var("CORS_ORIGINS"))
            .map(|raw| parse_origins(&raw))
            .unwrap_or(defaults.cors_origins);

        let audio = AudioSettings {
            track_count: settings
                .get_int("audio.track_count")
                .ok()
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.audio.track_count),
            track_base_url: settings
                .get_string("audio.track_base_url")
                .unwrap_or(defaults.audio.track_base_url),
        };

        let digit_display_ms = positive_int(&settings, "task.digit_display_ms")
            .unwrap_or(defaults.digit_display_ms);
        let inter_digit_gap_ms = positive_int(&settings, "task.inter_digit_gap_ms")
            .unwrap_or(defaults.inter_digit_gap_ms);
        let state_ttl_seconds = positive_int(&settings, "redis.state_ttl_seconds")
            .unwrap_or(defaults.state_ttl_seconds);

        Ok(Config {
            mongo_uri,
            redis_uri,
            mongo_database,
            bind_addr,
            cors_origins,
            audio,
            digit_display_ms,
            inter_digit_gap_ms,
            state_ttl_seconds,
        })
    }

    pub fn task_timing(&self) -> TaskTiming {
        TaskTiming::default()
            .with_digit_display(Duration::from_millis(self.digit_display_ms))
            .with_inter_digit_gap(Duration::from_millis(self.inter_digit_gap_ms))
    }

    pub fn experiment_settings(&self) -> ExperimentSettings {
        ExperimentSettings {
            timing: self.task_timing(),
            audio: self.audio.clone(),
            retention: Duration::from_secs(self.state_ttl_seconds),
        }
    }
}

fn positive_int(settings: &config::Config, key: &str) -> Option<u64> {
    settings
        .get_int(key)
        .ok()
        .and_then(|v| u64::try_from(v).ok())
        .filter(|v| *v > 0)
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}
