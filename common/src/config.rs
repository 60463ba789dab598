use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::{env, fs};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub bench_name: String,
    pub log_level: String,
    pub log_file: String,
    pub database_path: String,
    pub instrument_timeout_ms: u64,
    pub default_settle_ms: u64,
    pub ingest_queue_depth: usize,
    pub ingest_batch_size: usize,
    pub waveform_chunk_hours: i64,
    pub store_retry_attempts: u32,
    pub store_retry_base_ms: u64,
}

static CONFIG: OnceCell<Config> = OnceCell::new();

impl Config {
    pub fn init(env_path: &str) -> &'static Self {
        dotenvy::from_filename(env_path).ok();

        CONFIG.get_or_init(|| {
            let bench_name = env::var("BENCH_NAME").unwrap_or_else(|_| "sweepbench".into());
            let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "debug".into());
            let log_file = env::var("LOG_FILE").unwrap_or_else(|_| "logs/bench.log".into());
            let database_path =
                env::var("DATABASE_PATH").unwrap_or_else(|_| "data/sweepbench.db".into());

            if let Some(parent) = std::path::Path::new(&log_file).parent() {
                fs::create_dir_all(parent).expect("Failed to create log directory");
            }

            let instrument_timeout_ms = env_u64("INSTRUMENT_TIMEOUT_MS", 5_000);
            let default_settle_ms = env_u64("DEFAULT_SETTLE_MS", 100);
            let ingest_queue_depth = env_u64("INGEST_QUEUE_DEPTH", 16) as usize;
            let ingest_batch_size = env_u64("INGEST_BATCH_SIZE", 500) as usize;
            let waveform_chunk_hours = env_u64("WAVEFORM_CHUNK_HOURS", 1) as i64;
            let store_retry_attempts = env_u64("STORE_RETRY_ATTEMPTS", 3) as u32;
            let store_retry_base_ms = env_u64("STORE_RETRY_BASE_MS", 50);

            Config {
                bench_name,
                log_level,
                log_file,
                database_path,
                instrument_timeout_ms,
                default_settle_ms,
                ingest_queue_depth,
                ingest_batch_size,
                waveform_chunk_hours,
                store_retry_attempts,
                store_retry_base_ms,
            }
        })
    }

    pub fn get() -> &'static Self {
        CONFIG.get().expect("Config not initialized")
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
