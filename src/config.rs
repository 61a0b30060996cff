use std::{env, path::PathBuf, str::FromStr};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Runtime settings, read from the environment (and `.env` when present).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub upload_dir: PathBuf,
    pub static_dir: PathBuf,
    pub max_file_bytes: usize,
    pub cors_allow_origins: Vec<String>,
    /// Passed to `tesseract -l`, e.g. `eng+deu`.
    pub tesseract_languages: String,
    pub rasterize_dpi: u32,
    pub paddle_model_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: "sqlite://ocr_results.db".to_string(),
            db_max_connections: 5,
            upload_dir: PathBuf::from("uploads"),
            static_dir: PathBuf::from("static"),
            max_file_bytes: 50 * 1024 * 1024,
            cors_allow_origins: vec!["*".to_string()],
            tesseract_languages: "eng".to_string(),
            rasterize_dpi: 300,
            paddle_model_dir: PathBuf::from("models/paddle-ocr"),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            static_dir: env::var("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_dir),
            max_file_bytes: parse_var("MAX_FILE_BYTES", defaults.max_file_bytes)?,
            cors_allow_origins: env::var("CORS_ALLOW_ORIGINS")
                .map(|v| split_origins(&v))
                .unwrap_or(defaults.cors_allow_origins),
            tesseract_languages: env::var("TESSERACT_LANGUAGES")
                .unwrap_or(defaults.tesseract_languages),
            rasterize_dpi: parse_var("RASTERIZE_DPI", defaults.rasterize_dpi)?,
            paddle_model_dir: env::var("PADDLE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.paddle_model_dir),
        })
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_allow_origins.iter().any(|o| o == "*")
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(default),
    }
}

fn split_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}
