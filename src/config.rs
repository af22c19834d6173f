//! Configuration module

use std::env;
use std::path::PathBuf;

use crate::schema::DEFAULT_SEED;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding uploaded CSV files
    pub upload_dir: PathBuf,

    /// Directory holding trained models
    pub model_dir: PathBuf,

    /// Bind address
    pub host: String,

    /// Server port
    pub port: u16,

    /// Seed used when a training request does not carry one
    pub random_seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            model_dir: PathBuf::from("models"),
            host: "0.0.0.0".to_string(),
            port: 8000,
            random_seed: DEFAULT_SEED,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),

            model_dir: env::var("MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),

            host: env::var("HOST").unwrap_or(defaults.host),

            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),

            random_seed: env::var("RANDOM_SEED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.random_seed),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolves an uploaded file name inside the upload directory, refusing paths.
    pub fn upload_path(&self, filename: &str) -> Option<PathBuf> {
        let plain = !filename.is_empty()
            && !filename.contains("..")
            && !filename.contains('/')
            && !filename.contains('\\');
        plain.then(|| self.upload_dir.join(filename))
    }
}
