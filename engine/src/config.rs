use crate::{bundle::ArtifactPaths, error::AppError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "config/engine.toml";

/// Frontend dev servers allowed by default.
const DEFAULT_CORS_ORIGINS: [&str; 6] = [
    "http://localhost:3000",
    "http://localhost:5173",
    "http://localhost:5174",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:5173",
    "http://127.0.0.1:5174",
];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub models_dir: PathBuf,
    pub full_model_file: String,
    pub top20_model_file: String,
    pub scaler_file: String,
    /// Load artifacts before binding instead of on the first prediction.
    pub preload_models: bool,
    /// Contributors returned by the full-model endpoint.
    pub full_top_n: usize,
    /// Empty means any origin.
    pub cors_origins: Vec<String>,
}

impl Config {
    /// Defaults, then `config/engine.toml` (or the file named by
    /// `CRRT_CONFIG`), then `CRRT_*` environment variables.
    pub fn load() -> Result<Self, AppError> {
        let path = std::env::var("CRRT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self, AppError> {
        let settings: Self = config::Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 8000)?
            .set_default("models_dir", "models")?
            .set_default("full_model_file", "xgb_full.json")?
            .set_default("top20_model_file", "xgb_top20.json")?
            .set_default("scaler_file", "scaler_full.json")?
            .set_default("preload_models", true)?
            .set_default("full_top_n", 10)?
            .set_default("cors_origins", DEFAULT_CORS_ORIGINS.to_vec())?
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("CRRT")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cors_origins"),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn artifact_paths(&self) -> ArtifactPaths {
        ArtifactPaths {
            full_model: self.models_dir.join(&self.full_model_file),
            top20_model: self.models_dir.join(&self.top20_model_file),
            scaler: self.models_dir.join(&self.scaler_file),
        }
    }
}
