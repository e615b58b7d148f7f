//! Runtime configuration pulled from the environment.

use crate::error::Result;
use tracing::warn;

pub const DEFAULT_MODEL_URL: &str =
    "https://api-inference.huggingface.co/models/mistralai/Mistral-7B-Instruct-v0.2";

/// Floor applied by the lexical fallback when no vector match reached the
/// regular thresholds.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.65;

#[derive(Debug, Clone)]
pub struct Config {
    pub chroma_url: String,
    pub model_url: String,
    pub api_key: Option<String>,
    pub database_url: Option<String>,
    pub similarity_threshold: f64,
    pub queries_dir: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let chroma_url = std::env::var("CHROMA_URL").unwrap_or_else(|_| {
            let host = std::env::var("CHROMA_HOST").unwrap_or_else(|_| "localhost".to_string());
            let port = std::env::var("CHROMA_PORT").unwrap_or_else(|_| "8000".to_string());
            format!("http://{}:{}", host, port)
        });

        let model_url =
            std::env::var("HUGGINGFACE_MODEL_URL").unwrap_or_else(|_| DEFAULT_MODEL_URL.to_string());

        let api_key = std::env::var("HUGGINGFACE_API_KEY").ok();
        let database_url = std::env::var("DATABASE_URL").ok();

        let similarity_threshold = match std::env::var("SIMILARITY_THRESHOLD") {
            Ok(raw) => parse_threshold(&raw).unwrap_or_else(|| {
                warn!(raw, "invalid SIMILARITY_THRESHOLD, using default");
                DEFAULT_SIMILARITY_THRESHOLD
            }),
            Err(_) => DEFAULT_SIMILARITY_THRESHOLD,
        };

        let queries_dir =
            std::env::var("QUERIES_FOLDER").unwrap_or_else(|_| "queries".to_string());

        Ok(Self {
            chroma_url,
            model_url,
            api_key,
            database_url,
            similarity_threshold,
            queries_dir,
        })
    }
}

fn parse_threshold(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| (0.0..=1.0).contains(value))
}
