//! Provider configuration: name, endpoint, API key, model, timeout,
//! max retries, and a free-form custom-config map, with a `from_env`
//! constructor for deployments that inject credentials via environment.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub custom_config: HashMap<String, serde_json::Value>,
}

impl ProviderConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            endpoint: None,
            api_key: None,
            timeout_secs: Some(30),
            max_retries: Some(3),
            custom_config: HashMap::new(),
        }
    }

    /// Loads overrides from `KGRAG_{NAME}_{API_KEY,ENDPOINT,MODEL,TIMEOUT,MAX_RETRIES}`.
    #[must_use]
    pub fn from_env(name: &str) -> Self {
        let prefix = format!("KGRAG_{}_", name.to_uppercase());
        let mut config = Self::new(name, "default");
        config.api_key = std::env::var(format!("{prefix}API_KEY")).ok();
        config.endpoint = std::env::var(format!("{prefix}ENDPOINT")).ok();
        if let Ok(model) = std::env::var(format!("{prefix}MODEL")) {
            config.model = model;
        }
        config.timeout_secs = std::env::var(format!("{prefix}TIMEOUT"))
            .ok()
            .and_then(|v| v.parse().ok());
        config.max_retries = std::env::var(format!("{prefix}MAX_RETRIES"))
            .ok()
            .and_then(|v| v.parse().ok());
        config
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}
