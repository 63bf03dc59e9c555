pub mod providers;

use crate::config::LlmConfig;
use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub enum LlmError {
    ConnectionError(String),
    ResponseError(String),
    ConfigError(String),
    Timeout(Duration),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::ConnectionError(msg) => write!(f, "LLM connection error: {}", msg),
            LlmError::ResponseError(msg) => write!(f, "LLM response error: {}", msg),
            LlmError::ConfigError(msg) => write!(f, "LLM configuration error: {}", msg),
            LlmError::Timeout(limit) => {
                write!(f, "LLM invocation exceeded {} s", limit.as_secs())
            }
        }
    }
}

impl Error for LlmError {}

/// Uniform model invocation used by the router, SQL strategy and
/// synthesizer. Providers are transport only; prompt construction and output
/// parsing live with the callers.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Wraps the configured provider with a per-invocation timeout.
pub struct LlmManager {
    client: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client: Arc<dyn LlmClient> = match config.backend.as_str() {
            "remote" => Arc::new(providers::remote::RemoteLlmProvider::new(config)?),
            "ollama" => Arc::new(providers::ollama::OllamaProvider::new(config)?),
            _ => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )))
            }
        };

        Ok(Self {
            client,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Build a manager around an arbitrary client, primarily for tests.
    pub fn with_client(client: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        match tokio::time::timeout(self.timeout, self.client.complete(prompt)).await {
            Err(_) => Err(LlmError::Timeout(self.timeout)),
            Ok(result) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowClient;

    #[async_trait]
    impl LlmClient for SlowClient {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("too late".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_invocation_surfaces_as_timeout() {
        let manager = LlmManager::with_client(Arc::new(SlowClient), Duration::from_millis(100));
        let err = manager.complete("hello").await.unwrap_err();
        assert!(matches!(err, LlmError::Timeout(_)));
    }

    #[test]
    fn unknown_backend_is_a_config_error() {
        let config = LlmConfig {
            backend: "punch-cards".to_string(),
            model: "m".to_string(),
            api_key: None,
            api_url: None,
            timeout_secs: 1,
        };
        assert!(matches!(
            LlmManager::new(&config),
            Err(LlmError::ConfigError(_))
        ));
    }
}
