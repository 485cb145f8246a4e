use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{BackendError, DescriptionBackend};

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<String>,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Describes images through an Ollama server's `/api/generate` endpoint.
#[derive(Clone)]
pub struct OllamaBackend {
    host: String,
    model: String,
    agent: ureq::Agent,
}

impl OllamaBackend {
    pub fn new(host: &str, model: &str, timeout_secs: u64) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(timeout_secs)))
            .http_status_as_error(false)
            .build()
            .into();

        Self {
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            agent,
        }
    }

    fn generate(&self, image: &[u8], prompt: &str) -> Result<String, BackendError> {
        let url = format!("{}/api/generate", self.host);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            images: vec![STANDARD.encode(image)],
            stream: false,
        };

        debug!("Requesting description from {} ({})", url, self.model);
        let mut response = self
            .agent
            .post(&url)
            .send_json(&request)
            .map_err(|e| BackendError::Connection {
                host: self.host.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        Ok(parsed.response.trim().to_string())
    }
}

#[async_trait]
impl DescriptionBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn describe(&self, image: Vec<u8>, prompt: &str) -> Result<String, BackendError> {
        let backend = self.clone();
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || backend.generate(&image, &prompt)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = GenerateRequest {
            model: "gemma3:4b",
            prompt: "Describe",
            images: vec![STANDARD.encode(b"abc")],
            stream: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gemma3:4b");
        assert_eq!(json["images"][0], "YWJj");
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_host_trailing_slash_is_trimmed() {
        let backend = OllamaBackend::new("http://localhost:11434/", "gemma3:4b", 5);
        assert_eq!(backend.host, "http://localhost:11434");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_connection_error() {
        // Nothing listens on port 9 (discard) on test machines
        let backend = OllamaBackend::new("http://127.0.0.1:9", "gemma3:4b", 5);
        let result = backend.describe(b"abc".to_vec(), "Describe").await;
        assert!(matches!(result, Err(BackendError::Connection { .. })));
    }
}
