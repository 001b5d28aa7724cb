use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{CallOptions, ChunkStream, InferenceError, InferenceProvider};

/// Remote vendor provider speaking a plain `/v1/completions` JSON dialect.
#[derive(Clone)]
pub struct RemoteProvider {
    name: String,
    base_url: String,
    api_key: Option<SecretString>,
    models: Vec<String>,
    client: Client,
}

#[derive(Serialize)]
struct CompletionPayload<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    text: String,
}

impl RemoteProvider {
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        base_url: impl Into<String>,
        models: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: None,
            models: models.into_iter().map(Into::into).collect(),
            client: Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(api_key.into()));
        self
    }

    fn build_payload<'a>(
        &self,
        prompt: &'a str,
        model: &'a str,
        options: &CallOptions,
        stream: bool,
    ) -> CompletionPayload<'a> {
        CompletionPayload {
            model,
            prompt,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            stop: options.stop.clone(),
            stream: stream.then_some(true),
        }
    }

    async fn post_completion(
        &self,
        payload: &CompletionPayload<'_>,
    ) -> Result<reqwest::Response, InferenceError> {
        let mut request = self
            .client
            .post(format!("{}/v1/completions", self.base_url))
            .header("content-type", "application/json; charset=utf-8")
            .json(payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }
        let response = request.send().await?;

        match response.status().as_u16() {
            401 | 403 => Err(InferenceError::Auth("Invalid API key".to_string())),
            402 => Err(InferenceError::QuotaExceeded("Quota exhausted".to_string())),
            429 => {
                // Vendors overload 429 for both throttling and exhausted quota.
                let body = response.text().await.unwrap_or_default();
                if body.to_lowercase().contains("quota") {
                    Err(InferenceError::QuotaExceeded(body))
                } else {
                    Err(InferenceError::RateLimited(body))
                }
            }
            503 => Err(InferenceError::Unavailable(
                "Service unavailable".to_string(),
            )),
            status if status >= 400 => Err(InferenceError::Other(format!(
                "Unexpected status {status}"
            ))),
            _ => Ok(response),
        }
    }
}

#[async_trait]
impl InferenceProvider for RemoteProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> Vec<String> {
        self.models.clone()
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn requires_credentials(&self) -> bool {
        true
    }

    async fn validate_credentials(&self, api_key: Option<&SecretString>) -> bool {
        let Some(key) = api_key else {
            return false;
        };
        let request = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .bearer_auth(key.expose_secret());
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                log::warn!("Credential validation against {} failed: {e}", self.name);
                false
            }
        }
    }

    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        options: &CallOptions,
    ) -> Result<String, InferenceError> {
        if !self.models.iter().any(|m| m == model) {
            return Err(InferenceError::ModelNotFound(model.to_string()));
        }

        let payload = self.build_payload(prompt, model, options, false);
        let response = self.post_completion(&payload).await?;
        let completion = response.json::<CompletionResponse>().await?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.text)
            .ok_or_else(|| InferenceError::Other("Empty completion response".to_string()))
    }

    async fn stream(
        &self,
        prompt: &str,
        model: &str,
        options: &CallOptions,
    ) -> Result<ChunkStream, InferenceError> {
        if !self.models.iter().any(|m| m == model) {
            return Err(InferenceError::ModelNotFound(model.to_string()));
        }

        let payload = self.build_payload(prompt, model, options, true);
        let response = self.post_completion(&payload).await?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(bytes) => {
                        let raw = String::from_utf8_lossy(&bytes);
                        for line in raw.lines() {
                            let Some(data) = line.strip_prefix("data: ") else {
                                continue;
                            };
                            if data.trim() == "[DONE]" {
                                return;
                            }
                            match serde_json::from_str::<CompletionResponse>(data) {
                                Ok(parsed) => {
                                    if let Some(choice) = parsed.choices.into_iter().next() {
                                        yield Ok(choice.text);
                                    }
                                }
                                Err(e) => yield Err(InferenceError::Serde(e)),
                            }
                        }
                    }
                    Err(e) => yield Err(InferenceError::Request(e)),
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
