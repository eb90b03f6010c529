//! Gemini REST client.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{RequestBuilder, Response};
use reqwest_eventsource::{Event, EventSource};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use super::{
    GenAiConfig, GenAiError, GenerateRequest, GenerateResponse, GenerativeService, TextStream,
    VideoOperation, VideoRequest,
};

const CONNECT_TIMEOUT_SECS: u64 = 10;
const STREAM_BUFFER: usize = 32;
const API_KEY_HEADER: &str = "x-goog-api-key";

/// [`GenerativeService`] backed by `generativelanguage.googleapis.com`.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn new(config: &GenAiConfig) -> Result<Self, GenAiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn api_key(&self) -> Result<&str, GenAiError> {
        self.api_key.as_deref().ok_or(GenAiError::MissingApiKey)
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.base_url, model, method)
    }

    fn post(&self, url: &str) -> Result<RequestBuilder, GenAiError> {
        Ok(self.http.post(url).header(API_KEY_HEADER, self.api_key()?))
    }
}

/// Turn a non-2xx response into [`GenAiError::Api`].
async fn check_status(response: Response) -> Result<Response, GenAiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GenAiError::Api {
        status: status.as_u16(),
        message: api_error_message(&body),
    })
}

/// Prefer `error.message` from a Google API error body, else the raw body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message")?.as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Text of one SSE chunk; empty when the chunk carries no text.
fn decode_chunk(data: &str) -> Result<String, GenAiError> {
    let response: GenerateResponse = serde_json::from_str(data)?;
    Ok(response.text())
}

fn video_body(request: &VideoRequest) -> Value {
    let mut instance = json!({ "prompt": request.prompt });
    if let Some(image) = &request.reference_image {
        instance["image"] = json!({
            "bytesBase64Encoded": image.data,
            "mimeType": image.mime_type,
        });
    }
    json!({
        "instances": [instance],
        "parameters": {
            "aspectRatio": request.aspect_ratio,
            "resolution": request.resolution,
            "sampleCount": 1,
        },
    })
}

#[async_trait]
impl GenerativeService for GeminiClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, GenAiError> {
        let url = self.model_url(&request.model, "generateContent");
        debug!(model = %request.model, "generateContent");
        let response = self.post(&url)?.json(request).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn stream_generate(&self, request: &GenerateRequest) -> Result<TextStream, GenAiError> {
        let url = format!(
            "{}?alt=sse",
            self.model_url(&request.model, "streamGenerateContent")
        );
        debug!(model = %request.model, "streamGenerateContent");
        let builder = self
            .post(&url)?
            .header("Accept", "text/event-stream")
            .json(request);
        let mut es = EventSource::new(builder).map_err(|e| GenAiError::Stream(e.to_string()))?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            while let Some(event) = es.next().await {
                let item = match event {
                    Ok(Event::Open) => continue,
                    Ok(Event::Message(message)) => match decode_chunk(&message.data) {
                        Ok(text) if text.is_empty() => continue,
                        other => other,
                    },
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                        let body = response.text().await.unwrap_or_default();
                        Err(GenAiError::Api {
                            status: status.as_u16(),
                            message: api_error_message(&body),
                        })
                    }
                    Err(e) => Err(GenAiError::Stream(e.to_string())),
                };
                let failed = item.is_err();
                if tx.send(item).await.is_err() {
                    debug!("stream consumer went away");
                    break;
                }
                if failed {
                    break;
                }
            }
            es.close();
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn submit_video(&self, request: &VideoRequest) -> Result<VideoOperation, GenAiError> {
        let url = self.model_url(&request.model, "predictLongRunning");
        debug!(model = %request.model, "predictLongRunning");
        let response = self.post(&url)?.json(&video_body(request)).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn poll_video(&self, operation: &VideoOperation) -> Result<VideoOperation, GenAiError> {
        let url = format!("{}/v1beta/{}", self.base_url, operation.name);
        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, self.api_key()?)
            .send()
            .await?;
        let response = check_status(response).await?;
        let refreshed: VideoOperation = response.json().await?;
        if let Some(error) = &refreshed.error {
            warn!(operation = %refreshed.name, code = error.code, "video operation failed");
        }
        Ok(refreshed)
    }
}
