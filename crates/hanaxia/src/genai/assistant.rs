//! Console tasks built on a [`GenerativeService`]: streaming chat, document
//! parsing, agentic planning, image and video generation.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hanaxia_protocol::{Attachment, Message, Role};
use tracing::{debug, info, warn};

use super::{
    Content, GenAiConfig, GenAiError, GenerateRequest, GenerationConfig, GeminiClient,
    GenerativeService, ImageConfig, InlineData, Part, TextStream, ThinkingConfig, VideoRequest,
};

const DOCUMENT_FALLBACK: &str = "Could not parse document.";
const PLAN_FALLBACK: &str = "Could not generate plan.";
const VIDEO_RESOLUTION: &str = "720p";

/// One prior turn of a chat, as sent for context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

impl From<&Message> for ChatTurn {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            text: message.text.clone(),
        }
    }
}

impl ChatTurn {
    fn to_content(&self) -> Content {
        let parts = vec![Part::text(self.text.clone())];
        match self.role {
            Role::Assistant => Content::model(parts),
            Role::User | Role::System => Content::user(parts),
        }
    }
}

/// A file submitted for analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInput {
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl DocumentInput {
    /// PDFs and images are sent as inline data; everything else as text.
    pub fn is_binary(&self) -> bool {
        self.mime_type == "application/pdf" || self.mime_type.starts_with("image/")
    }
}

pub struct Assistant {
    service: Arc<dyn GenerativeService>,
    config: GenAiConfig,
}

impl Assistant {
    pub fn new(service: Arc<dyn GenerativeService>, config: GenAiConfig) -> Self {
        Self { service, config }
    }

    /// Assistant backed by the Gemini REST API.
    pub fn from_config(config: &GenAiConfig) -> Result<Self, GenAiError> {
        let client = GeminiClient::new(config)?;
        Ok(Self::new(Arc::new(client), config.clone()))
    }

    pub fn config(&self) -> &GenAiConfig {
        &self.config
    }

    /// Stream a reply to `message` given the prior `history`.
    ///
    /// Attachments are sent inline ahead of the text.
    pub async fn stream_chat(
        &self,
        history: &[ChatTurn],
        message: &str,
        attachments: &[Attachment],
    ) -> Result<TextStream, GenAiError> {
        let mut contents: Vec<Content> = history.iter().map(ChatTurn::to_content).collect();

        let mut parts: Vec<Part> = attachments
            .iter()
            .map(|a| Part::inline(a.mime_type.clone(), a.data.clone()))
            .collect();
        if !message.is_empty() {
            parts.push(Part::text(message));
        }
        contents.push(Content::user(parts));

        let request = GenerateRequest {
            model: self.config.chat_model.clone(),
            contents,
            system_instruction: Some(Content::bare(vec![Part::text(
                self.config.system_instruction.clone(),
            )])),
            generation_config: None,
        };
        debug!(
            turns = history.len(),
            attachments = attachments.len(),
            "starting chat stream"
        );
        self.service.stream_generate(&request).await
    }

    /// Extract the readable content of a document.
    pub async fn parse_document(&self, document: &DocumentInput) -> Result<String, GenAiError> {
        let parts = if document.is_binary() {
            vec![
                Part::inline(document.mime_type.clone(), BASE64.encode(&document.data)),
                Part::text(
                    "Analyze this document. Extract all text content, summarize key points, \
                     and format it cleanly in Markdown.",
                ),
            ]
        } else {
            let text = String::from_utf8_lossy(&document.data);
            vec![Part::text(format!(
                "Analyze the following document ({}). Summarize key points and format it \
                 cleanly in Markdown.\n\n{}",
                document.file_name, text
            ))]
        };

        let request = GenerateRequest {
            model: self.config.document_model.clone(),
            contents: vec![Content::user(parts)],
            ..Default::default()
        };
        let text = self.service.generate(&request).await?.text();
        Ok(non_empty_or(text, DOCUMENT_FALLBACK))
    }

    /// Produce a step-by-step execution plan for a goal.
    pub async fn run_agentic_plan(&self, goal: &str) -> Result<String, GenAiError> {
        let prompt = format!(
            "You are an autonomous agent planner. Break down the following goal into a \
             detailed, step-by-step execution plan. For each step, identify the required \
             resources, potential risks, and success criteria.\n\nGoal: {}",
            goal
        );
        let request = GenerateRequest {
            model: self.config.plan_model.clone(),
            contents: vec![Content::user(vec![Part::text(prompt)])],
            system_instruction: None,
            generation_config: Some(GenerationConfig {
                thinking_config: Some(ThinkingConfig {
                    thinking_budget: self.config.plan_thinking_budget,
                }),
                image_config: None,
            }),
        };
        let text = self.service.generate(&request).await?.text();
        Ok(non_empty_or(text, PLAN_FALLBACK))
    }

    /// Generate `count` images concurrently. Returns data URLs for the
    /// requests that produced an image; failed requests are skipped.
    pub async fn generate_images(
        &self,
        prompt: &str,
        aspect_ratio: &str,
        count: usize,
        reference: Option<&InlineData>,
    ) -> Vec<String> {
        let mut parts = Vec::with_capacity(2);
        if let Some(image) = reference {
            parts.push(Part {
                text: None,
                inline_data: Some(image.clone()),
            });
        }
        parts.push(Part::text(prompt));

        let request = GenerateRequest {
            model: self.config.image_model.clone(),
            contents: vec![Content::user(parts)],
            system_instruction: None,
            generation_config: Some(GenerationConfig {
                thinking_config: None,
                image_config: Some(ImageConfig {
                    aspect_ratio: aspect_ratio.to_string(),
                }),
            }),
        };

        let calls = (0..count).map(|_| self.service.generate(&request));
        let results = futures::future::join_all(calls).await;

        let mut urls = Vec::new();
        for result in results {
            match result {
                Ok(response) => urls.extend(
                    response
                        .inline_data()
                        .into_iter()
                        .map(|d| format!("data:{};base64,{}", d.mime_type, d.data)),
                ),
                Err(e) => warn!("image generation request failed: {}", e),
            }
        }
        info!(requested = count, produced = urls.len(), "image generation finished");
        urls
    }

    /// Submit a video job and poll until it completes. Returns the video URI.
    pub async fn generate_video(
        &self,
        prompt: &str,
        aspect_ratio: &str,
        reference: Option<InlineData>,
    ) -> Result<String, GenAiError> {
        let request = VideoRequest {
            model: self.config.video_model.clone(),
            prompt: prompt.to_string(),
            aspect_ratio: aspect_ratio.to_string(),
            resolution: VIDEO_RESOLUTION.to_string(),
            reference_image: reference,
        };
        let poll_interval = Duration::from_millis(self.config.video_poll_interval_ms);

        let mut operation = self.service.submit_video(&request).await?;
        info!(operation = %operation.name, "video job submitted");
        while !operation.done {
            tokio::time::sleep(poll_interval).await;
            operation = self.service.poll_video(&operation).await?;
            debug!(operation = %operation.name, done = operation.done, "video job polled");
        }

        if let Some(error) = operation.error {
            return Err(GenAiError::Operation(error.message));
        }
        operation.video_uri().ok_or(GenAiError::MissingVideo)
    }
}

fn non_empty_or(text: String, fallback: &str) -> String {
    if text.trim().is_empty() {
        fallback.to_string()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genai::{GenerateResponse, VideoOperation};
    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted service that records requests.
    #[derive(Default)]
    struct ScriptedService {
        reply: String,
        fail_every_other: bool,
        calls: AtomicUsize,
        requests: Mutex<Vec<GenerateRequest>>,
        polls_until_done: usize,
    }

    fn text_response(text: &str) -> GenerateResponse {
        serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": text}]}}]
        }))
        .unwrap()
    }

    #[async_trait]
    impl GenerativeService for ScriptedService {
        async fn generate(
            &self,
            request: &GenerateRequest,
        ) -> Result<GenerateResponse, GenAiError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            if self.fail_every_other && n % 2 == 1 {
                return Err(GenAiError::Api {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            if request
                .generation_config
                .as_ref()
                .and_then(|c| c.image_config.as_ref())
                .is_some()
            {
                return Ok(serde_json::from_value(json!({
                    "candidates": [{"content": {"parts": [
                        {"inlineData": {"mimeType": "image/png", "data": format!("img{n}")}}
                    ]}}]
                }))
                .unwrap());
            }
            Ok(text_response(&self.reply))
        }

        async fn stream_generate(
            &self,
            request: &GenerateRequest,
        ) -> Result<TextStream, GenAiError> {
            self.requests.lock().unwrap().push(request.clone());
            let chunks = vec![Ok("Hel".to_string()), Ok("lo".to_string())];
            Ok(futures::stream::iter(chunks).boxed())
        }

        async fn submit_video(
            &self,
            _request: &VideoRequest,
        ) -> Result<VideoOperation, GenAiError> {
            Ok(serde_json::from_value(json!({"name": "operations/v1"})).unwrap())
        }

        async fn poll_video(
            &self,
            operation: &VideoOperation,
        ) -> Result<VideoOperation, GenAiError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < self.polls_until_done {
                return Ok(operation.clone());
            }
            Ok(serde_json::from_value(json!({
                "name": operation.name,
                "done": true,
                "response": {"generateVideoResponse": {"generatedSamples": [
                    {"video": {"uri": "https://files/clip.mp4"}}
                ]}}
            }))
            .unwrap())
        }
    }

    fn assistant(service: ScriptedService) -> (Assistant, Arc<ScriptedService>) {
        let service = Arc::new(service);
        let config = GenAiConfig {
            video_poll_interval_ms: 1,
            ..Default::default()
        };
        (Assistant::new(service.clone(), config), service)
    }

    #[tokio::test]
    async fn test_stream_chat_sends_history_and_system_instruction() {
        let (assistant, service) = assistant(ScriptedService::default());
        let history = vec![
            ChatTurn {
                role: Role::User,
                text: "hi".to_string(),
            },
            ChatTurn {
                role: Role::Assistant,
                text: "hello".to_string(),
            },
        ];

        let chunks: Vec<String> = assistant
            .stream_chat(&history, "how are you?", &[])
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.concat(), "Hello");

        let requests = service.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.model, "gemini-2.5-flash");
        assert_eq!(request.contents.len(), 3);
        assert_eq!(request.contents[1].role.as_deref(), Some("model"));
        assert_eq!(
            request.contents[2].parts[0].text.as_deref(),
            Some("how are you?")
        );
        assert!(request.system_instruction.is_some());
    }

    #[tokio::test]
    async fn test_parse_document_inlines_pdf_and_falls_back_on_empty() {
        let (assistant, service) = assistant(ScriptedService::default());
        let doc = DocumentInput {
            file_name: "report.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            data: b"%PDF-1.4".to_vec(),
        };

        let text = assistant.parse_document(&doc).await.unwrap();
        assert_eq!(text, DOCUMENT_FALLBACK);

        let requests = service.requests.lock().unwrap();
        let inline = requests[0].contents[0].parts[0].inline_data.as_ref().unwrap();
        assert_eq!(inline.mime_type, "application/pdf");
        assert_eq!(inline.data, BASE64.encode(b"%PDF-1.4"));
    }

    #[tokio::test]
    async fn test_parse_text_document_embeds_content() {
        let (assistant, service) = assistant(ScriptedService {
            reply: "# Notes".to_string(),
            ..Default::default()
        });
        let doc = DocumentInput {
            file_name: "notes.md".to_string(),
            mime_type: "text/markdown".to_string(),
            data: b"quarterly numbers".to_vec(),
        };

        assert_eq!(assistant.parse_document(&doc).await.unwrap(), "# Notes");
        let requests = service.requests.lock().unwrap();
        let prompt = requests[0].contents[0].parts[0].text.as_deref().unwrap();
        assert!(prompt.contains("quarterly numbers"));
        assert!(requests[0].contents[0].parts[0].inline_data.is_none());
    }

    #[tokio::test]
    async fn test_plan_uses_thinking_budget() {
        let (assistant, service) = assistant(ScriptedService {
            reply: "1. Research".to_string(),
            ..Default::default()
        });

        assert_eq!(
            assistant.run_agentic_plan("Launch Q3").await.unwrap(),
            "1. Research"
        );
        let requests = service.requests.lock().unwrap();
        assert_eq!(requests[0].model, "gemini-3-pro-preview");
        let budget = requests[0]
            .generation_config
            .as_ref()
            .and_then(|c| c.thinking_config.as_ref())
            .map(|t| t.thinking_budget);
        assert_eq!(budget, Some(2048));
    }

    #[tokio::test]
    async fn test_generate_images_skips_failed_requests() {
        let (assistant, _service) = assistant(ScriptedService {
            fail_every_other: true,
            ..Default::default()
        });

        let urls = assistant.generate_images("a cat", "1:1", 4, None).await;
        assert_eq!(urls.len(), 2);
        assert!(urls.iter().all(|u| u.starts_with("data:image/png;base64,img")));
    }

    #[tokio::test]
    async fn test_generate_video_polls_until_done() {
        let (assistant, service) = assistant(ScriptedService {
            polls_until_done: 3,
            ..Default::default()
        });

        let uri = assistant.generate_video("waves", "16:9", None).await.unwrap();
        assert_eq!(uri, "https://files/clip.mp4");
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }
}
