//! Request and response shapes of the Gemini REST API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One turn of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts,
        }
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: Some("model".to_string()),
            parts,
        }
    }

    /// Role-less content, as used for system instructions.
    pub fn bare(parts: Vec<Part>) -> Self {
        Self { role: None, parts }
    }
}

/// A text or inline-data part.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    pub fn inline(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.into(),
                data: data.into(),
            }),
        }
    }
}

/// Base64 payload with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// Model name; part of the URL, not the body.
    #[serde(skip)]
    pub model: String,
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<ThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_config: Option<ImageConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    pub thinking_budget: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    pub aspect_ratio: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
}

impl GenerateResponse {
    fn first_parts(&self) -> &[Part] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or(&[])
    }

    /// Concatenated text of the first candidate.
    pub fn text(&self) -> String {
        self.first_parts()
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect()
    }

    /// Inline data parts (generated images) of the first candidate.
    pub fn inline_data(&self) -> Vec<InlineData> {
        self.first_parts()
            .iter()
            .filter_map(|p| p.inline_data.clone())
            .filter(|d| !d.data.is_empty())
            .collect()
    }
}

/// A video generation job request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRequest {
    pub model: String,
    pub prompt: String,
    pub aspect_ratio: String,
    pub resolution: String,
    pub reference_image: Option<InlineData>,
}

/// A long-running operation as returned by submit and poll.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoOperation {
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub error: Option<OperationError>,
}

impl VideoOperation {
    pub fn video_uri(&self) -> Option<String> {
        self.response
            .as_ref()?
            .pointer("/generateVideoResponse/generatedSamples/0/video/uri")?
            .as_str()
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let request = GenerateRequest {
            model: "gemini-2.5-flash".to_string(),
            contents: vec![Content::user(vec![
                Part::inline("image/png", "AAAA"),
                Part::text("describe"),
            ])],
            system_instruction: Some(Content::bare(vec![Part::text("be brief")])),
            generation_config: Some(GenerationConfig {
                thinking_config: Some(ThinkingConfig {
                    thinking_budget: 2048,
                }),
                image_config: None,
            }),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("model").is_none());
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "be brief");
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(
            json["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            2048
        );
    }

    #[test]
    fn test_response_text_and_images() {
        let body = r#"{"candidates":[{"content":{"role":"model","parts":[
            {"text":"Hello, "},{"text":"world"},
            {"inlineData":{"mimeType":"image/png","data":"iVBOR"}}
        ]}}]}"#;
        let response: GenerateResponse = serde_json::from_str(body).unwrap();

        assert_eq!(response.text(), "Hello, world");
        assert_eq!(response.inline_data().len(), 1);
    }

    #[test]
    fn test_response_without_candidates() {
        let response: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(response.text(), "");
        assert!(response.inline_data().is_empty());
    }

    #[test]
    fn test_video_operation_uri() {
        let body = r#"{"name":"models/veo/operations/abc","done":true,"response":{
            "generateVideoResponse":{"generatedSamples":[{"video":{"uri":"https://files/v.mp4"}}]}}}"#;
        let op: VideoOperation = serde_json::from_str(body).unwrap();

        assert!(op.done);
        assert_eq!(op.video_uri().as_deref(), Some("https://files/v.mp4"));
    }

    #[test]
    fn test_pending_operation_defaults() {
        let op: VideoOperation = serde_json::from_str(r#"{"name":"operations/x"}"#).unwrap();
        assert!(!op.done);
        assert!(op.video_uri().is_none());
    }
}
