//! Document analysis: the latest parsed text, shared between clients.

use hanaxia_protocol::DocUpdatePayload;
use log::{debug, warn};

use super::SharedState;
use crate::genai::{Assistant, DocumentInput, GenAiError};
use crate::sync::{EventBus, Subscription};

pub const PARSE_ERROR_TEXT: &str =
    "Error parsing document. Please try again or ensure the format is supported.";

pub struct DocFeature {
    state: SharedState<Option<String>>,
    bus: EventBus,
    _subscription: Subscription,
}

impl DocFeature {
    pub fn mount(bus: &EventBus) -> Self {
        let state = SharedState::new(None);
        let remote = state.clone();
        let subscription = bus.subscribe::<DocUpdatePayload, _>(move |payload| {
            debug!("Remote document update ({} chars)", payload.text.len());
            remote.update(|text| *text = Some(payload.text.clone()));
        });
        Self {
            state,
            bus: bus.clone(),
            _subscription: subscription,
        }
    }

    /// Latest analysis text, local or remote, if any.
    pub fn text(&self) -> Option<String> {
        self.state.snapshot()
    }

    pub fn state(&self) -> &SharedState<Option<String>> {
        &self.state
    }

    /// Analyze a document and share the result.
    ///
    /// A failed analysis leaves an error notice in place of the text and is
    /// not published.
    pub async fn analyze(
        &self,
        assistant: &Assistant,
        document: &DocumentInput,
    ) -> Result<String, GenAiError> {
        match assistant.parse_document(document).await {
            Ok(text) => {
                self.state.update(|current| *current = Some(text.clone()));
                self.bus.send(DocUpdatePayload { text: text.clone() });
                Ok(text)
            }
            Err(e) => {
                warn!("Failed to analyze {}: {}", document.file_name, e);
                self.state.update(|current| *current = Some(PARSE_ERROR_TEXT.to_string()));
                Err(e)
            }
        }
    }
}
