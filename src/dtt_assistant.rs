// Transport assistant: forwards free-text questions to a hosted completion
// model, grounded on the route catalog.
//
// The assistant never surfaces an error to the UI. Every failure collapses to
// one of the fixed fallback replies below.

use crate::dtt_config::{AppConfig, AssistantConfig};
use crate::dtt_models::{ChatMessage, ChatRole, DTTError, Result, Route};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use reqwest::blocking;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const FALLBACK_NO_KEY: &str = "Please configure your API Key to use the AI Assistant.";
pub const FALLBACK_EMPTY: &str = "I'm having trouble connecting to the schedule database right now.";
pub const FALLBACK_OFFLINE: &str = "Sorry, I'm currently offline. Please check the schedule manually.";

/// A hosted text-completion model.
pub trait CompletionBackend: Send + Sync {
    /// `Ok(None)` means the call succeeded but produced no text.
    fn complete(&self, system_instruction: &str, query: &str) -> Result<Option<String>>;
}

// ============================================================================
// Gemini backend
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn text(&self) -> Option<String> {
        let text: String = self
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| content.parts.iter().filter_map(|p| p.text.as_deref()).collect())
            .unwrap_or_default();
        if text.trim().is_empty() { None } else { Some(text) }
    }
}

pub struct GeminiBackend {
    client: blocking::Client,
    url: String,
    api_key: String,
}

impl GeminiBackend {
    pub fn new(config: &AssistantConfig, api_key: String) -> Result<Self> {
        let client = blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| DTTError::NetworkError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(GeminiBackend {
            client,
            url: format!(
                "{}/{}:generateContent",
                config.endpoint.trim_end_matches('/'),
                config.model_id
            ),
            api_key,
        })
    }
}

impl CompletionBackend for GeminiBackend {
    fn complete(&self, system_instruction: &str, query: &str) -> Result<Option<String>> {
        let body = GenerateRequest {
            system_instruction: Content { role: None, parts: vec![Part { text: system_instruction }] },
            contents: vec![Content { role: Some("user"), parts: vec![Part { text: query }] }],
        };

        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .map_err(|e| DTTError::NetworkError(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(DTTError::NetworkError(format!("HTTP {}", response.status())));
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| DTTError::NetworkError(format!("Failed to parse response: {}", e)))?;
        Ok(parsed.text())
    }
}

// ============================================================================
// Assistant
// ============================================================================

#[derive(Clone)]
pub struct Assistant {
    backend: Option<Arc<dyn CompletionBackend>>,
    routes: Vec<Route>,
    tz: Tz,
}

impl Assistant {
    pub fn new(backend: Option<Arc<dyn CompletionBackend>>, routes: Vec<Route>, tz: Tz) -> Self {
        Assistant { backend, routes, tz }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let backend: Option<Arc<dyn CompletionBackend>> = match config.assistant.api_key.clone() {
            Some(key) => Some(Arc::new(GeminiBackend::new(&config.assistant, key)?)),
            None => {
                log::warn!("No assistant API key configured; chat replies will use the fallback");
                None
            }
        };
        Ok(Self::new(backend, config.routes.clone(), config.tz()?))
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    pub fn route_context(routes: &[Route]) -> String {
        routes
            .iter()
            .map(|r| format!("{} (stops: {})", r.name, r.stops.join(", ")))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn system_instruction(&self, now: DateTime<Utc>) -> String {
        format!(
            "You are DIU Bot, the transport assistant for Daffodil International University.\n\
             Answer questions about bus routes, stops, schedules and travel times.\n\n\
             Routes currently operated:\n{}\n\n\
             Local time: {}\n\n\
             Keep answers short and friendly. If a place is not on any route, say that it is \
             not covered yet. Assume normal traffic unless told otherwise and stay on transport topics.",
            Self::route_context(&self.routes),
            now.with_timezone(&self.tz).format("%H:%M")
        )
    }

    /// One question, one reply. Never fails.
    pub fn respond(&self, query: &str) -> String {
        let Some(backend) = &self.backend else {
            return FALLBACK_NO_KEY.to_string();
        };

        match backend.complete(&self.system_instruction(Utc::now()), query) {
            Ok(Some(text)) => text,
            Ok(None) => FALLBACK_EMPTY.to_string(),
            Err(e) => {
                log::error!("Assistant request failed: {}", e);
                FALLBACK_OFFLINE.to_string()
            }
        }
    }
}

/// Transcript of one chat session.
#[derive(Debug, Clone, Default)]
pub struct ChatSession {
    messages: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn push(&mut self, role: ChatRole, text: impl Into<String>) -> &ChatMessage {
        self.messages.push(ChatMessage::new(role, text));
        &self.messages[self.messages.len() - 1]
    }

    /// Records the question and the reply, returning the reply
    pub fn ask(&mut self, assistant: &Assistant, query: &str) -> &ChatMessage {
        self.push(ChatRole::User, query);
        let reply = assistant.respond(query);
        self.push(ChatRole::Model, reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtt_models::DEFAULT_ROUTES;
    use std::sync::Mutex;

    struct FakeBackend {
        reply: Result<Option<String>>,
        seen: Mutex<Vec<(String, String)>>,
    }

    impl FakeBackend {
        fn new(reply: Result<Option<String>>) -> Arc<Self> {
            Arc::new(FakeBackend { reply, seen: Mutex::new(Vec::new()) })
        }
    }

    impl CompletionBackend for FakeBackend {
        fn complete(&self, system_instruction: &str, query: &str) -> Result<Option<String>> {
            self.seen.lock().unwrap().push((system_instruction.to_string(), query.to_string()));
            match &self.reply {
                Ok(reply) => Ok(reply.clone()),
                Err(e) => Err(DTTError::NetworkError(e.to_string())),
            }
        }
    }

    fn assistant(backend: Option<Arc<dyn CompletionBackend>>) -> Assistant {
        Assistant::new(backend, DEFAULT_ROUTES.clone(), chrono_tz::Asia::Dhaka)
    }

    #[test]
    fn missing_key_uses_the_configure_fallback() {
        assert_eq!(assistant(None).respond("When is the next bus?"), FALLBACK_NO_KEY);
    }

    #[test]
    fn replies_pass_through_and_are_grounded_on_routes() {
        let backend = FakeBackend::new(Ok(Some("Every 20 minutes.".to_string())));
        let bot = assistant(Some(backend.clone()));

        assert_eq!(bot.respond("How often to Savar?"), "Every 20 minutes.");
        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].1, "How often to Savar?");
        assert!(seen[0].0.contains("DSC - Savar (stops: DSC, Khagan, Savar)"));
    }

    #[test]
    fn empty_and_failed_calls_use_fixed_fallbacks() {
        let empty = assistant(Some(FakeBackend::new(Ok(None))));
        assert_eq!(empty.respond("hi"), FALLBACK_EMPTY);

        let failing = assistant(Some(FakeBackend::new(Err(DTTError::NetworkError("timeout".to_string())))));
        assert_eq!(failing.respond("hi"), FALLBACK_OFFLINE);
    }

    #[test]
    fn route_context_lists_one_route_per_line() {
        let context = Assistant::route_context(&DEFAULT_ROUTES);
        assert_eq!(context.lines().count(), DEFAULT_ROUTES.len());
        assert!(context.starts_with("DSC - Mirpur (stops: DSC, Birulia, Mirpur 1, Mirpur 10)"));
    }

    #[test]
    fn session_records_both_sides() {
        let mut session = ChatSession::default();
        let reply = session.ask(&assistant(None), "Is R6 running?").text.clone();
        assert_eq!(reply, FALLBACK_NO_KEY);
        let roles: Vec<ChatRole> = session.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![ChatRole::User, ChatRole::Model]);
    }

    #[test]
    fn response_text_joins_parts_and_treats_blank_as_missing() {
        let parsed: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Take "},{"text":"R2."}]}}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.text().as_deref(), Some("Take R2."));

        let blank: GenerateResponse =
            serde_json::from_str(r#"{"candidates":[{"content":{"parts":[{"text":"  "}]}}]}"#).unwrap();
        assert!(blank.text().is_none());
        assert!(GenerateResponse::default().text().is_none());
    }

    #[test]
    fn request_body_uses_camel_case_keys() {
        let body = GenerateRequest {
            system_instruction: Content { role: None, parts: vec![Part { text: "sys" }] },
            contents: vec![Content { role: Some("user"), parts: vec![Part { text: "q" }] }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "sys");
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["contents"][0]["role"], "user");
    }
}
