//! OpenAI-compatible chat assistant.

use std::fmt::Write as _;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shellgate_core::{
    Assistant, AssistantError, AssistantRequest, AssistantRequestKind, AssistantResponse,
};

/// Longest captured output forwarded as context, in characters.
const CONTEXT_OUTPUT_CHARS: usize = 2000;

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpAssistantConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
}

/// Assistant backed by a `/chat/completions` endpoint.
pub struct HttpAssistant {
    client: reqwest::Client,
    config: HttpAssistantConfig,
}

impl HttpAssistant {
    /// Create a new assistant client.
    #[must_use]
    pub fn new(config: HttpAssistantConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Assistant for HttpAssistant {
    async fn request(&self, request: AssistantRequest) -> Result<AssistantResponse, AssistantError> {
        let body = json!({
            "model": self.config.model,
            "temperature": 0.2,
            "messages": [
                { "role": "system", "content": system_prompt(request.kind) },
                { "role": "user", "content": user_message(&request) },
            ],
        });

        let mut builder = self.client.post(self.url()).json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AssistantError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(%status, "Assistant endpoint returned an error");
            return Err(AssistantError::RequestFailed(format!("{status}: {text}")));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| AssistantError::InvalidResponse(e.to_string()))?;

        let content = completion
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AssistantError::InvalidResponse("empty completion".to_string()))?;

        let command = match request.kind {
            AssistantRequestKind::NaturalLanguage => extract_command(&content, true),
            AssistantRequestKind::ErrorAnalysis => extract_command(&content, false),
            AssistantRequestKind::Explain | AssistantRequestKind::Chat => None,
        };

        Ok(AssistantResponse {
            kind: request.kind.response_kind(),
            content,
            command,
        })
    }
}

const fn system_prompt(kind: AssistantRequestKind) -> &'static str {
    match kind {
        AssistantRequestKind::NaturalLanguage => {
            "Translate the request into a single shell command. Reply with the command in a fenced code block and nothing else."
        }
        AssistantRequestKind::ErrorAnalysis => {
            "Explain briefly why the last shell command failed. If a corrected command exists, give it in a fenced code block."
        }
        AssistantRequestKind::Explain => "Explain what the given shell command does, concisely.",
        AssistantRequestKind::Chat => "You are a helpful assistant inside a command shell.",
    }
}

fn user_message(request: &AssistantRequest) -> String {
    let mut message = request.query.clone();
    if let Some(dir) = &request.context.working_directory {
        let _ = write!(message, "\n\nWorking directory: {}", dir.display());
    }
    if let Some(last) = &request.context.last_result {
        let _ = write!(
            message,
            "\n\nLast command: {}\nExit code: {}",
            last.command, last.exit_code
        );
        if !last.stdout.is_empty() {
            let _ = write!(message, "\nstdout:\n{}", truncate(&last.stdout));
        }
        if !last.stderr.is_empty() {
            let _ = write!(message, "\nstderr:\n{}", truncate(&last.stderr));
        }
    }
    message
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(CONTEXT_OUTPUT_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Pull a command out of an assistant reply.
///
/// Prefers the first fenced code block. With `allow_bare`, a reply that is a
/// single line is taken as the command itself.
#[must_use]
pub fn extract_command(content: &str, allow_bare: bool) -> Option<String> {
    if let Some(start) = content.find("```") {
        let after_fence = &content[start + 3..];
        // Skip the language tag on the opening fence line.
        let body_start = after_fence.find('\n').map_or(0, |i| i + 1);
        let body = &after_fence[body_start..];
        let body = body.find("```").map_or(body, |end| &body[..end]);
        let command = body.trim();
        if !command.is_empty() {
            return Some(command.to_string());
        }
    }

    if allow_bare {
        let trimmed = content.trim().trim_matches('`').trim();
        if !trimmed.is_empty() && !trimmed.contains('\n') {
            return Some(trimmed.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use shellgate_core::{AssistantContext, AssistantResponseKind};
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, path},
    };

    use super::*;

    #[test]
    fn test_extract_from_fenced_block() {
        let reply = "Use this:\n```bash\nls -la | grep foo\n```\nDone.";
        assert_eq!(extract_command(reply, false).as_deref(), Some("ls -la | grep foo"));
    }

    #[test]
    fn test_extract_bare_single_line() {
        assert_eq!(extract_command("`du -sh .`", true).as_deref(), Some("du -sh ."));
        assert_eq!(extract_command("du -sh .", false), None);
        assert_eq!(extract_command("first line\nsecond line", true), None);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long = "é".repeat(CONTEXT_OUTPUT_CHARS + 5);
        assert_eq!(truncate(&long).chars().count(), CONTEXT_OUTPUT_CHARS);
    }

    #[tokio::test]
    async fn test_natural_language_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": "```sh\nfind . -name '*.rs'\n```" } }]
            })))
            .mount(&server)
            .await;

        let assistant = HttpAssistant::new(HttpAssistantConfig {
            endpoint: server.uri(),
            api_key: Some("sk-test".to_string()),
            model: "test-model".to_string(),
        });

        let response = assistant
            .request(AssistantRequest {
                kind: AssistantRequestKind::NaturalLanguage,
                query: "list rust files".to_string(),
                context: AssistantContext::default(),
            })
            .await
            .unwrap();

        assert_eq!(response.kind, AssistantResponseKind::Command);
        assert_eq!(response.command.as_deref(), Some("find . -name '*.rs'"));
    }

    #[tokio::test]
    async fn test_endpoint_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let assistant = HttpAssistant::new(HttpAssistantConfig {
            endpoint: server.uri(),
            api_key: None,
            model: "test-model".to_string(),
        });

        let err = assistant
            .request(AssistantRequest {
                kind: AssistantRequestKind::Chat,
                query: "hi".to_string(),
                context: AssistantContext::default(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AssistantError::RequestFailed(msg) if msg.contains("boom")));
    }
}
