//! Conversation state shared by the full-screen and plain front ends.

use serde::{Deserialize, Serialize};

use crate::render::RenderSnapshot;
use crate::session::TurnOutcome;

/// Stored in history in place of a response that failed mid-stream.
pub const ERROR_PLACEHOLDER: &str = "[Error during generation]";

/// A chat message in the conversation sent to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub seed: u64,
}

/// A finished turn as it stays on screen.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub prompt: String,
    pub thinking: String,
    pub answer: String,
    pub outcome: TurnOutcome,
}

impl Exchange {
    /// Status line shown under the answer, if the turn needs one.
    pub fn notice(&self) -> Option<String> {
        match &self.outcome {
            TurnOutcome::Cancelled => Some("[Generation cancelled]".to_string()),
            TurnOutcome::Failed(message) => {
                Some(format!("[An error occurred during generation: {}]", message))
            }
            TurnOutcome::Completed { truncated } => {
                let answer_empty = self.answer.trim().is_empty();
                if answer_empty && (*truncated || self.thinking.is_empty()) {
                    Some("[Model stopped before </think> tag or generated empty response]".to_string())
                } else if answer_empty {
                    Some("[Model stopped after </think> tag, ended with newlines]".to_string())
                } else if *truncated {
                    Some("[Response ended inside a thinking block]".to_string())
                } else {
                    None
                }
            }
        }
    }
}

/// What a user line means before it reaches the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Clear,
    Empty,
    Prompt(String),
}

impl Command {
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        let lowered = trimmed.to_lowercase();
        if lowered == "q" || lowered == "quit" {
            Command::Quit
        } else if lowered == "/clear" {
            Command::Clear
        } else if trimmed.is_empty() {
            Command::Empty
        } else {
            Command::Prompt(input.to_string())
        }
    }
}

pub struct Conversation {
    pub settings: GenerationSettings,
    pub history: Vec<ChatMessage>,
    pub transcript: Vec<Exchange>,
    /// Prompt of the turn currently streaming.
    pub pending_prompt: Option<String>,
}

impl Conversation {
    pub fn new(settings: GenerationSettings) -> Self {
        Self {
            settings,
            history: Vec::new(),
            transcript: Vec::new(),
            pending_prompt: None,
        }
    }

    /// Record the user's prompt and return the messages to send.
    pub fn push_prompt(&mut self, prompt: &str) -> &[ChatMessage] {
        self.history.push(ChatMessage {
            role: ChatRole::User,
            content: prompt.to_string(),
        });
        self.pending_prompt = Some(prompt.to_string());
        &self.history
    }

    /// Close the streaming turn. `raw_response` is the model output with its
    /// tags intact, which is what goes back to the model next turn.
    pub fn finish_turn(
        &mut self,
        outcome: TurnOutcome,
        snapshot: &RenderSnapshot,
        raw_response: String,
    ) -> &Exchange {
        let content = match outcome {
            TurnOutcome::Failed(_) => ERROR_PLACEHOLDER.to_string(),
            _ => raw_response,
        };
        self.history.push(ChatMessage {
            role: ChatRole::Assistant,
            content,
        });

        let exchange = Exchange {
            prompt: self.pending_prompt.take().unwrap_or_default(),
            thinking: snapshot.thinking_text.clone(),
            answer: snapshot.answer_text.clone(),
            outcome,
        };
        self.transcript.push(exchange);
        &self.transcript[self.transcript.len() - 1]
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.transcript.clear();
        self.pending_prompt = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> GenerationSettings {
        GenerationSettings {
            model: "qwen3".to_string(),
            max_tokens: 100,
            temperature: 0.6,
            seed: 0,
        }
    }

    fn snapshot(thinking: &str, answer: &str) -> RenderSnapshot {
        RenderSnapshot {
            thinking_text: thinking.to_string(),
            answer_text: answer.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse("q"), Command::Quit);
        assert_eq!(Command::parse(" QUIT "), Command::Quit);
        assert_eq!(Command::parse("/clear"), Command::Clear);
        assert_eq!(Command::parse("   "), Command::Empty);
        assert_eq!(Command::parse("why?"), Command::Prompt("why?".to_string()));
    }

    #[test]
    fn test_turn_history() {
        let mut conversation = Conversation::new(settings());
        assert_eq!(conversation.push_prompt("hi").len(), 1);

        let exchange = conversation.finish_turn(
            TurnOutcome::Completed { truncated: false },
            &snapshot("greet", "Hello!"),
            "<think>greet</think>Hello!".to_string(),
        );
        assert_eq!(exchange.prompt, "hi");
        assert_eq!(exchange.answer, "Hello!");
        assert!(exchange.notice().is_none());

        assert_eq!(conversation.history.len(), 2);
        assert_eq!(conversation.history[1].content, "<think>greet</think>Hello!");
        assert!(conversation.pending_prompt.is_none());
    }

    #[test]
    fn test_failed_turn_stores_placeholder() {
        let mut conversation = Conversation::new(settings());
        conversation.push_prompt("hi");
        let exchange = conversation.finish_turn(
            TurnOutcome::Failed("boom".to_string()),
            &snapshot("", ""),
            "partial".to_string(),
        );
        assert!(exchange.notice().unwrap_or_default().contains("boom"));
        assert_eq!(conversation.history[1].content, ERROR_PLACEHOLDER);
    }

    #[test]
    fn test_empty_answer_notices() {
        let exchange = Exchange {
            prompt: "p".to_string(),
            thinking: "still going".to_string(),
            answer: String::new(),
            outcome: TurnOutcome::Completed { truncated: true },
        };
        assert_eq!(
            exchange.notice().as_deref(),
            Some("[Model stopped before </think> tag or generated empty response]")
        );

        let exchange = Exchange {
            answer: "\n\n".to_string(),
            outcome: TurnOutcome::Completed { truncated: false },
            ..exchange
        };
        assert_eq!(
            exchange.notice().as_deref(),
            Some("[Model stopped after </think> tag, ended with newlines]")
        );
    }

    #[test]
    fn test_roles_serialize_lowercase() {
        let message = ChatMessage {
            role: ChatRole::Assistant,
            content: "ok".to_string(),
        };
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);
    }

    #[test]
    fn test_clear() {
        let mut conversation = Conversation::new(settings());
        conversation.push_prompt("hi");
        conversation.clear();
        assert!(conversation.history.is_empty());
        assert!(conversation.pending_prompt.is_none());
    }
}
