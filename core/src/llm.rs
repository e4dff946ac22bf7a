//! Single-shot prompt/response interface for chat and summarisation models.
//!
//! Unlike the agent framework's language model trait, this one has no
//! streaming, no tool calls, and no reasoning channel: the memory core
//! only ever needs "send a system+user prompt, get text back." Extraction
//! and merge/add decisions built on top of [`LanguageModel::invoke`] parse
//! that text themselves, because spec-mandated failure handling (treat
//! malformed JSON as "no extraction", treat it as `ADD`, etc.) needs to see
//! the raw response rather than have a schema-validating layer swallow it.

use alloc::{format, string::String, vec::Vec};
use core::future::Future;
use schemars::Schema;

/// Conversation participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Role {
    /// Input from the human user.
    User,
    /// Response from the assistant.
    Assistant,
    /// Context/instructions for the model.
    System,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Message {
    role: Role,
    content: String,
}

impl Message {
    /// Creates a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Creates a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Returns the message's role.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Returns the message's text content.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }
}

/// A prompt sent to a [`LanguageModel`]: an ordered list of messages.
#[derive(Debug, Clone, Default)]
pub struct Prompt {
    /// Messages in conversation order.
    pub messages: Vec<Message>,
}

impl Prompt {
    /// Creates a prompt from an explicit message list.
    #[must_use]
    pub fn new(messages: impl Into<Vec<Message>>) -> Self {
        Self {
            messages: messages.into(),
        }
    }
}

/// Convenience helper that builds a single system + user [`Prompt`].
#[must_use]
pub fn oneshot(system: impl Into<String>, user: impl Into<String>) -> Prompt {
    Prompt::new(alloc::vec![Message::system(system), Message::user(user)])
}

/// Language models used for extraction, summarisation, and merge/add
/// decisions during prospective reflection.
pub trait LanguageModel: Send + Sync {
    /// Sends a prompt and returns the raw text response.
    ///
    /// Callers that expect JSON are responsible for parsing the result and
    /// degrading gracefully on malformed output, per spec.
    fn invoke(&self, prompt: Prompt) -> impl Future<Output = crate::Result<String>> + Send;
}

/// Appends an instruction describing the expected JSON schema to a system
/// prompt, using `schemars` to render the schema for type `T`.
///
/// This mirrors how a structured-output layer would coach a model, but
/// leaves parsing of the (possibly malformed) response to the caller.
#[must_use]
pub fn schema_instruction<T: schemars::JsonSchema>() -> String {
    let schema: Schema = schemars::schema_for!(T);
    let rendered = serde_json::to_string_pretty(&schema).unwrap_or_default();
    format!(
        "You must respond with valid JSON that strictly conforms to the following JSON schema:\n\n\
         {rendered}\n\n\
         Requirements:\n\
         - Your response must be ONLY valid JSON, no additional text, explanations, or markdown\n\
         - All required fields must be present\n\
         - Do not include any text before or after the JSON"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoModel;

    impl LanguageModel for EchoModel {
        async fn invoke(&self, prompt: Prompt) -> crate::Result<String> {
            Ok(prompt
                .messages
                .last()
                .map(|m| m.content().to_string())
                .unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn oneshot_builds_system_then_user() {
        let prompt = oneshot("sys", "usr");
        assert_eq!(prompt.messages.len(), 2);
        assert_eq!(prompt.messages[0].role(), Role::System);
        assert_eq!(prompt.messages[1].role(), Role::User);
    }

    #[tokio::test]
    async fn echo_model_returns_last_message() {
        let model = EchoModel;
        let response = model.invoke(oneshot("sys", "hello")).await.unwrap();
        assert_eq!(response, "hello");
    }
}
