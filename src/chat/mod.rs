//! AI marketing-operations assistant

pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use openai::OpenAiChat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Reply used when the provider answers without any content
pub const EMPTY_REPLY_FALLBACK: &str =
    "I apologize, but I was unable to generate a response. Please try again.";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("conversation must contain at least one user or assistant message")]
    EmptyConversation,
    #[error("Failed to get AI response. Please check your connection and try again.")]
    Unavailable(#[source] anyhow::Error),
}

/// Chat-completion provider: ordered messages in, one assistant reply out
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError>;
}

pub const MARKETING_SYSTEM_PROMPT: &str = "You are MopsAgent, an expert AI assistant specializing in Marketing Operations (Marketing Ops). You help marketing professionals optimize their operations, automate workflows, and make data-driven decisions.

Your expertise includes:
- Campaign optimization and performance analysis
- Lead scoring and management systems
- Customer segmentation and targeting strategies
- Marketing automation and workflow design
- Attribution modeling and analytics
- Email marketing optimization
- Conversion funnel analysis
- Marketing technology stack optimization
- Data integration and reporting
- ROI measurement and optimization

Guidelines for responses:
1. Always provide actionable, practical advice
2. Focus on measurable outcomes and KPIs
3. Suggest specific tools, techniques, or strategies when relevant
4. Break down complex concepts into clear, implementable steps
5. Ask clarifying questions when needed to provide better guidance
6. Use marketing terminology appropriately but explain complex concepts
7. Provide examples and use cases when helpful
8. Consider both short-term tactics and long-term strategy

Keep responses conversational, professional, and focused on helping the user achieve their marketing operations goals.";

/// The provider-bound conversation: the fixed system prompt followed by the
/// client's user/assistant turns. Client-supplied system messages are dropped.
pub fn build_conversation(messages: &[ChatMessage]) -> Result<Vec<ChatMessage>, ChatError> {
    let turns: Vec<ChatMessage> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .cloned()
        .collect();

    if turns.is_empty() {
        return Err(ChatError::EmptyConversation);
    }

    let mut conversation = Vec::with_capacity(turns.len() + 1);
    conversation.push(ChatMessage::new(Role::System, MARKETING_SYSTEM_PROMPT));
    conversation.extend(turns);
    Ok(conversation)
}
