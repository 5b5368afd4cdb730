//! Stateful text chat with the Chef Dee-Lite persona.

use tracing::{debug, warn};

use super::{Content, GenerateRequest, GenerativeClient, Part};
use crate::error::Result;

pub const CHEF_SYSTEM_INSTRUCTION: &str = "You are \"Chef Dee-Lite\", a fun, encouraging, and expert \
cooking assistant for a teenage home cook making recipes from their leftovers.
- Keep answers concise, energetic, and helpful.
- Use emojis occasionally.
- If they ask about safety (knives, heat), be serious but supportive.
- You know about the flavor profiles: Sweet, Sour, and Salty.";

/// Multi-turn conversation. A failed turn leaves the history untouched so
/// the user can simply ask again.
#[derive(Debug, Clone)]
pub struct ChefChat {
    client: GenerativeClient,
    system_instruction: String,
    history: Vec<Content>,
}

impl ChefChat {
    pub fn new(client: GenerativeClient) -> Self {
        Self::with_instruction(client, CHEF_SYSTEM_INSTRUCTION)
    }

    pub fn with_instruction(client: GenerativeClient, system_instruction: impl Into<String>) -> Self {
        Self {
            client,
            system_instruction: system_instruction.into(),
            history: Vec::new(),
        }
    }

    fn request_for(&self, message: &str) -> GenerateRequest {
        let mut contents = self.history.clone();
        contents.push(Content::user(vec![Part::text(message)]));
        GenerateRequest {
            contents,
            system_instruction: Some(Content::system(self.system_instruction.clone())),
            generation_config: None,
        }
    }

    /// Send one user message and return the reply.
    pub async fn send(&mut self, message: &str) -> Result<String> {
        let request = self.request_for(message);
        match self.client.generate(&request).await {
            Ok(reply) => {
                self.commit(message, &reply);
                debug!(turns = self.turns(), "chat turn committed");
                Ok(reply)
            }
            Err(e) => {
                warn!("chat turn failed: {e}");
                Err(e)
            }
        }
    }

    fn commit(&mut self, message: &str, reply: &str) {
        self.history.push(Content::user(vec![Part::text(message)]));
        self.history.push(Content::model_text(reply));
    }

    pub fn history(&self) -> &[Content] {
        &self.history
    }

    /// Completed user/model exchanges.
    pub fn turns(&self) -> usize {
        self.history.len() / 2
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}
