// Sidebot Engine — Chat Session
//
// An explicit session object owning its message history, toolbox and
// transport; no process-wide state. One session handles one conversation.
// `ask` takes `&mut self`, so a second submission cannot start while a turn
// is in flight: single-flight per session is enforced by the borrow checker
// rather than a runtime guard.

use crate::orchestrator::perform_query;
use crate::providers::AnyProvider;
use crate::toolbox::Toolbox;
use crate::types::{ChatFragment, Message, MessageContent, Role};
use futures::Stream;
use log::info;

pub struct ChatSession {
    provider: AnyProvider,
    model: String,
    toolbox: Toolbox,
    history: Vec<Message>,
}

impl ChatSession {
    pub fn new(provider: AnyProvider, model: impl Into<String>, toolbox: Toolbox) -> Self {
        ChatSession {
            provider,
            model: model.into(),
            toolbox,
            history: Vec::new(),
        }
    }

    /// Seed the system prompt. Call before the first turn.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.history.push(Message::text(Role::System, prompt));
        self
    }

    /// Seed an assistant greeting so the conversation opens the way the
    /// dashboard's chat panel presents it.
    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.history.push(Message::text(Role::Assistant, greeting));
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn toolbox(&self) -> &Toolbox {
        &self.toolbox
    }

    /// Run one user turn, streaming fragments back as they arrive. The
    /// returned stream borrows the session; it is lazy, runs once, and is
    /// not resumable after completion.
    pub fn ask(
        &mut self,
        input: impl Into<MessageContent>,
    ) -> impl Stream<Item = ChatFragment> + '_ {
        info!("[engine] New turn on session (model={})", self.model);
        perform_query(
            &mut self.history,
            input,
            &self.toolbox,
            &self.provider,
            &self.model,
        )
    }
}
