//! Conversation thread state machine.
//!
//! A thread accumulates role-tagged messages. When a new human message
//! arrives and the history *before* it has reached the summary threshold,
//! the turn becomes a summarizing turn: the prior history is distilled
//! into one assistant message, the history is replaced by
//! `[summary, human]`, and the reply is generated from
//! `[system, summary, human]`. Otherwise the reply is generated from
//! `[system, ...history, human]`.
//!
//! This module only decides *which* messages are sent and how the state
//! changes once replies exist. Calling the model, locking, and timeouts
//! are the engine's job (`catalog_rag::conversation`).

use serde::Serialize;

use crate::models::ChatMessage;

/// System prompt prepended to every reply request.
pub const SYSTEM_PROMPT: &str = "You are a helpful assistant. \
Answer all questions to the best of your ability. \
The provided chat history includes a summary of the earlier conversation.";

/// Instruction appended to the history when asking for a summary.
pub const SUMMARY_INSTRUCTION: &str = "Distill the above chat messages into a single summary message. \
Include as many specific details as you can.";

/// Default number of stored messages that triggers summarization.
pub const DEFAULT_SUMMARY_THRESHOLD: usize = 4;

/// Opaque conversation thread identifier.
pub type ThreadId = String;

/// Stored state of one conversation thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThreadState {
    /// Messages in insertion order.
    pub messages: Vec<ChatMessage>,
    /// Text of the latest summary, once one has been produced.
    pub summary: Option<String>,
}

/// What a turn must ask the model.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnPlan {
    /// Reply straight from the full history.
    Direct { request: Vec<ChatMessage> },
    /// Summarize first, then reply from `[system, summary, human]`.
    Summarize { summary_request: Vec<ChatMessage> },
}

impl TurnPlan {
    pub fn is_summarizing(&self) -> bool {
        matches!(self, TurnPlan::Summarize { .. })
    }
}

impl ThreadState {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Decide how to handle `human` given the current history.
    ///
    /// `threshold` is clamped to at least 1.
    pub fn plan_turn(&self, human: &ChatMessage, threshold: usize) -> TurnPlan {
        if self.messages.len() >= threshold.max(1) {
            let mut summary_request = self.messages.clone();
            summary_request.push(ChatMessage::human(SUMMARY_INSTRUCTION));
            TurnPlan::Summarize { summary_request }
        } else {
            let mut request = Vec::with_capacity(self.messages.len() + 2);
            request.push(ChatMessage::system(SYSTEM_PROMPT));
            request.extend(self.messages.iter().cloned());
            request.push(human.clone());
            TurnPlan::Direct { request }
        }
    }

    /// Append the human message and the reply after a direct turn.
    pub fn commit_direct(&mut self, human: ChatMessage, reply: &str) {
        self.messages.push(human);
        self.messages.push(ChatMessage::assistant(reply));
    }

    /// Replace the history with `[summary, human, reply]`.
    pub fn commit_summarized(&mut self, summary: &str, human: ChatMessage, reply: &str) {
        self.messages = vec![
            ChatMessage::assistant(summary),
            human,
            ChatMessage::assistant(reply),
        ];
        self.summary = Some(summary.to_string());
    }
}

/// The reply request of a summarizing turn.
pub fn reply_request_after_summary(summary: &str, human: &ChatMessage) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::assistant(summary),
        human.clone(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn state_with(n: usize) -> ThreadState {
        let mut state = ThreadState::default();
        for i in 0..n {
            if i % 2 == 0 {
                state.messages.push(ChatMessage::human(format!("q{}", i)));
            } else {
                state.messages.push(ChatMessage::assistant(format!("a{}", i)));
            }
        }
        state
    }

    #[test]
    fn test_first_turn_is_direct() {
        let state = ThreadState::default();
        let human = ChatMessage::human("hola");
        match state.plan_turn(&human, DEFAULT_SUMMARY_THRESHOLD) {
            TurnPlan::Direct { request } => {
                assert_eq!(request.len(), 2);
                assert_eq!(request[0].role, Role::System);
                assert_eq!(request[1], human);
            }
            other => panic!("expected direct turn, got {:?}", other),
        }
    }

    #[test]
    fn test_three_prior_messages_do_not_summarize() {
        let state = state_with(3);
        let plan = state.plan_turn(&ChatMessage::human("next"), 4);
        assert!(!plan.is_summarizing());
        if let TurnPlan::Direct { request } = plan {
            assert_eq!(request.len(), 5);
        }
    }

    #[test]
    fn test_four_prior_messages_summarize() {
        let state = state_with(4);
        let plan = state.plan_turn(&ChatMessage::human("next"), 4);
        match plan {
            TurnPlan::Summarize { summary_request } => {
                assert_eq!(summary_request.len(), 5);
                assert_eq!(summary_request[4].content, SUMMARY_INSTRUCTION);
                assert_eq!(summary_request[0].content, "q0");
            }
            other => panic!("expected summarize, got {:?}", other),
        }
    }

    #[test]
    fn test_commit_summarized_replaces_history() {
        let mut state = state_with(4);
        state.commit_summarized("resumen", ChatMessage::human("next"), "reply");
        assert_eq!(state.len(), 3);
        assert_eq!(state.messages[0], ChatMessage::assistant("resumen"));
        assert_eq!(state.messages[1], ChatMessage::human("next"));
        assert_eq!(state.summary.as_deref(), Some("resumen"));
    }

    #[test]
    fn test_commit_direct_appends_pair() {
        let mut state = state_with(2);
        state.commit_direct(ChatMessage::human("q"), "a");
        assert_eq!(state.len(), 4);
        assert_eq!(state.messages[3].role, Role::Assistant);
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        let plan = ThreadState::default().plan_turn(&ChatMessage::human("x"), 0);
        assert!(!plan.is_summarizing());
    }

    #[test]
    fn test_reply_request_after_summary_shape() {
        let req = reply_request_after_summary("s", &ChatMessage::human("h"));
        let roles: Vec<Role> = req.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::Assistant, Role::Human]);
    }
}
