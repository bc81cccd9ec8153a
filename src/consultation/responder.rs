//! The patient side of the loop: whoever answers follow-up questions.

use std::collections::VecDeque;

use super::state::ConsultationState;

/// Supplies a free-text reply to each follow-up question.
///
/// This is where the loop suspends. Interactive hosts block on user input
/// here; batch hosts answer from a script.
pub trait Responder {
    fn respond(&mut self, question: &str, state: &ConsultationState) -> String;
}

/// Accepts every proposed phrase, turning the loop into a batch predictor.
#[derive(Debug, Clone, Copy, Default)]
pub struct AffirmingResponder;

impl Responder for AffirmingResponder {
    fn respond(&mut self, _question: &str, _state: &ConsultationState) -> String {
        "yes".to_string()
    }
}

/// Replays canned replies in order, then falls back to a fixed reply.
#[derive(Debug, Clone)]
pub struct ScriptedResponder {
    replies: VecDeque<String>,
    exhausted_reply: String,
    questions: Vec<String>,
}

impl ScriptedResponder {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: replies.into_iter().map(Into::into).collect(),
            exhausted_reply: "no".to_string(),
            questions: Vec::new(),
        }
    }

    /// Answers every question with the same reply.
    pub fn always(reply: impl Into<String>) -> Self {
        Self::new(Vec::<String>::new()).when_exhausted(reply)
    }

    pub fn when_exhausted(mut self, reply: impl Into<String>) -> Self {
        self.exhausted_reply = reply.into();
        self
    }

    /// Questions received so far, in order.
    pub fn questions(&self) -> &[String] {
        &self.questions
    }
}

impl Responder for ScriptedResponder {
    fn respond(&mut self, question: &str, _state: &ConsultationState) -> String {
        self.questions.push(question.to_string());
        self.replies
            .pop_front()
            .unwrap_or_else(|| self.exhausted_reply.clone())
    }
}
