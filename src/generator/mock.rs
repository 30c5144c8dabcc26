/// Mock generation service for testing purposes.
///
/// Replays scripted replies in order, or echoes the `<source>` block of the
/// latest request back inside a closed code envelope. Every conversation it
/// receives is recorded so tests can assert on call counts and prompts.
use std::collections::VecDeque;

use parking_lot::Mutex;

use super::{GenerationError, Message, Role, TextGenerator};

type Responder = Box<dyn Fn(&[Message]) -> Result<String, GenerationError> + Send + Sync>;

enum Mode {
    Scripted(Mutex<VecDeque<Result<String, GenerationError>>>),
    Respond(Responder),
}

pub struct MockGenerator {
    mode: Mode,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl MockGenerator {
    /// Replies are returned in order; once exhausted every call returns an
    /// empty string.
    #[must_use]
    pub fn scripted<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::scripted_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    /// Like [`MockGenerator::scripted`] but allows scripted failures.
    #[must_use]
    pub fn scripted_results<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = Result<String, GenerationError>>,
    {
        Self {
            mode: Mode::Scripted(Mutex::new(replies.into_iter().collect())),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Compute each reply from the conversation.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&[Message]) -> Result<String, GenerationError> + Send + Sync + 'static,
    {
        Self {
            mode: Mode::Respond(Box::new(responder)),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Identity "translation": the `<source>` block of the last user message
    /// comes back as a terminated code section. Requests without a source
    /// block (yes/no questions, summaries) are answered with `no`.
    #[must_use]
    pub fn echo() -> Self {
        Self::with_responder(|conversation| {
            let request = last_user_content(conversation);
            Ok(match source_block(request) {
                Some(source) => format!("<response><code>{source}</code></response>"),
                None => "no".to_string(),
            })
        })
    }

    /// Number of `generate` calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Snapshot of every conversation received, in call order.
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().clone()
    }
}

impl TextGenerator for MockGenerator {
    fn generate(
        &self,
        conversation: &[Message],
        _max_tokens: usize,
    ) -> Result<String, GenerationError> {
        self.calls.lock().push(conversation.to_vec());
        match &self.mode {
            Mode::Scripted(queue) => queue.lock().pop_front().unwrap_or_else(|| Ok(String::new())),
            Mode::Respond(responder) => responder(conversation),
        }
    }

    fn probe(&self) -> Result<(), GenerationError> {
        Ok(())
    }
}

/// Content of the last user message, or `""` when there is none.
pub fn last_user_content(conversation: &[Message]) -> &str {
    conversation
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("")
}

/// Text between the first `<source>` line and the last `</source>` marker.
pub fn source_block(request: &str) -> Option<&str> {
    let start = request.find("<source>\n")? + "<source>\n".len();
    let end = request.rfind("\n</source>")?;
    (end >= start).then(|| &request[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_replays_in_order() {
        let mock = MockGenerator::scripted(["a", "b"]);
        assert_eq!(mock.generate(&[], 10).unwrap(), "a");
        assert_eq!(mock.generate(&[], 10).unwrap(), "b");
        assert_eq!(mock.generate(&[], 10).unwrap(), "");
        assert_eq!(mock.call_count(), 3);
    }

    #[test]
    fn test_scripted_failure() {
        let mock = MockGenerator::scripted_results([Err(GenerationError::Transport(
            "down".to_string(),
        ))]);
        assert!(matches!(
            mock.generate(&[], 10),
            Err(GenerationError::Transport(_))
        ));
    }

    #[test]
    fn test_echo_returns_source() {
        let mock = MockGenerator::echo();
        let request = Message::user("Translate:\n<source>\nclass A {}\n</source>\nthanks");
        let reply = mock.generate(&[request], 10).unwrap();
        assert_eq!(reply, "<response><code>class A {}</code></response>");
    }

    #[test]
    fn test_echo_answers_questions_with_no() {
        let mock = MockGenerator::echo();
        let reply = mock.generate(&[Message::user("Fix these?")], 10).unwrap();
        assert_eq!(reply, "no");
    }

    #[test]
    fn test_records_conversations() {
        let mock = MockGenerator::echo();
        mock.generate(&[Message::system("sys"), Message::user("hi")], 10)
            .unwrap();
        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][0].role, Role::System);
    }
}
