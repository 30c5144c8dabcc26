use std::collections::VecDeque;

use tracing::{debug, info, warn};

use super::chunker::BlockSyntax;
use super::response::ResponseParser;
use crate::config::Settings;
use crate::error::TranslateError;
use crate::generator::{Message, Role, TextGenerator};

/// Role-tagged messages exchanged for one file, bounded in length.
///
/// When the bound is exceeded the oldest non-system entry is evicted.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: VecDeque<Message>,
    limit: usize,
}

impl ConversationHistory {
    pub fn new(system_prompt: impl Into<String>, limit: usize) -> Self {
        let mut messages = VecDeque::new();
        messages.push_back(Message::system(system_prompt));
        Self { messages, limit }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push_back(message);
        while self.messages.len() > self.limit {
            let Some(oldest) = self.messages.iter().position(|m| m.role != Role::System) else {
                break;
            };
            self.messages.remove(oldest);
        }
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// History followed by `extra`, ready to send.
    pub fn conversation_with(&self, extra: impl IntoIterator<Item = Message>) -> Vec<Message> {
        self.messages.iter().cloned().chain(extra).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drops everything but system messages.
    pub fn clear(&mut self) {
        self.messages.retain(|m| m.role == Role::System);
    }
}

/// Standard system prompt for a translation conversation.
pub fn system_prompt(target_language: &str) -> String {
    format!(
        "You translate source code into {target_language}. Preserve behavior, structure and \
         naming. Never add commentary outside the requested response envelope."
    )
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub target_language: String,
    pub max_tokens: usize,
    /// How many times a whole chunk may be requested again from scratch.
    pub max_redo_attempts: usize,
    /// Upper bound on continuation rounds per attempt.
    pub max_continuations: usize,
    /// Record each completed exchange in the history.
    pub remember: bool,
}

impl SessionOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            target_language: settings.target_language.clone(),
            max_tokens: settings.max_tokens,
            max_redo_attempts: settings.max_redo_attempts,
            max_continuations: settings.max_continuations,
            remember: true,
        }
    }
}

enum Completion {
    Done(String),
    Stalled(String),
}

/// Wraps a generation service with the truncated-response continuation
/// protocol. Each `translate` call returns one complete chunk.
pub struct TranslationSession<'a, G: TextGenerator + ?Sized> {
    generator: &'a G,
    parser: ResponseParser,
    syntax: BlockSyntax,
    options: SessionOptions,
}

impl<'a, G: TextGenerator + ?Sized> TranslationSession<'a, G> {
    pub fn new(
        generator: &'a G,
        parser: ResponseParser,
        syntax: BlockSyntax,
        options: SessionOptions,
    ) -> Self {
        Self {
            generator,
            parser,
            syntax,
            options,
        }
    }

    pub fn from_settings(generator: &'a G, settings: &Settings) -> Result<Self, TranslateError> {
        Ok(Self::new(
            generator,
            ResponseParser::new(&settings.opening_tag, &settings.closing_tag),
            BlockSyntax::from_settings(settings)?,
            SessionOptions::from_settings(settings),
        ))
    }

    pub fn parser(&self) -> &ResponseParser {
        &self.parser
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Translates one chunk.
    ///
    /// Truncated replies are continued until a reply closes the code section
    /// or stops adding code. A stalled attempt is redone from scratch up to
    /// `max_redo_attempts` times before failing with
    /// [`TranslateError::IncompleteTranslation`]. Service errors propagate
    /// immediately.
    pub fn translate(
        &self,
        history: &mut ConversationHistory,
        prompt: &str,
        chunk: &str,
        context: Option<&str>,
    ) -> Result<String, TranslateError> {
        let mut best = String::new();
        let attempts = self.options.max_redo_attempts + 1;

        for attempt in 0..attempts {
            let request = Message::user(self.build_request(prompt, chunk, context, attempt > 0));
            match self.complete(history, &request)? {
                Completion::Done(code) => {
                    if self.options.remember {
                        history.push(request);
                        history.push(Message::assistant(self.envelope(&code)));
                    }
                    return Ok(code);
                }
                Completion::Stalled(partial) => {
                    warn!(
                        "translation stalled on attempt {}/{attempts} ({} chars)",
                        attempt + 1,
                        partial.len()
                    );
                    if partial.len() > best.len() {
                        best = partial;
                    }
                }
            }
        }

        Err(TranslateError::IncompleteTranslation {
            attempts,
            partial: best,
        })
    }

    /// One-shot question without the continuation protocol; returns the raw
    /// reply.
    pub fn ask(&self, history: &ConversationHistory, question: &str) -> Result<String, TranslateError> {
        let conversation = history.conversation_with([Message::user(question)]);
        Ok(self
            .generator
            .generate(&conversation, self.options.max_tokens)?)
    }

    fn complete(
        &self,
        history: &ConversationHistory,
        request: &Message,
    ) -> Result<Completion, TranslateError> {
        let conversation = history.conversation_with([request.clone()]);
        let reply = self
            .generator
            .generate(&conversation, self.options.max_tokens)?;

        let first = self.parser.parse(&reply);
        let mut code = first.code;
        if first.terminated {
            return Ok(Completion::Done(code));
        }
        if code.is_empty() {
            return Ok(Completion::Stalled(code));
        }

        for round in 1..=self.options.max_continuations {
            // Progress is measured against the untruncated text: a reply that
            // only restores the discarded tail adds nothing.
            let reached = code.len();
            code.truncate(self.syntax.last_balanced_end(&code));
            debug!(
                "continuation round {round}, resuming after {} of {reached} chars",
                code.len()
            );

            let conversation = history.conversation_with([
                request.clone(),
                Message::assistant(format!("{}{code}", self.parser.opening_tag())),
                Message::user(self.continuation_request(&code)),
            ]);
            let reply = self
                .generator
                .generate(&conversation, self.options.max_tokens)?;

            let next = self.parser.parse_continuation(&reply);
            code.push_str(&next.code);
            if next.terminated {
                info!("chunk completed after {round} continuation(s)");
                return Ok(Completion::Done(code));
            }
            if code.len() <= reached {
                debug!("continuation round {round} added no new code");
                return Ok(Completion::Stalled(code));
            }
        }

        Ok(Completion::Stalled(code))
    }

    fn build_request(&self, prompt: &str, chunk: &str, context: Option<&str>, redo: bool) -> String {
        let mut out = String::new();
        if redo {
            out.push_str(
                "Discard any partial output from earlier attempts and translate the whole \
                 source again from the beginning.\n\n",
            );
        }
        out.push_str(prompt.trim());
        out.push_str(&format!(
            "\n\nTarget language: {}\n",
            self.options.target_language
        ));
        if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
            out.push_str(&format!("\nContext:\n{}\n", context.trim_end()));
        }
        out.push_str(&format!("\n<source>\n{chunk}\n</source>\n\n"));
        out.push_str(&format!(
            "Reply with exactly one envelope: <response>{}translated code{}<rationale>optional notes</rationale></response>",
            self.parser.opening_tag(),
            self.parser.closing_tag()
        ));
        out
    }

    fn continuation_request(&self, code: &str) -> String {
        format!(
            "Your previous reply was cut off before {close}. The translated code so far ends \
             exactly here:\n<partial>\n{code}\n</partial>\n\nContinue immediately after that \
             point without repeating anything, and finish with {close}.",
            close = self.parser.closing_tag()
        )
    }

    fn envelope(&self, code: &str) -> String {
        format!(
            "<response>{}{code}{}</response>",
            self.parser.opening_tag(),
            self.parser.closing_tag()
        )
    }
}
