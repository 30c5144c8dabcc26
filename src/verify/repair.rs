use tracing::{debug, info, warn};

use super::{SyntaxError, SyntaxVerifier};
use crate::error::TranslateError;
use crate::generator::TextGenerator;
use crate::translate::{ConversationHistory, TranslationSession};

const CONTEXT_LINES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOutcome {
    /// Best code seen: fewest errors, earliest on ties.
    pub code: String,
    pub errors: Vec<SyntaxError>,
    /// Fix requests sent to the service.
    pub attempts: usize,
    /// Stopped because the depth bound was reached.
    pub exhausted: bool,
}

impl RepairOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Asks for localized line fixes, re-verifies after each one and recurses on
/// what is left, never deeper than `max_depth`.
pub struct RepairEngine<'s, 'g, G: TextGenerator + ?Sized> {
    session: &'s TranslationSession<'g, G>,
    verifier: &'s dyn SyntaxVerifier,
    max_depth: usize,
}

struct Progress {
    best_code: String,
    best_errors: Vec<SyntaxError>,
    attempts: usize,
    exhausted: bool,
}

impl Progress {
    fn consider(&mut self, code: &str, errors: &[SyntaxError]) {
        if errors.len() < self.best_errors.len() {
            self.best_code = code.to_string();
            self.best_errors = errors.to_vec();
        }
    }
}

impl<'s, 'g, G: TextGenerator + ?Sized> RepairEngine<'s, 'g, G> {
    pub fn new(
        session: &'s TranslationSession<'g, G>,
        verifier: &'s dyn SyntaxVerifier,
        max_depth: usize,
    ) -> Self {
        Self {
            session,
            verifier,
            max_depth,
        }
    }

    pub fn repair(
        &self,
        history: &mut ConversationHistory,
        code: &str,
        errors: &[SyntaxError],
        depth: usize,
    ) -> Result<RepairOutcome, TranslateError> {
        let mut progress = Progress {
            best_code: code.to_string(),
            best_errors: errors.to_vec(),
            attempts: 0,
            exhausted: false,
        };

        self.repair_at(history, code.to_string(), errors.to_vec(), depth, &mut progress)?;

        Ok(RepairOutcome {
            code: progress.best_code,
            errors: progress.best_errors,
            attempts: progress.attempts,
            exhausted: progress.exhausted,
        })
    }

    fn repair_at(
        &self,
        history: &mut ConversationHistory,
        mut code: String,
        errors: Vec<SyntaxError>,
        depth: usize,
        progress: &mut Progress,
    ) -> Result<(), TranslateError> {
        if errors.is_empty() {
            return Ok(());
        }
        if depth >= self.max_depth {
            info!(
                "repair budget exhausted at depth {depth} with {} error(s)",
                errors.len()
            );
            progress.exhausted = true;
            return Ok(());
        }

        let mut remaining = errors.clone();
        let mut substituted = false;

        // Bottom-up, so a multi-line replacement never shifts a line that is
        // still waiting for its fix.
        let mut ordered = errors;
        ordered.sort_by(|a, b| b.line_number.cmp(&a.line_number));

        for error in &ordered {
            let Some(index) = line_index(&code, error.line_number) else {
                debug!("skipping unlocatable error: {error}");
                continue;
            };

            let offending = code.split_inclusive('\n').nth(index).unwrap_or_default();
            let prompt = self.fix_prompt(error);
            let context = surrounding_lines(&code, index);

            progress.attempts += 1;
            let replacement = match self.session.translate(
                history,
                &prompt,
                offending.trim_end_matches(['\r', '\n']),
                Some(&context),
            ) {
                Ok(replacement) => replacement,
                Err(TranslateError::IncompleteTranslation { .. }) => {
                    warn!("no usable fix for {error}");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if replacement.trim().is_empty() {
                continue;
            }

            code = substitute_line(&code, index, &replacement);
            substituted = true;
            remaining = self.verifier.verify(&code);
            progress.consider(&code, &remaining);
            if remaining.is_empty() {
                debug!("repaired at depth {depth}");
                return Ok(());
            }
        }

        if !substituted {
            return Ok(());
        }
        self.repair_at(history, code, remaining, depth + 1, progress)
    }

    fn fix_prompt(&self, error: &SyntaxError) -> String {
        format!(
            "The {} parser rejected line {}: {}. Rewrite only the offending line, or the \
             smallest construct containing it, so that the code parses. Reply with the \
             replacement for that line only.",
            self.session.options().target_language,
            error.line_number,
            error.message
        )
    }
}

/// 0-based index of a 1-based line number, if it is inside `code`.
fn line_index(code: &str, line_number: i64) -> Option<usize> {
    if line_number < 1 {
        return None;
    }
    let index = (line_number - 1) as usize;
    (index < code.split_inclusive('\n').count()).then_some(index)
}

fn surrounding_lines(code: &str, index: usize) -> String {
    let start = index.saturating_sub(CONTEXT_LINES);
    code.lines()
        .enumerate()
        .skip(start)
        .take(index - start + CONTEXT_LINES + 1)
        .map(|(i, line)| format!("{:>4} | {line}\n", i + 1))
        .collect()
}

/// Replaces line `index` with `replacement`, keeping the original line
/// ending and, when the replacement has none, its indentation.
fn substitute_line(code: &str, index: usize, replacement: &str) -> String {
    let mut out = String::with_capacity(code.len() + replacement.len());
    for (i, line) in code.split_inclusive('\n').enumerate() {
        if i != index {
            out.push_str(line);
            continue;
        }
        let body = line.trim_end_matches(['\r', '\n']);
        let ending = &line[body.len()..];
        let replacement = replacement.trim_end_matches(['\r', '\n']);
        if !replacement.starts_with([' ', '\t']) {
            let indent: String = body.chars().take_while(|c| *c == ' ' || *c == '\t').collect();
            out.push_str(&indent);
            out.push_str(replacement.trim_start());
        } else {
            out.push_str(replacement);
        }
        out.push_str(ending);
    }
    out
}
