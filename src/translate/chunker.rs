use std::sync::LazyLock;

use regex::Regex;

use crate::config::Settings;
use crate::error::TranslateError;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__CODESHIFT_METHOD_(\d+)__").unwrap());

/// An ordered slice of one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub position: usize,
    /// The slice begins a type/class-like construct.
    pub is_structural_block: bool,
}

/// Block matchers and nesting symbols of the source language.
#[derive(Debug, Clone)]
pub struct BlockSyntax {
    start: Regex,
    end: Regex,
    open: String,
    close: String,
}

impl BlockSyntax {
    pub fn new(start: &str, end: &str, open: &str, close: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            start: Regex::new(start)?,
            end: Regex::new(end)?,
            open: open.to_string(),
            close: close.to_string(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, TranslateError> {
        Self::new(
            &settings.block_start_pattern,
            &settings.block_end_pattern,
            &settings.block_open_symbol,
            &settings.block_close_symbol,
        )
        .map_err(|e| TranslateError::Configuration(format!("invalid block pattern: {e}")))
    }

    /// Brace-style defaults.
    #[must_use]
    pub fn braces() -> Self {
        let settings = Settings::default();
        Self {
            start: Regex::new(&settings.block_start_pattern).unwrap(),
            end: Regex::new(&settings.block_end_pattern).unwrap(),
            open: settings.block_open_symbol,
            close: settings.block_close_symbol,
        }
    }

    pub fn open_symbol(&self) -> &str {
        &self.open
    }

    pub fn close_symbol(&self) -> &str {
        &self.close
    }

    /// Net change in nesting depth contributed by `text`.
    pub fn depth_delta(&self, text: &str) -> isize {
        text.matches(self.open.as_str()).count() as isize
            - text.matches(self.close.as_str()).count() as isize
    }

    /// Whether `line` is the header of a type-like construct.
    pub fn is_block_header(&self, line: &str) -> bool {
        self.start.is_match(line)
    }

    /// Whether `line` opens a body (e.g. contains `{`).
    pub fn opens_block(&self, line: &str) -> bool {
        self.end.is_match(line)
    }

    /// Byte offset just past the last close symbol that returns `text` to
    /// depth zero, or `text.len()` when there is no such point.
    pub fn last_balanced_end(&self, text: &str) -> usize {
        let mut depth: isize = 0;
        let mut last = None;
        let mut i = 0;
        while i < text.len() {
            let rest = &text[i..];
            if rest.starts_with(self.open.as_str()) {
                depth += 1;
                i += self.open.len();
            } else if rest.starts_with(self.close.as_str()) {
                depth -= 1;
                i += self.close.len();
                if depth == 0 {
                    last = Some(i);
                }
            } else {
                i += rest.chars().next().map_or(1, char::len_utf8);
            }
        }
        last.unwrap_or(text.len())
    }
}

/// Partitions source text into chunks bounded by a character budget without
/// ever cutting through an open block.
pub struct ChunkSplitter {
    syntax: BlockSyntax,
    budget: usize,
}

impl ChunkSplitter {
    pub fn new(syntax: BlockSyntax, budget: usize) -> Self {
        Self { syntax, budget }
    }

    pub fn syntax(&self) -> &BlockSyntax {
        &self.syntax
    }

    /// Splits `text` line by line. A chunk is closed once it exceeds the
    /// budget while the nesting depth is zero, so a single block larger than
    /// the budget stays whole. Concatenating the chunks yields `text`.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_len = 0;
        let mut depth: isize = 0;

        for line in text.split_inclusive('\n') {
            current.push_str(line);
            current_len += line.chars().count();
            depth += self.syntax.depth_delta(line);

            if current_len > self.budget && depth == 0 {
                self.push_chunk(&mut chunks, std::mem::take(&mut current));
                current_len = 0;
            }
        }

        if !current.is_empty() {
            self.push_chunk(&mut chunks, current);
        }

        chunks
    }

    fn push_chunk(&self, chunks: &mut Vec<Chunk>, content: String) {
        let is_structural_block = self.starts_structural_block(&content);
        chunks.push(Chunk {
            content,
            position: chunks.len(),
            is_structural_block,
        });
    }

    /// The first line that is not blank, a comment or an annotation must be a
    /// block header, and its body must open on that line or the next.
    fn starts_structural_block(&self, content: &str) -> bool {
        let mut lines = content.lines().map(str::trim).filter(|l| {
            !l.is_empty()
                && !l.starts_with("//")
                && !l.starts_with("/*")
                && !l.starts_with('*')
                && !l.starts_with('@')
                && !l.starts_with('#')
        });
        let Some(header) = lines.next() else {
            return false;
        };
        self.syntax.is_block_header(header)
            && (self.syntax.opens_block(header)
                || lines.next().is_some_and(|next| self.syntax.opens_block(next)))
    }

    /// Separates a class-like chunk into its signature lines and its method
    /// bodies, in original order.
    pub fn split_skeleton(&self, text: &str) -> Skeleton {
        let mut segments: Vec<Segment> = Vec::new();
        let mut depth: isize = 0;
        let mut in_body = false;

        for line in text.split_inclusive('\n') {
            let before = depth;
            depth += self.syntax.depth_delta(line);

            if in_body {
                push_line(&mut segments, SegmentKind::Body, line, false);
                if depth <= 1 {
                    in_body = false;
                }
            } else if before <= 1 && depth >= 2 {
                push_line(&mut segments, SegmentKind::Body, line, true);
                in_body = true;
            } else {
                push_line(&mut segments, SegmentKind::Skeleton, line, false);
            }
        }

        Skeleton { segments }
    }
}

fn push_line(segments: &mut Vec<Segment>, kind: SegmentKind, line: &str, fresh: bool) {
    match segments.last_mut() {
        Some(last) if last.kind == kind && !fresh => last.text.push_str(line),
        _ => segments.push(Segment {
            kind,
            text: line.to_string(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Skeleton,
    Body,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub text: String,
}

/// A class-like chunk split into signature lines and method bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skeleton {
    pub segments: Vec<Segment>,
}

impl Skeleton {
    pub fn bodies(&self) -> impl Iterator<Item = &str> {
        self.segments
            .iter()
            .filter(|s| s.kind == SegmentKind::Body)
            .map(|s| s.text.as_str())
    }

    pub fn has_bodies(&self) -> bool {
        self.bodies().next().is_some()
    }

    /// Signature lines with one placeholder line per method body.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        let mut index = 0;
        for segment in &self.segments {
            match segment.kind {
                SegmentKind::Skeleton => out.push_str(&segment.text),
                SegmentKind::Body => {
                    let indent: String = segment
                        .text
                        .chars()
                        .take_while(|c| *c == ' ' || *c == '\t')
                        .collect();
                    out.push_str(&format!("{indent}__CODESHIFT_METHOD_{index}__\n"));
                    index += 1;
                }
            }
        }
        out
    }

    /// Replaces each placeholder line of a (translated) outline with the
    /// matching (translated) body. Bodies whose placeholder was dropped are
    /// inserted before the outline's final close symbol, or appended.
    pub fn reassemble(&self, outline: &str, bodies: &[String], close_symbol: &str) -> String {
        let mut out = String::new();
        let mut used = vec![false; bodies.len()];

        for line in outline.split_inclusive('\n') {
            let slot = PLACEHOLDER
                .captures(line)
                .and_then(|caps| caps[1].parse::<usize>().ok())
                .filter(|i| *i < bodies.len());
            match slot {
                Some(i) => {
                    out.push_str(&bodies[i]);
                    if !bodies[i].ends_with('\n') && line.ends_with('\n') {
                        out.push('\n');
                    }
                    used[i] = true;
                }
                None => out.push_str(line),
            }
        }

        let missing: String = bodies
            .iter()
            .zip(&used)
            .filter(|(_, used)| !**used)
            .map(|(body, _)| body.as_str())
            .collect();
        if missing.is_empty() {
            return out;
        }

        match out.rfind(close_symbol) {
            Some(at) => {
                out.insert_str(at, &missing);
                out
            }
            None => out + &missing,
        }
    }
}
