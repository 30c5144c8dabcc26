/// Project orchestration.
///
/// Files are translated one at a time on a single worker: split, translate
/// every chunk, reassemble, verify and repair. Once every file has its
/// first-pass output the symbol index is built and the cross-file rewrite
/// runs to a fixed point. Progress leaves the worker only as
/// [`ProgressEvent`]s; cancellation and pause enter only through
/// [`RunControl`].
pub mod checkpoint;
pub mod control;
pub mod events;
pub mod store;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use self::checkpoint::ProjectState;
pub use self::control::RunControl;
pub use self::events::{EventSink, ProgressEvent};
pub use self::store::{DirectoryStore, MemoryStore, OutputStore};

use crate::config::Settings;
use crate::error::TranslateError;
use crate::generator::TextGenerator;
use crate::symbols::{CrossFileRewriter, RewriteReport, SymbolIndex, SymbolIndexer};
use crate::translate::session::system_prompt;
use crate::translate::{
    BlockSyntax, Chunk, ChunkSplitter, ConversationHistory, ResponseParser, SessionOptions,
    TranslationSession,
};
use crate::verify::{RepairEngine, SyntaxError, SyntaxVerifier, verifier_for};

const META_SUMMARY_LIMIT: usize = 4000;

// ── Types ────────────────────────────────────────────────────────────

/// One source file, addressed relative to the input root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    pub path: PathBuf,
    pub content: String,
}

impl SourceUnit {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOutcome {
    /// Translated and parses.
    Clean,
    /// Saved as best effort: syntax errors remain or a chunk was incomplete.
    Flagged,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TranslatedFile {
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    pub content: String,
    pub outcome: FileOutcome,
    /// Verifier errors left after repair.
    pub errors: Vec<SyntaxError>,
    pub incomplete_chunks: usize,
    pub repair_attempts: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectResult {
    pub clean: usize,
    pub flagged: usize,
    pub failed: usize,
    pub failed_paths: Vec<PathBuf>,
    /// Outcome per source path translated in this invocation.
    pub outcomes: BTreeMap<PathBuf, FileOutcome>,
    pub rewrite: Option<RewriteReport>,
    pub state: ProjectState,
    pub cancelled: bool,
}

impl ProjectResult {
    fn count(&mut self, path: &Path, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Clean => self.clean += 1,
            FileOutcome::Flagged => self.flagged += 1,
            FileOutcome::Failed => {
                self.failed += 1;
                self.failed_paths.push(path.to_path_buf());
            }
        }
        self.outcomes.insert(path.to_path_buf(), outcome);
    }
}

/// A unit of work: one source, or several small ones merged.
#[derive(Debug, Clone)]
struct WorkUnit {
    source: SourceUnit,
    members: Vec<PathBuf>,
}

// ── Pipeline ─────────────────────────────────────────────────────────

pub struct Pipeline<'a, G: TextGenerator + ?Sized> {
    generator: &'a G,
    settings: Settings,
    syntax: BlockSyntax,
    parser: ResponseParser,
    verifier: Box<dyn SyntaxVerifier>,
    store: &'a dyn OutputStore,
    control: RunControl,
    events: EventSink,
    root: PathBuf,
    checkpoint_path: Option<PathBuf>,
}

impl<'a, G: TextGenerator + ?Sized> Pipeline<'a, G> {
    /// Validates `settings` and picks the grammar verifier for the target
    /// language.
    pub fn new(
        generator: &'a G,
        settings: Settings,
        store: &'a dyn OutputStore,
    ) -> Result<Self, TranslateError> {
        settings.validate()?;
        let syntax = BlockSyntax::from_settings(&settings)?;
        let parser = ResponseParser::new(&settings.opening_tag, &settings.closing_tag);
        let verifier = verifier_for(&settings.language());

        Ok(Self {
            generator,
            settings,
            syntax,
            parser,
            verifier,
            store,
            control: RunControl::new(),
            events: EventSink::disabled(),
            root: PathBuf::new(),
            checkpoint_path: None,
        })
    }

    pub fn with_verifier(mut self, verifier: Box<dyn SyntaxVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_control(mut self, control: RunControl) -> Self {
        self.control = control;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Persist [`ProjectState`] here after every file.
    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    /// Translates one file without touching the store.
    pub fn translate_file(&self, path: &Path, content: &str) -> Result<TranslatedFile, TranslateError> {
        self.translate_unit(&SourceUnit::new(path, content), "")
    }

    /// Translates every file from scratch.
    pub fn run_project(
        &self,
        files: impl IntoIterator<Item = SourceUnit>,
    ) -> Result<ProjectResult, TranslateError> {
        self.run(ProjectState::new(self.root.clone()), files)
    }

    /// Continues a run, skipping the first `files_processed` units in path
    /// order. Outputs of skipped units are read back from the store for the
    /// cross-file pass.
    pub fn resume(
        &self,
        state: ProjectState,
        files: impl IntoIterator<Item = SourceUnit>,
    ) -> Result<ProjectResult, TranslateError> {
        info!(
            "resuming {} after {} processed unit(s)",
            state.root_directory.display(),
            state.files_processed
        );
        self.run(state, files)
    }

    fn run(
        &self,
        state: ProjectState,
        files: impl IntoIterator<Item = SourceUnit>,
    ) -> Result<ProjectResult, TranslateError> {
        self.generator.probe()?;

        let mut sources: Vec<SourceUnit> = files.into_iter().collect();
        sources.sort_by(|a, b| a.path.cmp(&b.path));
        let units = if self.settings.merge_small_files {
            merge_small_units(sources, self.settings.small_file_threshold)
        } else {
            sources
                .into_iter()
                .map(|source| WorkUnit {
                    members: vec![source.path.clone()],
                    source,
                })
                .collect()
        };

        let total = units.len();
        let skip = state.files_processed.min(total);
        let mut result = ProjectResult {
            state,
            ..ProjectResult::default()
        };
        self.events.emit(ProgressEvent::RunStarted {
            total_files: total,
            skipped: skip,
        });
        info!("translating {} of {total} unit(s)", total - skip);

        let mut outputs: BTreeMap<PathBuf, String> = BTreeMap::new();

        for (index, unit) in units.iter().enumerate().skip(skip) {
            if let Err(TranslateError::Cancelled) = self.control.checkpoint() {
                result.cancelled = true;
                break;
            }

            let path = &unit.source.path;
            self.events.emit(ProgressEvent::FileStarted {
                path: path.clone(),
                index,
                total,
            });

            let meta = result.state.meta_summary.clone();
            let (outcome, output) = match self.translate_unit(&unit.source, &meta) {
                Ok(file) => {
                    self.store.write(&file.output_path, &file.content)?;
                    if self.settings.include_meta {
                        self.extend_meta(&mut result.state, &file);
                    }
                    outputs.insert(file.output_path.clone(), file.content);
                    (file.outcome, Some(file.output_path))
                }
                Err(TranslateError::Cancelled) => {
                    result.cancelled = true;
                    break;
                }
                Err(e) => {
                    warn!("{} failed: {e}", path.display());
                    self.events.log(format!("{} failed: {e}", path.display()));
                    (FileOutcome::Failed, None)
                }
            };

            for member in &unit.members {
                result.count(member, outcome);
            }
            result.state.record(&unit.members, output.as_deref(), total);
            self.save_checkpoint(&result.state)?;
            self.events.emit(ProgressEvent::FileFinished {
                path: path.clone(),
                outcome,
                percent: result.state.last_progress_percent,
            });
        }

        if result.cancelled {
            info!(
                "run cancelled after {} of {total} unit(s)",
                result.state.files_processed
            );
        } else {
            self.restore_earlier_outputs(&result.state, &mut outputs);
            result.rewrite = Some(self.cross_file_pass(&mut result.state, &mut outputs)?);
            self.save_checkpoint(&result.state)?;
        }

        self.events.emit(ProgressEvent::RunFinished {
            clean: result.clean,
            flagged: result.flagged,
            failed: result.failed,
        });
        Ok(result)
    }

    // ── Per file ─────────────────────────────────────────────────────

    fn session(&self) -> TranslationSession<'a, G> {
        TranslationSession::new(
            self.generator,
            self.parser.clone(),
            self.syntax.clone(),
            SessionOptions::from_settings(&self.settings),
        )
    }

    fn history(&self) -> ConversationHistory {
        ConversationHistory::new(
            system_prompt(&self.settings.target_language),
            self.settings.history_limit,
        )
    }

    fn translate_unit(&self, unit: &SourceUnit, meta: &str) -> Result<TranslatedFile, TranslateError> {
        let session = self.session();
        let mut history = self.history();
        let splitter = ChunkSplitter::new(self.syntax.clone(), self.settings.max_chunk_size);
        let context = (self.settings.include_meta && !meta.trim().is_empty()).then_some(meta);

        let chunks = splitter.split(&unit.content);
        debug!("{}: {} chunk(s)", unit.path.display(), chunks.len());

        let mut pieces = Vec::with_capacity(chunks.len());
        let mut incomplete_chunks = 0;
        for chunk in &chunks {
            self.control.checkpoint()?;
            match self.translate_chunk(&session, &mut history, &splitter, chunk, context) {
                Ok(code) => pieces.push(code),
                Err(TranslateError::IncompleteTranslation { attempts, partial }) => {
                    warn!(
                        "{} chunk {} incomplete after {attempts} attempt(s), keeping {} chars",
                        unit.path.display(),
                        chunk.position,
                        partial.len()
                    );
                    incomplete_chunks += 1;
                    pieces.push(partial);
                }
                Err(e) => return Err(e),
            }
            self.events.emit(ProgressEvent::ChunkTranslated {
                path: unit.path.clone(),
                chunk: chunk.position + 1,
                chunks: chunks.len(),
            });
        }

        let code = assemble(&chunks, &pieces);
        let (content, errors, repair_attempts) =
            self.verify_and_repair(&session, &mut history, &unit.path, code)?;

        let outcome = if errors.is_empty() && incomplete_chunks == 0 {
            FileOutcome::Clean
        } else {
            FileOutcome::Flagged
        };
        if !errors.is_empty() {
            let err = TranslateError::RepairBudgetExhausted {
                attempts: repair_attempts,
                errors: errors.clone(),
            };
            warn!("{}: {err}", unit.path.display());
        }

        Ok(TranslatedFile {
            source_path: unit.path.clone(),
            output_path: output_path_for(&unit.path, &self.settings.output_extension),
            content,
            outcome,
            errors,
            incomplete_chunks,
            repair_attempts,
        })
    }

    fn translate_chunk(
        &self,
        session: &TranslationSession<'a, G>,
        history: &mut ConversationHistory,
        splitter: &ChunkSplitter,
        chunk: &Chunk,
        context: Option<&str>,
    ) -> Result<String, TranslateError> {
        let prompt = &self.settings.prompt;
        let oversized = chunk.content.chars().count() > self.settings.class_structure_threshold;
        if !(chunk.is_structural_block && oversized) {
            return session.translate(history, prompt, &chunk.content, context);
        }

        let skeleton = splitter.split_skeleton(&chunk.content);
        if !skeleton.has_bodies() {
            return session.translate(history, prompt, &chunk.content, context);
        }

        debug!("chunk {} translated as skeleton + methods", chunk.position);
        let outline_prompt = format!(
            "{prompt}\n\nThis is the outline of a type. Lines such as __CODESHIFT_METHOD_0__ stand \
             for method bodies; copy each of them unchanged on its own line."
        );
        // Incomplete pieces are still reassembled so no body goes missing;
        // the chunk as a whole is then reported incomplete.
        let mut incomplete = None;
        let outline = match session.translate(history, &outline_prompt, &skeleton.outline(), context) {
            Ok(code) => code,
            Err(TranslateError::IncompleteTranslation { attempts, partial }) => {
                incomplete = Some(attempts);
                partial
            }
            Err(e) => return Err(e),
        };

        let mut bodies = Vec::new();
        for body in skeleton.bodies() {
            self.control.checkpoint()?;
            match session.translate(history, prompt, body, context) {
                Ok(code) => bodies.push(code),
                Err(TranslateError::IncompleteTranslation { attempts, partial }) => {
                    incomplete = incomplete.max(Some(attempts));
                    bodies.push(partial);
                }
                Err(e) => return Err(e),
            }
        }

        let code = skeleton.reassemble(&outline, &bodies, splitter.syntax().close_symbol());
        match incomplete {
            Some(attempts) => Err(TranslateError::IncompleteTranslation {
                attempts,
                partial: code,
            }),
            None => Ok(code),
        }
    }

    /// Whole-file fix loop around the repair engine. Before each attempt the
    /// service is asked whether the reported errors need fixing at all.
    fn verify_and_repair(
        &self,
        session: &TranslationSession<'a, G>,
        history: &mut ConversationHistory,
        path: &Path,
        mut code: String,
    ) -> Result<(String, Vec<SyntaxError>, usize), TranslateError> {
        let mut errors = self.verifier.verify(&code);
        let engine = RepairEngine::new(session, self.verifier.as_ref(), self.settings.max_repair_depth);
        let mut attempts = 0;

        for attempt in 1..=self.settings.max_fix_attempts {
            if errors.is_empty() {
                break;
            }
            self.control.checkpoint()?;
            self.events.emit(ProgressEvent::RepairAttempt {
                path: path.to_path_buf(),
                attempt,
                errors: errors.len(),
            });

            let answer = session.ask(history, &self.needs_fixing_question(&errors))?;
            if !answer_is_yes(&answer) {
                info!(
                    "{}: service considers {} error(s) spurious, keeping output",
                    path.display(),
                    errors.len()
                );
                break;
            }

            let outcome = engine.repair(history, &code, &errors, 0)?;
            attempts += outcome.attempts;
            code = outcome.code;
            errors = outcome.errors;
            if outcome.attempts == 0 {
                debug!("{}: no locatable errors left to repair", path.display());
                break;
            }
        }

        Ok((code, errors, attempts))
    }

    fn needs_fixing_question(&self, errors: &[SyntaxError]) -> String {
        let list: String = errors.iter().map(|e| format!("- {e}\n")).collect();
        format!(
            "The {} parser reports these errors in the translated file:\n{list}\nDo these \
             errors need fixing? Answer yes or no.",
            self.settings.target_language
        )
    }

    fn extend_meta(&self, state: &mut ProjectState, file: &TranslatedFile) {
        let question = format!(
            "In one line, summarize the types and public functions declared in this translated \
             file:\n{}",
            file.content
        );
        let summary = match self.session().ask(&self.history(), &question) {
            Ok(summary) => summary,
            Err(e) => {
                warn!("meta summary for {} failed: {e}", file.source_path.display());
                return;
            }
        };
        let line = summary.lines().next().unwrap_or_default().trim();
        if line.is_empty() {
            return;
        }
        state
            .meta_summary
            .push_str(&format!("{}: {line}\n", file.output_path.display()));
        trim_meta(&mut state.meta_summary, META_SUMMARY_LIMIT);
    }

    // ── Across files ─────────────────────────────────────────────────

    fn restore_earlier_outputs(&self, state: &ProjectState, outputs: &mut BTreeMap<PathBuf, String>) {
        for output in state.file_names.values() {
            if outputs.contains_key(output) {
                continue;
            }
            match self.store.read(output) {
                Ok(content) => {
                    outputs.insert(output.clone(), content);
                }
                Err(e) => warn!("cannot read earlier output {}: {e}", output.display()),
            }
        }
    }

    fn cross_file_pass(
        &self,
        state: &mut ProjectState,
        outputs: &mut BTreeMap<PathBuf, String>,
    ) -> Result<RewriteReport, TranslateError> {
        let language = self.settings.language();
        let indexer =
            SymbolIndexer::for_language(&language).with_source_roots(&self.settings.source_roots);
        let mut index = SymbolIndex::new();

        for (path, code) in outputs.iter() {
            let generated = if self.settings.use_generated_names {
                self.generated_name(&indexer, path, code)
            } else {
                None
            };
            index.insert(indexer.entry(path, code, generated.as_deref()));
        }
        info!(
            "indexed {} symbol(s), {} rename(s)",
            index.len(),
            index.renames().count()
        );

        if self.settings.use_generated_names {
            self.rename_outputs(&index, state, outputs)?;
        }

        let rewriter =
            CrossFileRewriter::for_language(&index, &language, self.settings.max_rewrite_iterations)
                .with_source_roots(&self.settings.source_roots);
        let report = rewriter.rewrite_all(outputs);
        self.events.emit(ProgressEvent::RewritePass {
            iteration: report.iterations,
            files_changed: report.files_changed.len(),
        });

        for path in &report.files_changed {
            if let Some(content) = outputs.get(path) {
                self.store.write(path, content)?;
            }
        }
        Ok(report)
    }

    fn generated_name(&self, indexer: &SymbolIndexer, path: &Path, code: &str) -> Option<String> {
        let current = indexer.primary_name(code, path);
        let question = format!(
            "Suggest an idiomatic {} name for the type `{current}` declared below. Reply with the \
             identifier only.\n\n{code}",
            self.settings.target_language
        );
        match self.session().ask(&self.history(), &question) {
            Ok(reply) => {
                let parsed = self.parser.parse(&reply);
                let name = if parsed.code.is_empty() { reply } else { parsed.code };
                Some(name.trim().trim_matches('`').to_string())
            }
            Err(e) => {
                warn!("name suggestion for {} failed: {e}", path.display());
                None
            }
        }
    }

    /// Moves renamed outputs so the file stem matches the new type name.
    fn rename_outputs(
        &self,
        index: &SymbolIndex,
        state: &mut ProjectState,
        outputs: &mut BTreeMap<PathBuf, String>,
    ) -> Result<(), TranslateError> {
        for entry in index.renames() {
            let old = &entry.source_path;
            let new = old.with_file_name(format!(
                "{}{}",
                entry.new_name,
                dotted(&self.settings.output_extension)
            ));
            if outputs.contains_key(&new) {
                warn!("{} already exists, keeping {}", new.display(), old.display());
                continue;
            }
            let Some(content) = outputs.remove(old) else {
                continue;
            };
            self.store.write(&new, &content)?;
            self.store.remove(old)?;
            outputs.insert(new.clone(), content);

            for output in state.file_names.values_mut() {
                if *output == *old {
                    *output = new.clone();
                }
            }
            debug!("renamed {} -> {}", old.display(), new.display());
        }
        Ok(())
    }

    fn save_checkpoint(&self, state: &ProjectState) -> Result<(), TranslateError> {
        let Some(path) = &self.checkpoint_path else {
            return Ok(());
        };
        checkpoint::save(path, state)?;
        self.events.emit(ProgressEvent::CheckpointSaved {
            files_processed: state.files_processed,
        });
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Keeps the source's relative directory and swaps the extension.
pub fn output_path_for(path: &Path, extension: &str) -> PathBuf {
    path.with_extension(extension.trim_start_matches('.'))
}

fn dotted(extension: &str) -> String {
    format!(".{}", extension.trim_start_matches('.'))
}

/// Concatenates translated pieces in chunk order. The only text added is a
/// line break the source chunk ended with and its translation dropped.
fn assemble(chunks: &[Chunk], pieces: &[String]) -> String {
    let mut out = String::new();
    for (chunk, piece) in chunks.iter().zip(pieces) {
        out.push_str(piece);
        if chunk.content.ends_with('\n') && !piece.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

/// `yes` unless the reply clearly starts with `no`.
pub fn answer_is_yes(reply: &str) -> bool {
    let reply = reply
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .to_ascii_lowercase();
    let word: String = reply.chars().take_while(|c| c.is_alphanumeric()).collect();
    word != "no"
}

fn trim_meta(meta: &mut String, limit: usize) {
    while meta.len() > limit {
        match meta.find('\n') {
            Some(end) => {
                meta.drain(..=end);
            }
            None => {
                meta.clear();
            }
        }
    }
}

/// Consecutive small sources in the same directory become one unit that
/// keeps the first member's path.
fn merge_small_units(sources: Vec<SourceUnit>, threshold: usize) -> Vec<WorkUnit> {
    let mut units: Vec<WorkUnit> = Vec::new();
    let mut open = false;

    for source in sources {
        let small = source.content.chars().count() < threshold;
        let mergeable = open
            && small
            && units
                .last()
                .is_some_and(|u| u.source.path.parent() == source.path.parent());

        if mergeable {
            if let Some(unit) = units.last_mut() {
                if !unit.source.content.ends_with('\n') {
                    unit.source.content.push('\n');
                }
                unit.source.content.push_str(&source.content);
                unit.members.push(source.path);
            }
            continue;
        }

        open = small;
        units.push(WorkUnit {
            members: vec![source.path.clone()],
            source,
        });
    }

    if units.iter().any(|u| u.members.len() > 1) {
        debug!(
            "merged small files into {} unit(s)",
            units.iter().filter(|u| u.members.len() > 1).count()
        );
    }
    units
}
