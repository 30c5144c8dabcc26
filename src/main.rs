use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codeshift::config::Settings;
use codeshift::generator::GenerationError;
use codeshift::generator::http::{HttpGenerator, Provider};
use codeshift::pipeline::{
    DirectoryStore, EventSink, Pipeline, ProgressEvent, ProjectResult, ProjectState, RunControl,
    checkpoint,
};
use codeshift::walker::SourceWalker;
use codeshift::TranslateError;
use crossbeam_channel::Receiver;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "codeshift", version, about = "Translate a source tree with a text-generation service")]
struct Cli {
    /// Settings file (YAML). Defaults to settings.yaml.
    #[arg(long, global = true, default_value = "")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Translate every source below --input into --output.
    Run {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Overrides `checkpoint_path` from the settings.
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },
    /// Continue an interrupted run from its checkpoint.
    Resume {
        #[arg(long)]
        output: PathBuf,
        /// Defaults to the root directory recorded in the checkpoint.
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // 1. Load and validate settings
    let settings = Settings::load(&cli.config)?;
    settings.validate()?;

    // 2. Resolve input, output and checkpoint
    let (input, output, checkpoint_path, state) = match cli.command {
        Command::Run {
            input,
            output,
            checkpoint,
        } => {
            let path = checkpoint.unwrap_or_else(|| PathBuf::from(&settings.checkpoint_path));
            (input, output, path, None)
        }
        Command::Resume {
            output,
            input,
            checkpoint,
        } => {
            let path = checkpoint.unwrap_or_else(|| PathBuf::from(&settings.checkpoint_path));
            let state = checkpoint::load(&path)
                .with_context(|| format!("cannot resume from {}", path.display()))?;
            let input = input.unwrap_or_else(|| state.root_directory.clone());
            (input, output, path, Some(state))
        }
    };

    // 3. Collect sources
    let walker = SourceWalker::new(&input, &settings.input_extensions, &settings.exclude_patterns)?;
    let units = walker.collect()?;
    info!("{} source file(s) under {}", units.len(), input.display());

    // 4. Generation service provider
    Provider::parse(&settings.service.provider).map_err(|e| match e {
        GenerationError::Unsupported(provider) => {
            TranslateError::Configuration(format!("unknown provider: {provider}"))
        }
        other => other.into(),
    })?;

    // 5. Cancellation and progress
    let control = RunControl::new();
    {
        let control = control.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current request");
                control.cancel();
            }
        });
    }
    let (events, receiver) = EventSink::channel();
    let renderer = std::thread::spawn(move || render(receiver));

    // 6. Run on the blocking worker; the blocking HTTP client must live there too
    let worker = tokio::task::spawn_blocking(move || -> Result<ProjectResult, TranslateError> {
        let generator = HttpGenerator::from_config(&settings.service)?;
        let store = DirectoryStore::new(output);
        let pipeline = Pipeline::new(&generator, settings, &store)?
            .with_control(control)
            .with_events(events)
            .with_root(input)
            .with_checkpoint(checkpoint_path);
        match state {
            Some(state) => pipeline.resume(state, units),
            None => pipeline.run_project(units),
        }
    });
    let result = worker.await.context("translation worker panicked")??;
    let _ = renderer.join();

    report(&result);
    Ok(())
}

fn render(events: Receiver<ProgressEvent>) {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} {msg}")
            .expect("valid template")
            .progress_chars("█▓░"),
    );

    for event in events {
        match event {
            ProgressEvent::RunStarted {
                total_files,
                skipped,
            } => {
                bar.set_length(total_files as u64);
                bar.set_position(skipped as u64);
            }
            ProgressEvent::FileStarted { path, .. } => bar.set_message(path.display().to_string()),
            ProgressEvent::FileFinished { .. } => bar.inc(1),
            ProgressEvent::RepairAttempt {
                path,
                attempt,
                errors,
            } => bar.set_message(format!(
                "{} (repair {attempt}, {errors} error(s))",
                path.display()
            )),
            ProgressEvent::RewritePass {
                iteration,
                files_changed,
            } => bar.println(format!(
                "cross-file rewrite: {iteration} pass(es), {files_changed} file(s) updated"
            )),
            ProgressEvent::Log(message) => bar.println(message),
            ProgressEvent::RunFinished { .. } => bar.finish_with_message("done"),
            ProgressEvent::ChunkTranslated { .. } | ProgressEvent::CheckpointSaved { .. } => {}
        }
    }
}

fn report(result: &ProjectResult) {
    let ProjectResult {
        clean,
        flagged,
        failed,
        failed_paths,
        state,
        ..
    } = result;

    println!("clean: {clean}, flagged: {flagged}, failed: {failed}");
    for path in failed_paths {
        println!("  failed: {}", path.display());
    }
    if result.cancelled {
        print_resume_hint(state);
    }
}

fn print_resume_hint(state: &ProjectState) {
    println!(
        "cancelled after {} unit(s) ({}%); continue with `codeshift resume --output <dir>`",
        state.files_processed, state.last_progress_percent
    );
}
