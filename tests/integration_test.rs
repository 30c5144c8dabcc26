/// End-to-end integration tests for the codeshift pipeline.
///
/// Tests the complete flow:
///   Walker → Pipeline (chunk → translate → verify/repair) → Index → Rewrite → Store
use codeshift::TranslateError;
use codeshift::config::Settings;
use codeshift::generator::mock::{MockGenerator, last_user_content, source_block};
use codeshift::generator::{GenerationError, Message, TextGenerator};
use codeshift::pipeline::{
    DirectoryStore, EventSink, FileOutcome, MemoryStore, OutputStore, Pipeline, ProgressEvent,
    ProjectState, SourceUnit, checkpoint,
};
use codeshift::walker::SourceWalker;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn java_settings() -> Settings {
    Settings {
        target_language: "java".to_string(),
        output_extension: ".java".to_string(),
        prompt: "Translate this code to idiomatic Java.".to_string(),
        ..Settings::default()
    }
}

/// Full run: walk a directory → translate → fix namespaces → write outputs + checkpoint
#[test]
fn test_full_project_run() {
    // 1. Source tree
    let temp_dir = tempdir().unwrap();
    let input = temp_dir.path().join("input");
    let output = temp_dir.path().join("output");
    fs::create_dir_all(input.join("com/acme")).unwrap();

    fs::write(
        input.join("com/acme/Account.java"),
        "package legacy;\n\npublic class Account {\n    private int balance;\n}\n",
    )
    .unwrap();
    fs::write(
        input.join("com/acme/Ledger.java"),
        "package com.acme;\n\npublic class Ledger {\n    Account main;\n}\n",
    )
    .unwrap();
    fs::write(input.join("Main.java"), "public class Main {\n}\n").unwrap();
    fs::write(input.join("notes.txt"), "not a source").unwrap();

    // 2. Walk
    let settings = java_settings();
    let walker =
        SourceWalker::new(&input, &settings.input_extensions, &settings.exclude_patterns).unwrap();
    let units = walker.collect().unwrap();
    assert_eq!(units.len(), 3, "Should find 3 java sources");

    // 3. Run
    let checkpoint_path = temp_dir.path().join("state/checkpoint.json");
    let mock = MockGenerator::echo();
    let store = DirectoryStore::new(&output);
    let (events, receiver) = EventSink::channel();
    let pipeline = Pipeline::new(&mock, settings, &store)
        .unwrap()
        .with_root(&input)
        .with_events(events)
        .with_checkpoint(&checkpoint_path);

    let result = pipeline.run_project(units).unwrap();
    drop(pipeline);

    assert_eq!(result.clean, 3, "Every file should translate cleanly");
    assert_eq!(result.flagged, 0);
    assert_eq!(result.failed, 0);
    assert!(result.rewrite.as_ref().unwrap().converged);

    // 4. Outputs keep their directories; the package follows the directory
    let account = fs::read_to_string(output.join("com/acme/Account.java")).unwrap();
    assert!(account.starts_with("package com.acme;"));
    assert!(output.join("Main.java").exists());

    // 5. Checkpoint reflects the finished run
    let state = checkpoint::load(&checkpoint_path).unwrap();
    assert_eq!(state.files_processed, 3);
    assert_eq!(state.last_progress_percent, 100);
    assert_eq!(state.root_directory, input);

    // 6. Events arrived in order
    let events: Vec<ProgressEvent> = receiver.try_iter().collect();
    assert!(matches!(
        events.first(),
        Some(ProgressEvent::RunStarted {
            total_files: 3,
            skipped: 0
        })
    ));
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::RunFinished {
            clean: 3,
            flagged: 0,
            failed: 0
        })
    ));
}

/// Resume with 3 of 5 processed translates exactly the remaining 2
#[test]
fn test_resume_translates_remaining_files() {
    let sources: Vec<SourceUnit> = (1..=5)
        .map(|i| {
            SourceUnit::new(
                format!("F{i}.java"),
                format!("public class F{i} {{\n    int v = {i};\n}}\n"),
            )
        })
        .collect();

    // Outputs of the first run are already in the store
    let store = MemoryStore::new();
    let mut state = ProjectState::new("/project");
    for unit in &sources[..3] {
        store.write(&unit.path, &unit.content).unwrap();
        state.record(&[unit.path.clone()], Some(unit.path.as_path()), 5);
    }
    assert_eq!(state.files_processed, 3);

    let mock = MockGenerator::echo();
    let pipeline = Pipeline::new(&mock, java_settings(), &store).unwrap();
    let result = pipeline.resume(state, sources.into_iter().rev()).unwrap();

    assert_eq!(mock.call_count(), 2, "Only the remaining files are requested");
    let translated: Vec<&PathBuf> = result.outcomes.keys().collect();
    assert_eq!(
        translated,
        vec![&PathBuf::from("F4.java"), &PathBuf::from("F5.java")]
    );
    let requested: Vec<String> = mock
        .calls()
        .iter()
        .filter_map(|c| source_block(last_user_content(c)).map(str::to_string))
        .collect();
    assert!(requested[0].contains("class F4"));
    assert!(requested[1].contains("class F5"));

    assert_eq!(result.state.files_processed, 5);
    assert_eq!(result.state.file_names.len(), 5);
    assert_eq!(store.len(), 5);
}

/// Generated names rename the output file and every reference to the type
#[test]
fn test_generated_names_rewrite_references() {
    let mock = MockGenerator::with_responder(|conversation| {
        let request = last_user_content(conversation);
        if request.starts_with("Suggest an idiomatic") {
            let current = request.split('`').nth(1).unwrap_or_default();
            let name = if current == "OldName" { "NewName" } else { current };
            return Ok(name.to_string());
        }
        Ok(match source_block(request) {
            Some(source) => format!("<response><code>{source}</code></response>"),
            None => "no".to_string(),
        })
    });

    let mut settings = java_settings();
    settings.use_generated_names = true;
    let store = MemoryStore::new();
    let pipeline = Pipeline::new(&mock, settings, &store).unwrap();

    let result = pipeline
        .run_project([
            SourceUnit::new(
                "lib/OldName.java",
                "package lib;\n\npublic class OldName {\n    public static void start() {}\n}\n",
            ),
            SourceUnit::new(
                "app/Main.java",
                "package app;\n\nimport lib.OldName;\n\npublic class Main {\n    void run() {\n        OldName.start();\n    }\n}\n",
            ),
        ])
        .unwrap();
    assert_eq!(result.clean, 2);

    let files = store.snapshot();
    assert!(!files.contains_key(Path::new("lib/OldName.java")));
    let renamed = &files[Path::new("lib/NewName.java")];
    assert!(renamed.contains("public class NewName"));

    let main = &files[Path::new("app/Main.java")];
    assert!(main.contains("import lib.NewName;"));
    assert!(main.contains("NewName.start();"));
    assert!(!main.contains("OldName"));

    assert_eq!(
        result.state.file_names[Path::new("lib/OldName.java")],
        PathBuf::from("lib/NewName.java")
    );
}

/// A conventional source root does not leak into package names, and imports
/// follow a type whose package was corrected
#[test]
fn test_packages_below_source_root() {
    let mock = MockGenerator::echo();
    let store = MemoryStore::new();
    let pipeline = Pipeline::new(&mock, java_settings(), &store).unwrap();

    let result = pipeline
        .run_project([
            SourceUnit::new(
                "src/main/java/com/acme/Ledger.java",
                "package com.acme;\n\nimport legacy.Invoice;\n\npublic class Ledger {\n    Invoice last;\n}\n",
            ),
            SourceUnit::new(
                "src/main/java/com/acme/billing/Invoice.java",
                "package legacy;\n\npublic class Invoice {\n}\n",
            ),
        ])
        .unwrap();
    assert_eq!(result.clean, 2);

    let files = store.snapshot();
    let ledger = &files[Path::new("src/main/java/com/acme/Ledger.java")];
    assert!(ledger.starts_with("package com.acme;"));
    assert!(ledger.contains("import com.acme.billing.Invoice;"));
    let invoice = &files[Path::new("src/main/java/com/acme/billing/Invoice.java")];
    assert!(invoice.starts_with("package com.acme.billing;"));
}

/// Small files in one directory are translated as a single unit
#[test]
fn test_merge_small_files() {
    let mut settings = java_settings();
    settings.merge_small_files = true;
    settings.small_file_threshold = 100;

    let mock = MockGenerator::echo();
    let store = MemoryStore::new();
    let pipeline = Pipeline::new(&mock, settings, &store).unwrap();
    let result = pipeline
        .run_project([
            SourceUnit::new("m/A.java", "class A {}\n"),
            SourceUnit::new("m/B.java", "class B {}\n"),
        ])
        .unwrap();

    assert_eq!(mock.call_count(), 1);
    assert_eq!(result.clean, 2);
    assert_eq!(result.state.files_processed, 1);
    assert_eq!(
        result.state.file_names[Path::new("m/B.java")],
        PathBuf::from("m/A.java")
    );
    assert_eq!(
        store.read(Path::new("m/A.java")).unwrap(),
        "class A {}\nclass B {}\n"
    );
}

/// Resume refuses a checkpoint written by an incompatible version
#[test]
fn test_checkpoint_version_mismatch() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("checkpoint.json");
    fs::write(
        &path,
        r#"{"version": 99, "saved_at": "2025-01-01T00:00:00Z", "state": {}}"#,
    )
    .unwrap();

    let err = checkpoint::load(&path).unwrap_err();
    assert!(matches!(
        err,
        TranslateError::CheckpointVersionMismatch {
            found: 99,
            expected: 1
        }
    ));
}

struct Offline;

impl TextGenerator for Offline {
    fn generate(&self, _conversation: &[Message], _max_tokens: usize) -> Result<String, GenerationError> {
        Err(GenerationError::Transport("connection refused".to_string()))
    }
}

/// A failed connectivity probe aborts the run before any file is touched
#[test]
fn test_unreachable_service_is_fatal() {
    let store = MemoryStore::new();
    let pipeline = Pipeline::new(&Offline, java_settings(), &store).unwrap();
    let err = pipeline
        .run_project([SourceUnit::new("A.java", "class A {}\n")])
        .unwrap_err();

    assert!(matches!(err, TranslateError::GenerationService(_)));
    assert!(store.is_empty());
}

/// Files with leftover syntax errors are saved and flagged, not dropped
#[test]
fn test_unrepairable_file_is_flagged() {
    let mock = MockGenerator::with_responder(|conversation| {
        let request = last_user_content(conversation);
        if request.contains("Answer yes or no") {
            return Ok("yes".to_string());
        }
        Ok(match source_block(request) {
            Some(source) => format!("<code>{source}</code>"),
            None => String::new(),
        })
    });
    let store = MemoryStore::new();
    let pipeline = Pipeline::new(&mock, java_settings(), &store).unwrap();

    let result = pipeline
        .run_project([SourceUnit::new(
            "Broken.java",
            "public class Broken {\n    void m() {\n        int x = ;\n    }\n}\n",
        )])
        .unwrap();

    assert_eq!(result.flagged, 1);
    assert_eq!(result.outcomes[Path::new("Broken.java")], FileOutcome::Flagged);
    assert!(store.read(Path::new("Broken.java")).unwrap().contains("int x = ;"));
}
