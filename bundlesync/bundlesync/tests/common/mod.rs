//! Shared fixtures for context and coordinator tests.

#![allow(dead_code)]

use bundlesync::{SyncConfig, SyncContext};
use bundlesync_core::ErrorKind;
use bundlesync_core::analysis::{AnalysisResultSet, FileResult, IssuePosition, Severity, Suggestion};
use bundlesync_core::testing::MemoryTransport;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestEnv {
    pub context: SyncContext,
    pub transport: Arc<MemoryTransport>,
    pub errors: Arc<Mutex<Vec<ErrorKind>>>,
}

pub async fn create_test_env() -> TestEnv {
    let transport = Arc::new(MemoryTransport::new());
    transport.set_analysis(sample_results());

    let context = SyncContext::activate(SyncConfig::default(), transport.clone())
        .await
        .unwrap();

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink_errors = Arc::clone(&errors);
    context.set_error_sink(Arc::new(move |err| sink_errors.lock().push(err.kind())));

    TestEnv {
        context,
        transport,
        errors,
    }
}

/// A small JavaScript project in a fresh temp dir.
pub fn create_test_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(
        root.join("src/main.js"),
        "import { helper } from './helper';\n\nfunction main() {\n  return helper();\n}\n",
    )
    .unwrap();
    fs::write(root.join("src/helper.js"), "export function helper() {\n  return 0;\n}\n").unwrap();
    fs::write(root.join("package.json"), "{ \"name\": \"demo\" }\n").unwrap();
    dir
}

/// Result set with one warning at row 10 and one info at row 3 of `/src/main.js`.
pub fn sample_results() -> AnalysisResultSet {
    let mut file = FileResult::default();
    file.issues
        .insert(0, vec![IssuePosition::new(vec![10, 10], vec![2, 14])]);
    file.issues
        .insert(1, vec![IssuePosition::new(vec![3, 3], vec![0, 8])]);

    let mut set = AnalysisResultSet {
        success: true,
        ..Default::default()
    };
    set.files.insert(PathBuf::from("/src/main.js"), file);
    set.suggestions.insert(
        0,
        Suggestion {
            id: "js/NoZeroReturned".into(),
            message: "Zero is never returned".into(),
            severity: Severity::WARNING,
        },
    );
    set.suggestions.insert(
        1,
        Suggestion {
            id: "js/UnusedImport".into(),
            message: "Unused import".into(),
            severity: Severity::INFO,
        },
    );
    set
}

pub fn main_js(root: &Path) -> PathBuf {
    root.join("src/main.js")
}
