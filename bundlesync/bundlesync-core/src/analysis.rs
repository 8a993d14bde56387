//! Analysis result and edit notification types.
//!
//! Result sets arrive from the remote service in this shape:
//!
//! ```json
//! {
//!   "files": { "/src/a.js": { "0": [ { "rows": [3, 3], "cols": [5, 12] } ] } },
//!   "suggestions": { "0": { "id": "js/NoZeroReturned", "message": "...", "severity": 2 } },
//!   "success": true
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Index of a suggestion inside one result set's catalog.
pub type SuggestionIndex = u32;

/// Numeric severity reported by the analysis service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Severity(pub u8);

impl Severity {
    pub const INFO: Severity = Severity(1);
    pub const WARNING: Severity = Severity(2);
    pub const CRITICAL: Severity = Severity(3);
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::INFO => f.write_str("info"),
            Self::WARNING => f.write_str("warning"),
            Self::CRITICAL => f.write_str("critical"),
            Severity(other) => write!(f, "severity-{other}"),
        }
    }
}

/// A catalog entry describing one class of finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    pub message: String,
    pub severity: Severity,
}

/// One secondary span: parallel `rows`/`cols`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerPosition {
    pub rows: Vec<u32>,
    pub cols: Vec<u32>,
}

/// Secondary location of a multi-location issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueMarker {
    /// Character range of the message this marker explains
    pub msg: Vec<u32>,
    pub pos: Vec<MarkerPosition>,
}

/// Where one finding applies inside a file.
///
/// `stale` and `hidden` are local display state and never travel on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuePosition {
    pub rows: Vec<u32>,
    pub cols: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markers: Option<Vec<IssueMarker>>,
    /// An edit replaced the line this position pointed at
    #[serde(skip)]
    pub stale: bool,
    /// Suppressed by a severity filter
    #[serde(skip)]
    pub hidden: bool,
}

impl IssuePosition {
    pub fn new(rows: Vec<u32>, cols: Vec<u32>) -> Self {
        Self {
            rows,
            cols,
            ..Default::default()
        }
    }

    pub fn with_markers(mut self, markers: Vec<IssueMarker>) -> Self {
        self.markers = Some(markers);
        self
    }

    /// Whether this position may be shown.
    pub fn is_displayable(&self) -> bool {
        !self.stale && !self.hidden
    }
}

/// Findings of one file, keyed by suggestion index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileResult {
    pub issues: BTreeMap<SuggestionIndex, Vec<IssuePosition>>,
}

impl FileResult {
    pub fn positions(&self) -> impl Iterator<Item = (SuggestionIndex, &IssuePosition)> {
        self.issues
            .iter()
            .flat_map(|(index, positions)| positions.iter().map(move |p| (*index, p)))
    }

    pub fn positions_mut(&mut self) -> impl Iterator<Item = (SuggestionIndex, &mut IssuePosition)> {
        self.issues
            .iter_mut()
            .flat_map(|(index, positions)| positions.iter_mut().map(move |p| (*index, p)))
    }

    pub fn is_empty(&self) -> bool {
        self.issues.values().all(Vec::is_empty)
    }
}

/// Complete result of one analysis of one workspace root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResultSet {
    #[serde(default)]
    pub files: BTreeMap<PathBuf, FileResult>,
    #[serde(default)]
    pub suggestions: BTreeMap<SuggestionIndex, Suggestion>,
    #[serde(default)]
    pub success: bool,
}

impl AnalysisResultSet {
    pub fn suggestion(&self, index: SuggestionIndex) -> Option<&Suggestion> {
        self.suggestions.get(&index)
    }

    /// Total number of issue positions across all files.
    pub fn issue_count(&self) -> usize {
        self.files.values().map(|f| f.positions().count()).sum()
    }
}

/// Zero-based line/character position in a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TextPosition {
    pub line: u32,
    pub character: u32,
}

impl TextPosition {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Half-open text range `[start, end)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRange {
    pub start: TextPosition,
    pub end: TextPosition,
}

impl TextRange {
    pub fn new(start: TextPosition, end: TextPosition) -> Self {
        Self { start, end }
    }

    /// Whether the range replaces all of `line`, including its line break.
    pub fn covers_line(&self, line: u32) -> bool {
        self.start <= TextPosition::new(line, 0)
            && self.end >= TextPosition::new(line.saturating_add(1), 0)
    }
}

/// One replaced range in an edit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentChange {
    pub range: TextRange,
    #[serde(default)]
    pub text: String,
}

/// Line counts around an edit; the difference is the net line change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineCount {
    pub current: u32,
    pub prev_offset: u32,
}

/// Edit notification for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditDelta {
    pub file_path: PathBuf,
    pub line_count: LineCount,
    #[serde(default)]
    pub content_changes: Vec<ContentChange>,
}

impl EditDelta {
    pub fn new(file_path: impl AsRef<Path>, line_count: LineCount) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            line_count,
            content_changes: Vec::new(),
        }
    }

    pub fn with_change(mut self, range: TextRange, text: impl Into<String>) -> Self {
        self.content_changes.push(ContentChange {
            range,
            text: text.into(),
        });
        self
    }

    /// Net line change (`current - prev_offset`).
    pub fn line_delta(&self) -> i64 {
        i64::from(self.line_count.current) - i64::from(self.line_count.prev_offset)
    }

    /// First line touched by any change.
    pub fn start_line(&self) -> Option<u32> {
        self.content_changes.iter().map(|c| c.range.start.line).min()
    }
}

/// A position ready for display, joined with its catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleIssue {
    pub file: PathBuf,
    pub suggestion_index: SuggestionIndex,
    pub suggestion: Suggestion,
    pub position: IssuePosition,
}
