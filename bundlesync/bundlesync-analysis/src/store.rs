//! Per-root analysis results with severity filtering and edit remapping.

use crate::remap::{RemapStats, remap_file};
use bundlesync_core::analysis::{
    AnalysisResultSet, EditDelta, Severity, SuggestionIndex, VisibleIssue,
};
use bundlesync_core::error::{Result, SyncError};
use bundlesync_core::path::{is_under, normalize_path, owning_root};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Whether a root's result set may be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultState {
    /// Matches the last synced bundle
    Current,
    /// The bundle changed after this set was produced
    Invalidated,
    /// A replacement analysis is running
    Ingesting,
}

impl ResultState {
    pub fn is_displayable(&self) -> bool {
        matches!(self, Self::Current)
    }
}

#[derive(Debug)]
struct RootResults {
    set: AnalysisResultSet,
    state: ResultState,
}

/// Holds the latest analysis result set of every root.
pub struct AnalysisResultStore {
    results: DashMap<PathBuf, RootResults>,
    hidden: RwLock<BTreeSet<Severity>>,
}

impl AnalysisResultStore {
    pub fn new(hidden: impl IntoIterator<Item = Severity>) -> Self {
        Self {
            results: DashMap::new(),
            hidden: RwLock::new(hidden.into_iter().collect()),
        }
    }

    /// Replace the result set of `root` wholesale.
    ///
    /// File keys that are not under `root` are read as root-relative paths.
    /// Display flags of the previous set are discarded; the current severity
    /// filter is applied to the new one.
    pub fn ingest(&self, root: &Path, mut set: AnalysisResultSet) {
        let root = normalize_path(root);

        set.files = std::mem::take(&mut set.files)
            .into_iter()
            .map(|(file, result)| (rebase(&root, &file), result))
            .collect();
        apply_visibility(&mut set, &self.hidden.read());

        info!(
            "Ingested results for {}: {} files, {} issues",
            root.display(),
            set.files.len(),
            set.issue_count()
        );
        self.results.insert(
            root,
            RootResults {
                set,
                state: ResultState::Current,
            },
        );
    }

    /// Mark an analysis for `root` as running. Remaps are dropped until the
    /// next [`ingest`](Self::ingest).
    pub fn begin_ingest(&self, root: &Path) {
        let root = normalize_path(root);
        debug!("Ingest started for {}", root.display());
        self.results
            .entry(root)
            .and_modify(|r| r.state = ResultState::Ingesting)
            .or_insert_with(|| RootResults {
                set: AnalysisResultSet::default(),
                state: ResultState::Ingesting,
            });
    }

    /// Stop showing the result set of `root` until a new one arrives.
    pub fn invalidate(&self, root: &Path) {
        let root = normalize_path(root);
        if let Some(mut results) = self.results.get_mut(&root) {
            results.state = ResultState::Invalidated;
            debug!("Results invalidated for {}", root.display());
        }
    }

    /// Shift the issue rows of the edited file.
    ///
    /// # Errors
    ///
    /// `RemapOutOfRange` when no result set holds the file. The store is left
    /// unchanged.
    pub fn remap_on_edit(&self, delta: &EditDelta) -> Result<RemapStats> {
        let file = normalize_path(&delta.file_path);
        let root = self
            .root_for(&file)
            .ok_or_else(|| SyncError::RemapOutOfRange(file.clone()))?;

        let mut results = self
            .results
            .get_mut(&root)
            .ok_or_else(|| SyncError::RemapOutOfRange(file.clone()))?;

        if results.state == ResultState::Ingesting {
            debug!("Discarding remap of {} during ingest", file.display());
            return Ok(RemapStats::default());
        }

        let result = results
            .set
            .files
            .get_mut(&file)
            .ok_or_else(|| SyncError::RemapOutOfRange(file.clone()))?;

        let stats = remap_file(result, delta);
        debug!(
            "Remapped {}: {} shifted, {} stale",
            file.display(),
            stats.shifted,
            stats.staled
        );
        Ok(stats)
    }

    /// Hide or show every position whose suggestion has exactly `severity`.
    ///
    /// Only the visibility flag changes, so showing a severity again restores
    /// exactly what was hidden.
    pub fn filter_by_severity(&self, severity: Severity, hide: bool) {
        {
            let mut hidden = self.hidden.write();
            if hide {
                hidden.insert(severity);
            } else {
                hidden.remove(&severity);
            }
        }

        let hidden = self.hidden.read();
        for mut entry in self.results.iter_mut() {
            apply_visibility(&mut entry.value_mut().set, &hidden);
        }
        info!("Severity {} {}", severity, if hide { "hidden" } else { "shown" });
    }

    pub fn hidden_severities(&self) -> Vec<Severity> {
        self.hidden.read().iter().copied().collect()
    }

    /// Id of the suggestion named `name` (message or id) in the result set
    /// of the root owning `file`.
    pub fn find_suggestion_id(&self, name: &str, file: &Path) -> Option<String> {
        let file = normalize_path(file);
        let root = self.root_for(&file)?;
        let results = self.results.get(&root)?;

        let suggestions = &results.set.suggestions;
        suggestions
            .values()
            .find(|s| s.message == name)
            .or_else(|| suggestions.values().find(|s| s.id == name))
            .map(|s| s.id.clone())
    }

    /// Drop the result set of a removed root.
    pub fn remove_review_results(&self, root: &Path) -> bool {
        let root = normalize_path(root);
        let removed = self.results.remove(&root).is_some();
        if removed {
            info!("Review results removed for {}", root.display());
        }
        removed
    }

    /// Displayable issues of one file.
    pub fn visible_issues(&self, file: &Path) -> Vec<VisibleIssue> {
        let file = normalize_path(file);
        let Some(root) = self.root_for(&file) else {
            return Vec::new();
        };
        let Some(results) = self.results.get(&root) else {
            return Vec::new();
        };
        if !results.state.is_displayable() {
            return Vec::new();
        }
        visible_in_file(&results.set, &file)
    }

    /// Displayable issues of every file of every current result set.
    pub fn create_review_results(&self) -> BTreeMap<PathBuf, Vec<VisibleIssue>> {
        let mut review = BTreeMap::new();
        for entry in self.results.iter() {
            if !entry.state.is_displayable() {
                continue;
            }
            for file in entry.set.files.keys() {
                let issues = visible_in_file(&entry.set, file);
                if !issues.is_empty() {
                    review.insert(file.clone(), issues);
                }
            }
        }
        review
    }

    pub fn state(&self, root: &Path) -> Option<ResultState> {
        self.results.get(&normalize_path(root)).map(|r| r.state)
    }

    /// Copy of the result set of `root`, display flags included.
    pub fn result_set(&self, root: &Path) -> Option<AnalysisResultSet> {
        self.results
            .get(&normalize_path(root))
            .map(|r| r.set.clone())
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        self.results.iter().map(|r| r.key().clone()).collect()
    }

    fn root_for(&self, file: &Path) -> Option<PathBuf> {
        let roots = self.roots();
        owning_root(file, roots.iter().map(PathBuf::as_path)).map(Path::to_path_buf)
    }
}

impl Default for AnalysisResultStore {
    fn default() -> Self {
        Self::new([])
    }
}

fn rebase(root: &Path, file: &Path) -> PathBuf {
    let file = normalize_path(file);
    if is_under(&file, root) {
        return file;
    }
    let relative: PathBuf = file
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    root.join(relative)
}

fn apply_visibility(set: &mut AnalysisResultSet, hidden: &BTreeSet<Severity>) {
    let severities: BTreeMap<SuggestionIndex, Severity> = set
        .suggestions
        .iter()
        .map(|(index, s)| (*index, s.severity))
        .collect();

    for result in set.files.values_mut() {
        for (index, position) in result.positions_mut() {
            position.hidden = severities
                .get(&index)
                .is_some_and(|severity| hidden.contains(severity));
        }
    }
}

fn visible_in_file(set: &AnalysisResultSet, file: &Path) -> Vec<VisibleIssue> {
    let Some(result) = set.files.get(file) else {
        return Vec::new();
    };
    result
        .positions()
        .filter(|(_, position)| position.is_displayable())
        .filter_map(|(index, position)| {
            set.suggestion(index).map(|suggestion| VisibleIssue {
                file: file.to_path_buf(),
                suggestion_index: index,
                suggestion: suggestion.clone(),
                position: position.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bundlesync_core::analysis::{
        FileResult, IssuePosition, LineCount, Suggestion, TextPosition, TextRange,
    };

    fn sample_set() -> AnalysisResultSet {
        let mut file = FileResult::default();
        file.issues
            .insert(0, vec![IssuePosition::new(vec![10, 10], vec![4, 9])]);
        file.issues
            .insert(1, vec![IssuePosition::new(vec![3, 3], vec![0, 2])]);

        let mut set = AnalysisResultSet {
            success: true,
            ..Default::default()
        };
        set.files.insert(PathBuf::from("/src/a.js"), file);
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
                id: "js/UnusedVar".into(),
                message: "Unused variable".into(),
                severity: Severity::INFO,
            },
        );
        set
    }

    fn insertion(file: &str, line: u32) -> EditDelta {
        EditDelta::new(file, LineCount { current: 5, prev_offset: 2 }).with_change(
            TextRange::new(TextPosition::new(line, 0), TextPosition::new(line, 0)),
            "\n\n\n",
        )
    }

    #[test]
    fn test_ingest_rebases_relative_keys() {
        let store = AnalysisResultStore::default();
        store.ingest(Path::new("/ws/app"), sample_set());

        let set = store.result_set(Path::new("/ws/app")).unwrap();
        assert!(set.files.contains_key(Path::new("/ws/app/src/a.js")));
    }

    #[test]
    fn test_remap_shifts_rows() {
        let store = AnalysisResultStore::default();
        store.ingest(Path::new("/ws/app"), sample_set());

        store.remap_on_edit(&insertion("/ws/app/src/a.js", 2)).unwrap();

        let issues = store.visible_issues(Path::new("/ws/app/src/a.js"));
        let rows: Vec<u32> = issues.iter().map(|i| i.position.rows[0]).collect();
        assert_eq!(rows, vec![13, 6]);
    }

    #[test]
    fn test_remap_unknown_file_is_out_of_range() {
        let store = AnalysisResultStore::default();
        store.ingest(Path::new("/ws/app"), sample_set());

        let err = store
            .remap_on_edit(&insertion("/ws/app/src/other.js", 2))
            .unwrap_err();
        assert!(matches!(err, SyncError::RemapOutOfRange(_)));
        assert!(!err.is_reportable());
    }

    #[test]
    fn test_remap_discarded_during_ingest() {
        let store = AnalysisResultStore::default();
        store.ingest(Path::new("/ws/app"), sample_set());
        store.begin_ingest(Path::new("/ws/app"));

        let stats = store.remap_on_edit(&insertion("/ws/app/src/a.js", 2)).unwrap();
        assert_eq!(stats, RemapStats::default());

        let set = store.result_set(Path::new("/ws/app")).unwrap();
        let rows: Vec<u32> = set.files[Path::new("/ws/app/src/a.js")]
            .positions()
            .map(|(_, p)| p.rows[0])
            .collect();
        assert_eq!(rows, vec![10, 3]);
    }

    #[test]
    fn test_severity_filter_round_trip() {
        let store = AnalysisResultStore::default();
        store.ingest(Path::new("/ws/app"), sample_set());
        let file = Path::new("/ws/app/src/a.js");
        let before = store.visible_issues(file);

        store.filter_by_severity(Severity::WARNING, true);
        let hidden = store.visible_issues(file);
        assert_eq!(hidden.len(), 1);
        assert_eq!(hidden[0].suggestion.severity, Severity::INFO);

        store.filter_by_severity(Severity::WARNING, false);
        assert_eq!(store.visible_issues(file), before);
    }

    #[test]
    fn test_filter_applies_to_later_ingest() {
        let store = AnalysisResultStore::new([Severity::INFO]);
        store.ingest(Path::new("/ws/app"), sample_set());

        let issues = store.visible_issues(Path::new("/ws/app/src/a.js"));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].suggestion.id, "js/NoZeroReturned");
    }

    #[test]
    fn test_invalidated_results_not_displayed() {
        let store = AnalysisResultStore::default();
        store.ingest(Path::new("/ws/app"), sample_set());
        store.invalidate(Path::new("/ws/app"));

        assert!(store.create_review_results().is_empty());
        assert_eq!(store.state(Path::new("/ws/app")), Some(ResultState::Invalidated));

        store.ingest(Path::new("/ws/app"), sample_set());
        assert_eq!(store.create_review_results().len(), 1);
    }

    #[test]
    fn test_find_suggestion_id() {
        let store = AnalysisResultStore::default();
        store.ingest(Path::new("/ws/app"), sample_set());
        let file = Path::new("/ws/app/src/a.js");

        assert_eq!(
            store.find_suggestion_id("Unused variable", file),
            Some("js/UnusedVar".to_string())
        );
        assert_eq!(
            store.find_suggestion_id("js/NoZeroReturned", file),
            Some("js/NoZeroReturned".to_string())
        );
        assert_eq!(store.find_suggestion_id("nothing like it", file), None);
        assert_eq!(
            store.find_suggestion_id("Unused variable", Path::new("/elsewhere/a.js")),
            None
        );
    }

    #[test]
    fn test_lookup_scoped_to_owning_root() {
        let store = AnalysisResultStore::default();
        store.ingest(Path::new("/ws"), AnalysisResultSet::default());
        store.ingest(Path::new("/ws/nested"), sample_set());

        assert_eq!(
            store.find_suggestion_id("Unused variable", Path::new("/ws/nested/src/a.js")),
            Some("js/UnusedVar".to_string())
        );
        assert_eq!(
            store.find_suggestion_id("Unused variable", Path::new("/ws/top.js")),
            None
        );
    }

    #[test]
    fn test_remove_review_results() {
        let store = AnalysisResultStore::default();
        store.ingest(Path::new("/ws/app"), sample_set());

        assert!(store.remove_review_results(Path::new("/ws/app")));
        assert!(store.roots().is_empty());
        assert!(store.visible_issues(Path::new("/ws/app/src/a.js")).is_empty());
    }
}
