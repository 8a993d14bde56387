//! Analysis results for synchronized workspace roots.
//!
//! [`AnalysisResultStore`] keeps the latest result set per root, filters
//! positions by severity and keeps issue rows in step with local edits
//! through the functions in [`remap`].

pub mod remap;
pub mod store;

pub use remap::{RemapStats, remap_file, shift_row};
pub use store::{AnalysisResultStore, ResultState};
