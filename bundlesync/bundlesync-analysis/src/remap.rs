//! Line remapping of issue positions after a document edit.
//!
//! Rows at or after the first edited line move by the edit's net line change;
//! rows before it stay put. A position whose primary row was replaced in full
//! by one of the edit's changes is flagged stale and left where it was.

use bundlesync_core::analysis::{ContentChange, EditDelta, FileResult, IssuePosition};

/// What one remap did to a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemapStats {
    pub shifted: usize,
    pub staled: usize,
    pub untouched: usize,
}

/// Move `row` by `net` lines if it lies at or after `start`.
///
/// The result never drops below `start`, so deletions collapse rows onto the
/// edited line instead of wrapping.
pub fn shift_row(row: u32, start: u32, net: i64) -> u32 {
    if row < start {
        return row;
    }
    let shifted = i64::from(row).saturating_add(net).max(i64::from(start));
    u32::try_from(shifted).unwrap_or(u32::MAX)
}

/// Whether any change replaces all of `row`.
pub fn row_replaced(row: u32, changes: &[ContentChange]) -> bool {
    changes.iter().any(|change| change.range.covers_line(row))
}

/// Apply `delta` to every live position of `file`.
pub fn remap_file(file: &mut FileResult, delta: &EditDelta) -> RemapStats {
    let mut stats = RemapStats::default();
    let Some(start) = delta.start_line() else {
        return stats;
    };
    let net = delta.line_delta();

    for (_, position) in file.positions_mut() {
        if position.stale {
            stats.untouched += 1;
            continue;
        }

        if position
            .rows
            .iter()
            .any(|row| row_replaced(*row, &delta.content_changes))
        {
            position.stale = true;
            stats.staled += 1;
            continue;
        }

        if net != 0 && shift_position(position, start, net) {
            stats.shifted += 1;
        } else {
            stats.untouched += 1;
        }
    }

    stats
}

fn shift_position(position: &mut IssuePosition, start: u32, net: i64) -> bool {
    let mut moved = false;
    let mut shift = |rows: &mut Vec<u32>| {
        for row in rows.iter_mut() {
            let next = shift_row(*row, start, net);
            moved |= next != *row;
            *row = next;
        }
    };

    shift(&mut position.rows);
    if let Some(markers) = position.markers.as_mut() {
        for marker in markers {
            for span in &mut marker.pos {
                shift(&mut span.rows);
            }
        }
    }

    moved
}
