//! Downloads request body.

use gsb_core::ranges::{format_ranges, ChunkRange, ListRangeSet};
use gsb_core::ChunkKind;

/// Build the body of a downloads request: one line per subscribed list,
/// `list;a:<ranges>:s:<ranges>[:mac]`, omitting empty range sets.
pub fn build_data_request(lists: &[String], ranges: &[ListRangeSet], mac: bool) -> String {
    let mut body = String::new();
    for list in lists {
        let mut parts = Vec::new();
        for kind in [ChunkKind::Add, ChunkKind::Sub] {
            let held = held_ranges(ranges, list, kind);
            if !held.is_empty() {
                parts.push(format!("{}:{}", kind, format_ranges(held)));
            }
        }
        if mac {
            parts.push("mac".to_string());
        }

        body.push_str(list);
        body.push(';');
        body.push_str(&parts.join(":"));
        body.push('\n');
    }
    body
}

fn held_ranges<'r>(ranges: &'r [ListRangeSet], list: &str, kind: ChunkKind) -> &'r [ChunkRange] {
    ranges
        .iter()
        .find(|r| r.list == list && r.kind == kind)
        .map(|r| r.ranges.as_slice())
        .unwrap_or(&[])
}
