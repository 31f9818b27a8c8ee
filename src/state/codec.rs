//! Fenced-block codec for the progress record.
//!
//! The record is stored as pretty-printed JSON between two marker lines that
//! together form an HTML comment, so GitHub hides it when rendering the pull
//! request description:
//!
//! ```text
//! <!-- PATCHER_STATE_START
//! { ...record... }
//! PATCHER_STATE_END -->
//! ```
//!
//! Decoding never fails: a missing block or a block that does not parse means
//! "no prior progress".

use std::ops::Range;

use tracing::{debug, warn};

use super::ProgressRecord;
use crate::error::Result;

/// First line of the fenced block.
pub const STATE_MARKER_START: &str = "<!-- PATCHER_STATE_START";

/// Last line of the fenced block.
pub const STATE_MARKER_END: &str = "PATCHER_STATE_END -->";

/// Separator placed between existing text and an appended block.
const BLOCK_SEPARATOR: &str = "\n\n";

/// Render `record` as a complete fenced block.
///
/// Field order is fixed by the record's declaration and non-ASCII text is
/// written verbatim. Inside JSON strings `<` is written as `\u003c` and `-->`
/// as `--\u003e`, so neither marker can appear in the payload.
///
/// # Errors
///
/// Returns an error if the record cannot be serialized.
pub fn encode(record: &ProgressRecord) -> Result<String> {
    let json = serde_json::to_string_pretty(record)?
        .replace('<', "\\u003c")
        .replace("-->", "--\\u003e");
    Ok(format!("{STATE_MARKER_START}\n{json}\n{STATE_MARKER_END}"))
}

/// Find and parse the first fenced block in `text`.
#[must_use]
pub fn decode(text: &str) -> Option<ProgressRecord> {
    let block = locate_block(text)?;
    let inner = &text[block.start + STATE_MARKER_START.len()..block.end - STATE_MARKER_END.len()];

    match serde_json::from_str::<ProgressRecord>(inner.trim()) {
        Ok(record) => {
            if !record.is_well_formed() {
                warn!(
                    request = record.request_id,
                    "Progress record has out-of-sequence step numbers"
                );
            }
            Some(record)
        }
        Err(e) => {
            debug!("Ignoring unparseable progress block: {e}");
            None
        }
    }
}

/// Replace the first fenced block in `text` with `record`, or append one.
///
/// Text outside the block is left byte-identical. This is a pure
/// read-modify-write helper: whoever writes the result back must accept that a
/// concurrent writer's update may be lost.
///
/// # Errors
///
/// Returns an error if the record cannot be serialized.
pub fn merge_into_body(text: &str, record: &ProgressRecord) -> Result<String> {
    let block = encode(record)?;
    let merged = match locate_block(text) {
        Some(range) => {
            let mut merged = String::with_capacity(text.len() + block.len());
            merged.push_str(&text[..range.start]);
            merged.push_str(&block);
            merged.push_str(&text[range.end..]);
            merged
        }
        None => format!("{text}{BLOCK_SEPARATOR}{block}"),
    };
    Ok(merged)
}

/// Return `text` without its fenced block and the separator around it.
///
/// Up to two newlines directly before the block are dropped (the separator
/// [`merge_into_body`] adds). When the block opens the text, up to two
/// newlines after it are dropped instead. Everything else is kept as is.
#[must_use]
pub fn extract_visible(text: &str) -> String {
    let Some(range) = locate_block(text) else {
        return text.to_string();
    };

    let before = strip_trailing_newlines(&text[..range.start], 2);
    let mut after = &text[range.end..];
    if before.is_empty() {
        after = strip_leading_newlines(after, 2);
    }
    format!("{before}{after}")
}

/// Byte range of the first complete block, markers included.
///
/// Each end marker is paired with the nearest start marker before it, so a
/// stray start marker earlier in the text cannot swallow a valid block.
fn locate_block(text: &str) -> Option<Range<usize>> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find(STATE_MARKER_END) {
        let end_at = search_from + offset;
        if let Some(start) = text[..end_at].rfind(STATE_MARKER_START) {
            return Some(start..end_at + STATE_MARKER_END.len());
        }
        search_from = end_at + STATE_MARKER_END.len();
    }
    None
}

fn strip_trailing_newlines(s: &str, max: usize) -> &str {
    let mut out = s;
    for _ in 0..max {
        match out.strip_suffix('\n') {
            Some(rest) => out = rest.strip_suffix('\r').unwrap_or(rest),
            None => break,
        }
    }
    out
}

fn strip_leading_newlines(s: &str, max: usize) -> &str {
    let mut out = s;
    for _ in 0..max {
        let rest = out.strip_prefix('\r').unwrap_or(out);
        match rest.strip_prefix('\n') {
            Some(rest) => out = rest,
            None => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StepStatus;

    fn sample_record() -> ProgressRecord {
        let mut record = ProgressRecord::new(42, "patcher/issue-42-add-retry", "0a1b2c3d4e5f6a7b");
        record.change_id = Some(123);
        let step = record.add_step(StepStatus::AwaitingReview, vec!["src/retry.rs".into()]);
        step.commit_ref = Some("c0ffee".into());
        record
    }

    #[test]
    fn test_encode_wraps_json_in_markers() {
        let block = encode(&sample_record()).unwrap();
        assert!(block.starts_with(&format!("{STATE_MARKER_START}\n{{")));
        assert!(block.ends_with(&format!("}}\n{STATE_MARKER_END}")));
        assert!(block.contains("\"issue_number\": 42"));
    }

    #[test]
    fn test_encode_is_deterministic() {
        let record = sample_record();
        assert_eq!(encode(&record).unwrap(), encode(&record).unwrap());
    }

    #[test]
    fn test_encode_keeps_unicode_readable() {
        let mut record = sample_record();
        record.steps[0].review_feedback = Some("Исправь обработку ошибок ✅".into());
        let block = encode(&record).unwrap();
        assert!(block.contains("Исправь обработку ошибок ✅"));
        assert_eq!(decode(&block).unwrap(), record);
    }

    #[test]
    fn test_encode_escapes_comment_terminator() {
        let mut record = sample_record();
        record.steps[0].review_feedback = Some("arrow --> inside".into());
        let block = encode(&record).unwrap();

        assert_eq!(block.matches("-->").count(), 1, "only the end marker closes the comment");
        let decoded = decode(&block).unwrap();
        assert_eq!(decoded.steps[0].review_feedback.as_deref(), Some("arrow --> inside"));
    }

    #[test]
    fn test_decode_without_markers_is_none() {
        assert!(decode("PR without state").is_none());
        assert!(decode("").is_none());
    }

    #[test]
    fn test_decode_malformed_json_is_none() {
        let text = format!("{STATE_MARKER_START}\n{{not json\n{STATE_MARKER_END}");
        assert!(decode(&text).is_none());
    }

    #[test]
    fn test_decode_takes_first_block() {
        let mut second = sample_record();
        second.request_id = 99;
        let text = format!(
            "{}\n\n{}",
            encode(&sample_record()).unwrap(),
            encode(&second).unwrap()
        );
        assert_eq!(decode(&text).unwrap().request_id, 42);
    }

    #[test]
    fn test_merge_appends_after_blank_line() {
        let record = sample_record();
        let merged = merge_into_body("Original PR body", &record).unwrap();
        assert!(merged.starts_with("Original PR body\n\n<!-- PATCHER_STATE_START\n"));
        assert_eq!(decode(&merged).unwrap(), record);
    }

    #[test]
    fn test_merge_replaces_in_place() {
        let mut record = sample_record();
        let body = format!(
            "## Summary\n\n{}\n\n---\nfooter",
            encode(&record).unwrap()
        );

        record.add_step(StepStatus::AwaitingReview, vec!["src/lib.rs".into()]);
        let merged = merge_into_body(&body, &record).unwrap();

        assert!(merged.starts_with("## Summary\n\n<!-- PATCHER_STATE_START"));
        assert!(merged.ends_with("PATCHER_STATE_END -->\n\n---\nfooter"));
        assert_eq!(merged.matches(STATE_MARKER_START).count(), 1);
        assert_eq!(decode(&merged).unwrap().step_count(), 2);
    }

    #[test]
    fn test_merge_ignores_stray_start_marker() {
        let record = sample_record();
        let text = format!("quoting {STATE_MARKER_START} in prose");
        let merged = merge_into_body(&text, &record).unwrap();
        assert_eq!(decode(&merged).unwrap(), record);
    }

    #[test]
    fn test_extract_visible_removes_block() {
        let body = "This is the PR description.\n\nSome more content.\n\n<!-- PATCHER_STATE_START\n{\"issue_number\": 42}\nPATCHER_STATE_END -->";
        let visible = extract_visible(body);
        assert_eq!(visible, "This is the PR description.\n\nSome more content.");
    }

    #[test]
    fn test_extract_visible_keeps_text_after_block() {
        let record = sample_record();
        let body = format!("Intro\n\n{}\n\nOutro", encode(&record).unwrap());
        assert_eq!(extract_visible(&body), "Intro\n\nOutro");
    }

    #[test]
    fn test_extract_visible_block_first() {
        let body = format!("{}\n\nOutro", encode(&sample_record()).unwrap());
        assert_eq!(extract_visible(&body), "Outro");
    }

    #[test]
    fn test_extract_visible_without_block_is_identity() {
        let body = "  untouched\n\n";
        assert_eq!(extract_visible(body), body);
    }

    #[test]
    fn test_extract_visible_inverts_append() {
        let original = "Body ending in newline\n";
        let merged = merge_into_body(original, &sample_record()).unwrap();
        assert_eq!(extract_visible(&merged), original);
    }
}
