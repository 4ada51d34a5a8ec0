//! Line-level diff with bounded context.
//!
//! Both inputs are treated as ordered sequences of lines and nothing else.
//! Lines keep their terminator for comparison, so `"a"` and `"a\n"` differ
//! and the rendered output can flag a missing final newline.
//!
//! Alignment is Myers' linear-space algorithm from `similar`; hunk grouping
//! uses its `grouped_ops`, which merges change runs separated by at most
//! `2 * context_lines` unchanged lines. Within each change run removals come
//! before additions.

use std::fmt::Write as _;

use serde::Serialize;
use similar::{ChangeTag, DiffOp, TextDiff};

/// Role of a line inside a hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineTag {
    Context,
    Added,
    Removed,
}

impl LineTag {
    /// Unified-diff prefix character.
    #[must_use]
    pub const fn prefix(self) -> char {
        match self {
            Self::Context => ' ',
            Self::Added => '+',
            Self::Removed => '-',
        }
    }
}

/// One tagged line of a hunk. `text` excludes the `\n` terminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffLine {
    pub tag: LineTag,
    pub text: String,
    /// Set on a final line that has no trailing `\n`.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub missing_newline: bool,
}

impl DiffLine {
    fn from_segment(tag: LineTag, segment: &str) -> Self {
        match segment.strip_suffix('\n') {
            Some(text) => Self {
                tag,
                text: text.to_string(),
                missing_newline: false,
            },
            None => Self {
                tag,
                text: segment.to_string(),
                missing_newline: true,
            },
        }
    }
}

/// A contiguous group of changes plus surrounding context.
///
/// Starts are 1-based. When a side's count is zero its start is the line
/// just before the hunk on that side (0 at the top of the file).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<DiffLine>,
}

impl Hunk {
    /// `@@ -a,b +c,d @@` header line, without trailing newline.
    #[must_use]
    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_count, self.new_start, self.new_count
        )
    }
}

/// Ordered hunks for one comparison. Empty means no observable change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    pub hunks: Vec<Hunk>,
}

impl DiffResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    /// Number of added lines across all hunks.
    #[must_use]
    pub fn added(&self) -> usize {
        self.count(LineTag::Added)
    }

    /// Number of removed lines across all hunks.
    #[must_use]
    pub fn removed(&self) -> usize {
        self.count(LineTag::Removed)
    }

    fn count(&self, tag: LineTag) -> usize {
        self.hunks
            .iter()
            .flat_map(|h| &h.lines)
            .filter(|l| l.tag == tag)
            .count()
    }

    /// Render the hunks in unified-diff style.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for hunk in &self.hunks {
            out.push_str(&hunk.header());
            out.push('\n');
            for line in &hunk.lines {
                let _ = writeln!(out, "{}{}", line.tag.prefix(), line.text);
                if line.missing_newline {
                    out.push_str("\\ No newline at end of file\n");
                }
            }
        }
        out
    }
}

/// Compare `old` against `new`, keeping up to `context_lines` unchanged
/// lines around every change.
///
/// With no previous content the result is a single hunk that adds every
/// line of `new`, even when `new` is empty.
#[must_use]
pub fn diff(old: Option<&str>, new: &str, context_lines: usize) -> DiffResult {
    let new_lines = split_lines(new);
    let Some(old) = old else {
        return DiffResult {
            hunks: vec![Hunk {
                old_start: 0,
                old_count: 0,
                new_start: usize::from(!new_lines.is_empty()),
                new_count: new_lines.len(),
                lines: new_lines
                    .iter()
                    .map(|seg| DiffLine::from_segment(LineTag::Added, seg))
                    .collect(),
            }],
        };
    };

    let text_diff = TextDiff::from_lines(old, new);
    let hunks = text_diff
        .grouped_ops(context_lines)
        .iter()
        .map(|group| build_hunk(&text_diff, group))
        .collect();
    DiffResult { hunks }
}

/// Split into lines, keeping each `\n`. A trailing segment without one is
/// its own line.
fn split_lines(s: &str) -> Vec<&str> {
    s.split_inclusive('\n').collect()
}

fn build_hunk(text_diff: &TextDiff<'_, '_, '_, str>, group: &[DiffOp]) -> Hunk {
    let old_first = group.first().map_or(0, |op| op.old_range().start);
    let new_first = group.first().map_or(0, |op| op.new_range().start);
    let old_count: usize = group.iter().map(|op| op.old_range().len()).sum();
    let new_count: usize = group.iter().map(|op| op.new_range().len()).sum();

    let mut lines: Vec<DiffLine> = group
        .iter()
        .flat_map(|op| text_diff.iter_changes(op))
        .map(|change| {
            let tag = match change.tag() {
                ChangeTag::Equal => LineTag::Context,
                ChangeTag::Delete => LineTag::Removed,
                ChangeTag::Insert => LineTag::Added,
            };
            let value = change.value();
            DiffLine {
                tag,
                text: value.strip_suffix('\n').unwrap_or(value).to_string(),
                missing_newline: change.missing_newline(),
            }
        })
        .collect();
    removals_first(&mut lines);

    Hunk {
        old_start: old_first + usize::from(old_count > 0),
        old_count,
        new_start: new_first + usize::from(new_count > 0),
        new_count,
        lines,
    }
}

/// Within every maximal run of changes, move removals ahead of additions.
fn removals_first(lines: &mut [DiffLine]) {
    let mut start = 0;
    while start < lines.len() {
        if lines[start].tag == LineTag::Context {
            start += 1;
            continue;
        }
        let end = lines[start..]
            .iter()
            .position(|l| l.tag == LineTag::Context)
            .map_or(lines.len(), |p| start + p);
        lines[start..end].sort_by_key(|l| l.tag == LineTag::Added);
        start = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(hunk: &Hunk) -> String {
        hunk.lines.iter().map(|l| l.tag.prefix()).collect()
    }

    fn numbered(n: usize) -> String {
        (1..=n).map(|i| format!("line {i}\n")).collect()
    }

    #[test]
    fn first_run_marks_everything_added() {
        let result = diff(None, "DB: admin\nDB: test\n", 2);
        assert_eq!(result.hunks.len(), 1);
        let hunk = &result.hunks[0];
        assert_eq!(hunk.header(), "@@ -0,0 +1,2 @@");
        assert_eq!(tags(hunk), "++");
        assert_eq!(result.added(), 2);
        assert_eq!(result.removed(), 0);
    }

    #[test]
    fn first_run_with_empty_content_still_has_a_hunk() {
        let result = diff(None, "", 3);
        assert_eq!(result.hunks.len(), 1);
        assert_eq!(result.hunks[0].header(), "@@ -0,0 +0,0 @@");
        assert!(result.hunks[0].lines.is_empty());
        assert!(!result.is_empty());
    }

    #[test]
    fn identical_content_has_no_hunks() {
        let text = "DB: admin\nDB: test\n";
        assert!(diff(Some(text), text, 2).is_empty());
        assert!(diff(Some(""), "", 2).is_empty());
    }

    #[test]
    fn one_line_appended() {
        let result = diff(Some("DB: admin\n"), "DB: admin\nDB: analytics\n", 2);
        assert_eq!(result.hunks.len(), 1);
        let hunk = &result.hunks[0];
        assert_eq!(hunk.header(), "@@ -1,1 +1,2 @@");
        assert_eq!(result.render(), "@@ -1,1 +1,2 @@\n DB: admin\n+DB: analytics\n");
    }

    #[test]
    fn replacement_lists_removals_before_additions() {
        let result = diff(Some("a\nb\nc\n"), "a\nx\ny\nc\n", 1);
        assert_eq!(result.hunks.len(), 1);
        assert_eq!(tags(&result.hunks[0]), " -++ ");
        assert_eq!(result.hunks[0].header(), "@@ -1,3 +1,4 @@");
    }

    #[test]
    fn context_is_bounded() {
        let old = numbered(10);
        let new = old.replace("line 5\n", "line five\n");
        let result = diff(Some(&old), &new, 2);
        assert_eq!(result.hunks.len(), 1);
        let hunk = &result.hunks[0];
        assert_eq!(tags(hunk), "  -+  ");
        assert_eq!(hunk.header(), "@@ -3,5 +3,5 @@");
    }

    #[test]
    fn context_is_clipped_at_file_edges() {
        let old = numbered(3);
        let new = old.replace("line 1\n", "line one\n");
        let result = diff(Some(&old), &new, 5);
        assert_eq!(tags(&result.hunks[0]), "-+  ");
        assert_eq!(result.hunks[0].header(), "@@ -1,3 +1,3 @@");
    }

    #[test]
    fn zero_context_shows_only_changes() {
        let old = numbered(5);
        let new = old.replace("line 3\n", "");
        let result = diff(Some(&old), &new, 0);
        assert_eq!(result.hunks.len(), 1);
        assert_eq!(tags(&result.hunks[0]), "-");
        assert_eq!(result.hunks[0].header(), "@@ -3,1 +2,0 @@");
    }

    #[test]
    fn changes_within_twice_context_merge() {
        // Gap of exactly 4 unchanged lines with context 2 merges.
        let old = numbered(12);
        let new = old
            .replace("line 3\n", "line three\n")
            .replace("line 8\n", "line eight\n");
        let result = diff(Some(&old), &new, 2);
        assert_eq!(result.hunks.len(), 1);
        assert_eq!(tags(&result.hunks[0]), "  -+    -+  ");
    }

    #[test]
    fn changes_beyond_twice_context_split() {
        // Gap of 5 unchanged lines with context 2 splits.
        let old = numbered(14);
        let new = old
            .replace("line 3\n", "line three\n")
            .replace("line 9\n", "line nine\n");
        let result = diff(Some(&old), &new, 2);
        assert_eq!(result.hunks.len(), 2);
        assert_eq!(result.hunks[0].header(), "@@ -1,5 +1,5 @@");
        assert_eq!(result.hunks[1].header(), "@@ -7,5 +7,5 @@");
        assert!(result.hunks[0].old_start + result.hunks[0].old_count <= result.hunks[1].old_start);
    }

    #[test]
    fn pure_deletion_to_empty() {
        let result = diff(Some("a\nb\n"), "", 3);
        assert_eq!(result.hunks.len(), 1);
        assert_eq!(result.hunks[0].header(), "@@ -1,2 +0,0 @@");
        assert_eq!(result.removed(), 2);
    }

    #[test]
    fn insertion_at_top_uses_zero_old_start() {
        let result = diff(Some("b\n"), "a\nb\n", 0);
        assert_eq!(result.hunks[0].header(), "@@ -0,0 +1,1 @@");
    }

    #[test]
    fn missing_final_newline_is_a_change_and_is_flagged() {
        let result = diff(Some("a\nb\n"), "a\nb", 1);
        assert_eq!(result.hunks.len(), 1);
        assert_eq!(
            result.render(),
            "@@ -1,2 +1,2 @@\n a\n-b\n+b\n\\ No newline at end of file\n"
        );
    }

    #[test]
    fn crlf_is_compared_verbatim() {
        let result = diff(Some("a\r\nb\r\n"), "a\r\nb\n", 0);
        assert_eq!(result.removed(), 1);
        assert_eq!(result.added(), 1);
        assert_eq!(result.hunks[0].lines[0].text, "b\r");
    }

    #[test]
    fn output_is_deterministic() {
        let old = "x\ny\nx\ny\nx\n";
        let new = "y\nx\ny\nx\ny\n";
        let first = diff(Some(old), new, 1).render();
        for _ in 0..10 {
            assert_eq!(diff(Some(old), new, 1).render(), first);
        }
    }

    #[test]
    fn single_move_is_one_removal_and_one_addition() {
        let result = diff(Some("a\nb\nc\n"), "b\nc\na\n", 0);
        assert_eq!(result.removed(), 1);
        assert_eq!(result.added(), 1);
    }

    #[test]
    fn large_inventory_with_changed_ends_stays_small() {
        const USERS: usize = 50_000;
        let body: String = (0..USERS)
            .map(|i| format!("USER: db=app, user=user{i:05}\n"))
            .collect();
        let old = format!("DB: admin\n{body}REPL_STAT: id=0, health=1\n");
        let new = format!("DB: analytics\n{body}REPL_STAT: id=0, health=0\n");

        let started = std::time::Instant::now();
        let result = diff(Some(&old), &new, 2);

        assert_eq!(result.hunks.len(), 2);
        assert_eq!(result.hunks[0].header(), "@@ -1,3 +1,3 @@");
        assert_eq!(tags(&result.hunks[0]), "-+  ");
        let last = USERS + 2;
        assert_eq!(
            result.hunks[1].header(),
            format!("@@ -{},3 +{},3 @@", last - 2, last - 2)
        );
        assert_eq!(result.added(), 2);
        assert_eq!(result.removed(), 2);
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[test]
    fn json_shape_uses_snake_case_tags() {
        let result = diff(None, "DB: admin", 0);
        let json = serde_json::to_value(&result).expect("json");
        assert_eq!(json["hunks"][0]["lines"][0]["tag"], "added");
        assert_eq!(json["hunks"][0]["lines"][0]["missing_newline"], true);
    }
}
