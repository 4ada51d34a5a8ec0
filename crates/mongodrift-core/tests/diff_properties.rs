use mongodrift_core::diff::{DiffResult, LineTag, diff};
use proptest::prelude::*;

/// Rebuild `new` from `old` by replaying every hunk.
fn apply(old: &str, result: &DiffResult) -> String {
    let old_lines: Vec<&str> = old.split_inclusive('\n').collect();
    let mut out = String::new();
    let mut cursor = 0usize;

    for hunk in &result.hunks {
        let first = if hunk.old_count == 0 {
            hunk.old_start
        } else {
            hunk.old_start - 1
        };
        for line in &old_lines[cursor..first] {
            out.push_str(line);
        }
        cursor = first;

        for line in &hunk.lines {
            let full = if line.missing_newline {
                line.text.clone()
            } else {
                format!("{}\n", line.text)
            };
            match line.tag {
                LineTag::Context => {
                    assert_eq!(old_lines[cursor], full, "context must match old");
                    out.push_str(&full);
                    cursor += 1;
                }
                LineTag::Removed => {
                    assert_eq!(old_lines[cursor], full, "removed must match old");
                    cursor += 1;
                }
                LineTag::Added => out.push_str(&full),
            }
        }
    }
    for line in &old_lines[cursor..] {
        out.push_str(line);
    }
    out
}

fn arb_text() -> impl Strategy<Value = String> {
    (
        prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "DB: admin"]), 0..24),
        any::<bool>(),
    )
        .prop_map(|(lines, trailing)| {
            let mut text = lines.join("\n");
            if trailing && !text.is_empty() {
                text.push('\n');
            }
            text
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn replaying_hunks_reproduces_new(old in arb_text(), new in arb_text(), ctx in 0usize..4) {
        let result = diff(Some(&old), &new, ctx);
        prop_assert_eq!(apply(&old, &result), new);
    }

    #[test]
    fn identical_inputs_have_no_hunks(text in arb_text(), ctx in 0usize..4) {
        prop_assert!(diff(Some(&text), &text, ctx).is_empty());
    }

    #[test]
    fn hunks_are_ordered_and_disjoint(old in arb_text(), new in arb_text(), ctx in 0usize..4) {
        let result = diff(Some(&old), &new, ctx);
        for pair in result.hunks.windows(2) {
            let prev_end = pair[0].old_start + pair[0].old_count;
            prop_assert!(pair[1].old_start >= prev_end);
            prop_assert!(pair[1].new_start >= pair[0].new_start + pair[0].new_count);
        }
    }

    #[test]
    fn context_runs_are_bounded(old in arb_text(), new in arb_text(), ctx in 0usize..4) {
        let result = diff(Some(&old), &new, ctx);
        for hunk in &result.hunks {
            let lead = hunk.lines.iter().take_while(|l| l.tag == LineTag::Context).count();
            let tail = hunk.lines.iter().rev().take_while(|l| l.tag == LineTag::Context).count();
            prop_assert!(lead <= ctx);
            prop_assert!(tail <= ctx);
            prop_assert!(hunk.lines.iter().any(|l| l.tag != LineTag::Context));
        }
    }

    #[test]
    fn counts_match_hunk_bodies(old in arb_text(), new in arb_text(), ctx in 0usize..4) {
        let result = diff(Some(&old), &new, ctx);
        for hunk in &result.hunks {
            let old_side = hunk.lines.iter().filter(|l| l.tag != LineTag::Added).count();
            let new_side = hunk.lines.iter().filter(|l| l.tag != LineTag::Removed).count();
            prop_assert_eq!(hunk.old_count, old_side);
            prop_assert_eq!(hunk.new_count, new_side);
        }
    }
}

#[test]
fn first_run_adds_everything() {
    let result = diff(None, "DB: admin\nDB: local\n", 2);
    assert_eq!(result.hunks.len(), 1);
    assert_eq!(result.hunks[0].header(), "@@ -0,0 +1,2 @@");
    assert_eq!(apply("", &result), "DB: admin\nDB: local\n");
}
