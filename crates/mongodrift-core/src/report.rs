//! Drift report rendering (text and JSON).

use std::fmt::Write as _;
use std::io::{self, Write};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::diff::DiffResult;
use crate::store::VersionRecord;

/// Identifies the stored version a report compares against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviousVersion {
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentCapture {
    pub captured_at: DateTime<Utc>,
}

/// Everything one comparison produced, ready to print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub name: String,
    pub previous: Option<PreviousVersion>,
    pub current: CurrentCapture,
    pub added: usize,
    pub removed: usize,
    #[serde(flatten)]
    pub diff: DiffResult,
}

impl DriftReport {
    #[must_use]
    pub fn new(
        name: &str,
        previous: Option<&VersionRecord>,
        captured_at: DateTime<Utc>,
        diff: DiffResult,
    ) -> Self {
        Self {
            name: name.to_string(),
            previous: previous.map(|rec| PreviousVersion {
                sequence: rec.sequence,
                captured_at: rec.captured_at,
            }),
            current: CurrentCapture { captured_at },
            added: diff.added(),
            removed: diff.removed(),
            diff,
        }
    }

    /// True when a previous version exists and nothing changed.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.previous.is_some() && self.diff.is_empty()
    }

    /// Unified-diff style text with `---`/`+++` headers.
    #[must_use]
    pub fn render_text(&self) -> String {
        if let Some(prev) = self.previous.as_ref().filter(|_| self.diff.is_empty()) {
            return format!("no changes since {}@{}\n", self.name, prev.sequence);
        }

        let mut out = String::new();
        let _ = match &self.previous {
            Some(prev) => writeln!(
                out,
                "--- {}@{} {}",
                self.name,
                prev.sequence,
                stamp(prev.captured_at)
            ),
            None => writeln!(out, "--- /dev/null"),
        };
        let _ = writeln!(out, "+++ {} {}", self.name, stamp(self.current.captured_at));
        out.push_str(&self.diff.render());
        out
    }

    /// Write the text rendering to `w`.
    ///
    /// # Errors
    ///
    /// Propagates write failures.
    pub fn write_text(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_all(self.render_text().as_bytes())
    }

    /// Write the report as one pretty-printed JSON object plus newline.
    ///
    /// # Errors
    ///
    /// Propagates serialization and write failures.
    pub fn write_json(&self, w: &mut dyn Write) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut *w, self)?;
        writeln!(w)
    }
}

fn stamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
