use std::fmt;

/// Machine-readable error codes surfaced next to every fatal diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    SamplingFailed,
    StorageUnavailable,
    PersistConflict,
    CorruptRecord,
    LockContention,
    RetentionIncomplete,
    ConfigInvalid,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::SamplingFailed => "E1001",
            Self::StorageUnavailable => "E2001",
            Self::PersistConflict => "E2002",
            Self::CorruptRecord => "E2003",
            Self::LockContention => "E2004",
            Self::RetentionIncomplete => "E3001",
            Self::ConfigInvalid => "E4001",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::SamplingFailed => "Inventory sampling failed",
            Self::StorageUnavailable => "Snapshot storage unavailable",
            Self::PersistConflict => "Concurrent snapshot write conflict",
            Self::CorruptRecord => "Corrupt snapshot record",
            Self::LockContention => "Lock contention",
            Self::RetentionIncomplete => "Retention left old versions behind",
            Self::ConfigInvalid => "Invalid configuration",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::SamplingFailed => {
                Some("Check --mongo-uri, credentials, and that the server is a replica set member.")
            }
            Self::StorageUnavailable => Some("Check that --data-dir exists and is writable."),
            Self::PersistConflict => {
                Some("Another mongodrift run is writing the same name; retry once it finishes.")
            }
            Self::CorruptRecord => {
                Some("Move the damaged .snapshot file out of the data directory and rerun.")
            }
            Self::LockContention => Some("Retry after the other mongodrift process releases its lock."),
            Self::RetentionIncomplete => Some("Check permissions on the data directory."),
            Self::ConfigInvalid => Some("Fix the config file or flag value and retry."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;
    use std::collections::HashSet;

    const ALL: [ErrorCode; 8] = [
        ErrorCode::SamplingFailed,
        ErrorCode::StorageUnavailable,
        ErrorCode::PersistConflict,
        ErrorCode::CorruptRecord,
        ErrorCode::LockContention,
        ErrorCode::RetentionIncomplete,
        ErrorCode::ConfigInvalid,
        ErrorCode::InternalUnexpected,
    ];

    #[test]
    fn all_codes_are_unique() {
        let mut seen = HashSet::new();
        for code in ALL {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        for code in ALL {
            let s = code.code();
            assert_eq!(s.len(), 5);
            assert!(s.starts_with('E'));
            assert!(s.chars().skip(1).all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn every_code_has_summary_and_hint() {
        for code in ALL {
            assert!(!code.message().is_empty(), "{code} has no summary");
            assert!(code.hint().is_some(), "{code} has no hint");
        }
    }
}
