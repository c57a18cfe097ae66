//! Append-only run log for auditing agent invocations.
//!
//! Each invocation writes a header line followed by the raw captured output:
//!
//! ```text
//! === 2025-01-31 14:02:11 | docs/tasks/0001-setup.md | attempt 1 ===
//! <agent stdout><agent stderr>
//! ```
//!
//! The header is written before the agent starts, so a killed run still shows
//! which attempt was in flight.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One invocation as it appears in the log.
#[derive(Debug, Clone)]
pub struct InvocationRecord<'a> {
    pub label: &'a str,
    pub attempt: u32,
    pub timestamp: DateTime<Local>,
}

impl InvocationRecord<'_> {
    pub fn header(&self) -> String {
        format!(
            "=== {} | {} | attempt {} ===\n",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.label,
            self.attempt
        )
    }
}

#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn begin(&self, record: &InvocationRecord<'_>) -> Result<()> {
        self.append(&record.header())
    }

    /// Append raw agent output, terminated with a newline.
    pub fn append_output(&self, text: &str) -> Result<()> {
        if text.ends_with('\n') {
            self.append(text)
        } else {
            self.append(&format!("{text}\n"))
        }
    }

    /// Record an invocation that failed before producing output.
    pub fn append_exception(&self, err: &anyhow::Error) -> Result<()> {
        self.append_output(&format!(
            "[exception] agent invocation failed\n{err:?}"
        ))
    }

    fn append(&self, text: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create log dir {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open run log {}", self.path.display()))?;
        file.write_all(text.as_bytes())
            .with_context(|| format!("write run log {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn timestamp() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2025, 1, 31, 14, 2, 11)
            .single()
            .expect("valid local time")
    }

    #[test]
    fn header_format_is_stable() {
        let record = InvocationRecord {
            label: "docs/tasks/0001-a.md",
            attempt: 2,
            timestamp: timestamp(),
        };
        assert_eq!(
            record.header(),
            "=== 2025-01-31 14:02:11 | docs/tasks/0001-a.md | attempt 2 ===\n"
        );
    }

    #[test]
    fn appends_header_and_output_creating_dirs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::new(temp.path().join("docs/logs/agent-run.log"));
        let record = InvocationRecord {
            label: "task 1",
            attempt: 1,
            timestamp: timestamp(),
        };
        log.begin(&record).expect("begin");
        log.append_output("no newline").expect("output");
        log.begin(&InvocationRecord {
            attempt: 2,
            ..record
        })
        .expect("begin");
        log.append_output("with newline\n").expect("output");

        let contents = fs::read_to_string(log.path()).expect("read");
        assert_eq!(
            contents,
            "=== 2025-01-31 14:02:11 | task 1 | attempt 1 ===\nno newline\n\
             === 2025-01-31 14:02:11 | task 1 | attempt 2 ===\nwith newline\n"
        );
    }

    #[test]
    fn exception_entry_includes_error_chain() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::new(temp.path().join("run.log"));
        let err = anyhow::anyhow!("No such file or directory").context("spawn command");
        log.append_exception(&err).expect("exception");

        let contents = fs::read_to_string(log.path()).expect("read");
        assert!(contents.starts_with("[exception] agent invocation failed\n"));
        assert!(contents.contains("spawn command"));
        assert!(contents.contains("No such file or directory"));
        assert!(contents.ends_with('\n'));
    }
}
