// Job Error Types
// Failure taxonomy shared by the orchestration services

use thiserror::Error;

/// Errors surfaced by subprocess-orchestration operations.
///
/// Every variant resolves the owning state machine back to a queryable
/// terminal state; none of these crash the orchestrator.
#[derive(Error, Debug)]
pub enum JobError {
    /// Rejected before any subprocess was spawned
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Source file missing, checked before spawn
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// The binary could not be launched at all
    #[error("Failed to launch {binary}: {message}")]
    SpawnFailure { binary: String, message: String },

    /// The subprocess exited non-zero or produced an implausible result;
    /// carries the tail of its diagnostic output
    #[error("Process failed: {0}")]
    ProcessFailure(String),

    /// A singleton resource (stream, batch) was asked to start while busy
    #[error("Already running")]
    AlreadyRunning,
}

impl JobError {
    pub fn spawn(binary: &str, err: &std::io::Error) -> Self {
        Self::SpawnFailure {
            binary: binary.to_string(),
            message: err.to_string(),
        }
    }
}

/// Keep the last `limit` lines of subprocess diagnostics for error reporting.
pub fn diagnostic_tail(output: &str, limit: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(limit);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_tail() {
        let output = "a\nb\nc\nd";
        assert_eq!(diagnostic_tail(output, 2), "c\nd");
        assert_eq!(diagnostic_tail(output, 10), "a\nb\nc\nd");
        assert_eq!(diagnostic_tail("", 3), "");
    }
}
