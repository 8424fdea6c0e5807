// Preview Models
// Session lifecycle states for browser preview preparation

use serde::{Deserialize, Serialize};

/// How a preview working file was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewStrategy {
    /// Container change only, streams copied verbatim
    Remux,
    /// Full re-encode fallback for incompatible codecs
    Transcode,
}

/// Observable state of a preview session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewState {
    None,
    Preparing,
    Ready,
}

/// Result of a begin-preview request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BeginPreviewOutcome {
    /// A working file for this exact source already exists
    Ready,
    /// A preparation subprocess is already active for this session
    Preparing,
    /// Preparation was kicked off; poll for completion
    Started,
    /// The source is natively browser-playable, nothing to do
    NotNeeded,
}
