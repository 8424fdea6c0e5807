// Playback Models
// Options and status snapshots for the re-broadcast stream

use serde::{Deserialize, Serialize};

use crate::models::StreamStats;

/// Playback speeds the stream controller accepts
pub const SUPPORTED_SPEEDS: &[f64] = &[0.5, 0.75, 1.0, 1.25, 1.5, 2.0, 4.0];

/// Options preserved across pause/resume/seek
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackOptions {
    /// Speed multiplier, one of [`SUPPORTED_SPEEDS`]
    pub speed: f64,

    /// Stop offset in seconds (0.0 = play until end of source)
    #[serde(default)]
    pub end_offset: f64,

    /// Restart the source indefinitely when it ends
    #[serde(default, rename = "loop")]
    pub loop_playback: bool,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            speed: 1.0,
            end_offset: 0.0,
            loop_playback: false,
        }
    }
}

impl PlaybackOptions {
    /// Whether the speed is in the supported enumerated set
    pub fn speed_supported(&self) -> bool {
        SUPPORTED_SPEEDS
            .iter()
            .any(|s| (s - self.speed).abs() < f64::EPSILON)
    }
}

/// Point-in-time snapshot returned by stream status polls
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    pub active: bool,
    pub paused: bool,

    /// Source currently being re-broadcast (empty when idle)
    pub source: String,

    /// Estimated playback position in seconds
    pub current_time: f64,

    /// Times the looping subprocess has wrapped back to the start
    pub loop_count: u64,

    pub options: PlaybackOptions,
    pub stats: StreamStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_validation() {
        let mut opts = PlaybackOptions::default();
        assert!(opts.speed_supported());

        opts.speed = 4.0;
        assert!(opts.speed_supported());

        opts.speed = 3.0;
        assert!(!opts.speed_supported());
    }
}
