// StreamStats Model
// Structured FFmpeg progress telemetry for the re-broadcast stream

use serde::{Deserialize, Serialize};

/// Running statistics snapshot folded from FFmpeg stderr output
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    /// Cumulative frame count
    pub frame: u64,

    /// Frames per second
    pub fps: f64,

    /// Current bitrate in kbps
    pub bitrate: f64,

    /// Encoding speed reported by FFmpeg (1.0x = real-time)
    pub speed: f64,

    /// Cumulative bytes emitted
    pub size: u64,

    /// Elapsed stream time in seconds
    pub time: f64,

    /// Number of dropped frames
    pub dropped_frames: u64,
}

impl StreamStats {
    /// Fold a parsed telemetry update into the running snapshot.
    /// Tokens absent from the update leave their fields untouched.
    pub fn apply(&mut self, update: &TelemetryUpdate) {
        if let Some(frame) = update.frame {
            self.frame = frame;
        }
        if let Some(fps) = update.fps {
            self.fps = fps;
        }
        if let Some(bitrate) = update.bitrate {
            self.bitrate = bitrate;
        }
        if let Some(speed) = update.speed {
            self.speed = speed;
        }
        if let Some(size) = update.size {
            self.size = size;
        }
        if let Some(time) = update.time {
            self.time = time;
        }
        if let Some(dropped) = update.dropped_frames {
            self.dropped_frames = dropped;
        }

        // FFmpeg reports "bitrate=N/A" for some muxers; derive an average instead.
        if self.bitrate == 0.0 && self.size > 0 && self.time > 0.0 {
            let avg_kbps = (self.size as f64 * 8.0) / 1000.0 / self.time;
            if avg_kbps.is_finite() && avg_kbps > 0.0 {
                self.bitrate = avg_kbps;
            }
        }
    }
}

/// The subset of telemetry tokens found in one chunk of FFmpeg stderr text.
/// FFmpeg emits lines like:
/// frame= 1234 fps= 60 q=28.0 size=   12345kB time=00:01:23.45 bitrate=1234.5kbits/s speed=1.0x
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryUpdate {
    pub frame: Option<u64>,
    pub fps: Option<f64>,
    pub bitrate: Option<f64>,
    pub speed: Option<f64>,
    pub size: Option<u64>,
    pub time: Option<f64>,
    pub dropped_frames: Option<u64>,
}

impl TelemetryUpdate {
    /// Parse one chunk of FFmpeg diagnostic text. Missing tokens are not an
    /// error, just missing telemetry for that interval.
    pub fn parse(chunk: &str) -> Self {
        let mut update = Self::default();

        if let Some(value) = extract_value(chunk, "frame=") {
            update.frame = value.parse::<u64>().ok();
        }

        if let Some(value) = extract_value(chunk, "fps=") {
            update.fps = value.parse::<f64>().ok();
        }

        if let Some(value) = extract_value(chunk, "bitrate=") {
            update.bitrate = parse_bitrate_kbps(&value);
        }

        if let Some(value) = extract_value(chunk, "speed=") {
            let speed = value.replace('x', "");
            update.speed = speed.trim().parse::<f64>().ok();
        }

        // Plain stats lines report "size=", -progress output reports "total_size=" in bytes
        if let Some(value) = extract_value(chunk, "total_size=") {
            update.size = value.trim().parse::<u64>().ok();
        } else if let Some(value) = extract_value(chunk, "size=") {
            update.size = parse_size_bytes(&value);
        }

        if let Some(value) = extract_value(chunk, "out_time=") {
            update.time = parse_time(&value);
        } else if let Some(value) = extract_value(chunk, "time=") {
            update.time = parse_time(&value);
        }

        if let Some(value) = extract_value(chunk, "drop_frames=") {
            update.dropped_frames = value.parse::<u64>().ok();
        } else if let Some(value) = extract_value(chunk, "drop=") {
            update.dropped_frames = value.parse::<u64>().ok();
        }

        update
    }

    /// True if no token was recognized in the chunk.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Extract the value following a key in FFmpeg output. The key must start a
/// token, so "frame=" does not match inside "drop_frames=".
fn extract_value(line: &str, key: &str) -> Option<String> {
    let mut search_from = 0;
    while let Some(pos) = line[search_from..].find(key) {
        let start = search_from + pos;
        let at_token_start = start == 0
            || line[..start]
                .chars()
                .next_back()
                .map(|c| c.is_whitespace())
                .unwrap_or(true);

        if at_token_start {
            let value_start = start + key.len();
            let rest = line[value_start..].trim_start();

            let end = rest.find(|c: char| c.is_whitespace()).unwrap_or(rest.len());
            return Some(rest[..end].trim().to_string());
        }

        search_from = start + key.len();
    }
    None
}

/// Parse a time string (HH:MM:SS.ms) to seconds
fn parse_time(time_str: &str) -> Option<f64> {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Parse a bitrate string to kbps.
fn parse_bitrate_kbps(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("N/A") {
        return None;
    }

    let lower = trimmed.to_ascii_lowercase();
    let (num_str, scale) = if let Some(v) = lower.strip_suffix("kbits/s") {
        (v, 1.0)
    } else if let Some(v) = lower.strip_suffix("kbit/s") {
        (v, 1.0)
    } else if let Some(v) = lower.strip_suffix("kb/s") {
        (v, 1.0)
    } else if let Some(v) = lower.strip_suffix("mbits/s") {
        (v, 1000.0)
    } else if let Some(v) = lower.strip_suffix("mbit/s") {
        (v, 1000.0)
    } else if let Some(v) = lower.strip_suffix("bits/s") {
        (v, 1.0 / 1000.0)
    } else {
        (trimmed, 1.0)
    };

    num_str.trim().parse::<f64>().ok().map(|v| v * scale)
}

/// Parse a size string to bytes.
fn parse_size_bytes(value: &str) -> Option<u64> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("N/A") {
        return None;
    }

    let lower = trimmed.to_ascii_lowercase();
    let (num_str, scale) = if let Some(v) = lower.strip_suffix("kib") {
        (v, 1024.0)
    } else if let Some(v) = lower.strip_suffix("kb") {
        (v, 1024.0)
    } else if let Some(v) = lower.strip_suffix("mib") {
        (v, 1024.0 * 1024.0)
    } else if let Some(v) = lower.strip_suffix("mb") {
        (v, 1024.0 * 1024.0)
    } else if let Some(v) = lower.strip_suffix('b') {
        (v, 1.0)
    } else {
        (trimmed, 1.0)
    };

    num_str.trim().parse::<f64>().ok().map(|v| (v * scale) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stats_line() {
        let line =
            "frame= 1234 fps= 60 q=28.0 size=   12345kB time=00:01:23.45 bitrate=1234.5kbits/s speed=1.0x";
        let update = TelemetryUpdate::parse(line);

        assert_eq!(update.frame, Some(1234));
        assert_eq!(update.fps, Some(60.0));
        assert_eq!(update.bitrate, Some(1234.5));
        assert_eq!(update.speed, Some(1.0));
        assert_eq!(update.size, Some(12345 * 1024));
        assert_eq!(update.time, Some(83.45));
    }

    #[test]
    fn test_parse_progress_output() {
        let chunk = "total_size=5242880\nout_time=00:00:10.00\ndrop_frames=3";
        let update = TelemetryUpdate::parse(chunk);

        assert_eq!(update.size, Some(5_242_880));
        assert_eq!(update.time, Some(10.0));
        assert_eq!(update.dropped_frames, Some(3));
        // "frame=" must not match inside "drop_frames="
        assert_eq!(update.frame, None);
    }

    #[test]
    fn test_missing_tokens_are_not_errors() {
        let update = TelemetryUpdate::parse("Press [q] to stop, [?] for help");
        assert!(update.is_empty());
    }

    #[test]
    fn test_na_bitrate_ignored() {
        let update = TelemetryUpdate::parse("time=00:00:05.00 bitrate=N/A speed=2.01x");
        assert_eq!(update.bitrate, None);
        assert_eq!(update.time, Some(5.0));
        assert_eq!(update.speed, Some(2.01));
    }

    #[test]
    fn test_apply_preserves_unreported_fields() {
        let mut stats = StreamStats {
            frame: 100,
            fps: 30.0,
            ..Default::default()
        };
        stats.apply(&TelemetryUpdate::parse("time=00:00:04.00"));

        assert_eq!(stats.frame, 100);
        assert_eq!(stats.fps, 30.0);
        assert_eq!(stats.time, 4.0);
    }

    #[test]
    fn test_apply_derives_average_bitrate() {
        let mut stats = StreamStats::default();
        stats.apply(&TelemetryUpdate::parse("total_size=1000000\nout_time=00:00:08.00"));

        // 1 MB over 8 seconds = 1000 kbps
        assert!((stats.bitrate - 1000.0).abs() < 0.01);
    }
}
