// Media Probe Service
// ffprobe-based format detection for the preview and batch pipelines

use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tokio::process::Command;

use crate::services::FfmpegLocator;

/// Container identifier ffprobe reports for standard browser-playable MP4
const STANDARD_MP4_FORMAT: &str = "mov,mp4,m4a,3gp,3g2,mj2";

/// Result of a container-format probe
#[derive(Debug, Clone)]
pub struct FormatInfo {
    pub format_name: String,
}

impl FormatInfo {
    /// Multiplexed MPEG program/transport streams (DVR exports, .ts captures)
    pub fn is_mpeg_program_stream(&self) -> bool {
        self.format_name.contains("mpeg")
    }

    pub fn is_standard_mp4(&self) -> bool {
        self.format_name == STANDARD_MP4_FORMAT
    }
}

/// Decide whether a source needs the remux/transcode pipeline before the
/// browser can play it. A failed probe counts as "needs reprocessing".
pub fn needs_reprocessing(probe: Option<&FormatInfo>) -> bool {
    match probe {
        None => true,
        Some(info) => info.is_mpeg_program_stream() || !info.is_standard_mp4(),
    }
}

/// Metadata reported for the player UI
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub duration: f64,
    pub duration_str: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u64>,
}

/// Probes media files via ffprobe, with an ffmpeg banner-scrape fallback for
/// files ffprobe cannot parse
pub struct MediaProbe {
    locator: Arc<FfmpegLocator>,
}

impl MediaProbe {
    pub fn new(locator: Arc<FfmpegLocator>) -> Self {
        Self { locator }
    }

    /// Probe the container format. Returns None when the probe fails, which
    /// callers treat as "needs reprocessing".
    pub async fn probe_format(&self, path: &Path) -> Option<FormatInfo> {
        let output = Command::new(self.locator.ffprobe_path())
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(path)
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            return None;
        }

        let info: Value = serde_json::from_slice(&output.stdout).ok()?;
        let format_name = info
            .get("format")
            .and_then(|f| f.get("format_name"))
            .and_then(|n| n.as_str())?
            .to_string();

        Some(FormatInfo { format_name })
    }

    /// Whether the source must run through the preview pipeline
    pub async fn needs_reprocessing(&self, path: &Path) -> bool {
        needs_reprocessing(self.probe_format(path).await.as_ref())
    }

    /// Full metadata probe for the player UI
    pub async fn video_info(&self, path: &Path) -> Result<VideoInfo, String> {
        let output = Command::new(self.locator.ffprobe_path())
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| format!("Failed to run ffprobe: {e}"))?;

        if output.status.success() {
            if let Some(info) = parse_probe_info(&output.stdout) {
                return Ok(info);
            }
        }

        // Non-standard containers sometimes defeat ffprobe; scrape the plain
        // ffmpeg banner for duration and resolution instead.
        self.banner_fallback(path).await
    }

    async fn banner_fallback(&self, path: &Path) -> Result<VideoInfo, String> {
        let output = Command::new(self.locator.ffmpeg_path())
            .arg("-i")
            .arg(path)
            .output()
            .await
            .map_err(|e| format!("Failed to run ffmpeg: {e}"))?;

        // ffmpeg -i with no output file always exits non-zero; the banner on
        // stderr is what we want.
        let banner = String::from_utf8_lossy(&output.stderr);
        parse_banner(&banner)
            .ok_or_else(|| "Could not determine video info (unrecognized format)".to_string())
    }
}

fn parse_probe_info(stdout: &[u8]) -> Option<VideoInfo> {
    let info: Value = serde_json::from_slice(stdout).ok()?;

    let duration = info
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|d| d.as_str())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let bitrate = info
        .get("format")
        .and_then(|f| f.get("bit_rate"))
        .and_then(|b| b.as_str())
        .and_then(|b| b.parse::<u64>().ok());

    let video_stream = info
        .get("streams")
        .and_then(|s| s.as_array())
        .and_then(|streams| {
            streams.iter().find(|s| {
                s.get("codec_type").and_then(|t| t.as_str()) == Some("video")
            })
        });

    Some(VideoInfo {
        duration,
        duration_str: format_duration(duration),
        width: video_stream
            .and_then(|s| s.get("width"))
            .and_then(|w| w.as_u64())
            .map(|w| w as u32),
        height: video_stream
            .and_then(|s| s.get("height"))
            .and_then(|h| h.as_u64())
            .map(|h| h as u32),
        codec: video_stream
            .and_then(|s| s.get("codec_name"))
            .and_then(|c| c.as_str())
            .map(|c| c.to_string()),
        bitrate,
    })
}

fn parse_banner(banner: &str) -> Option<VideoInfo> {
    let duration_re = Regex::new(r"Duration: (\d{2,}):(\d{2}):(\d{2})\.(\d{2})").ok()?;
    let captures = duration_re.captures(banner)?;

    let hours: f64 = captures[1].parse().ok()?;
    let minutes: f64 = captures[2].parse().ok()?;
    let seconds: f64 = captures[3].parse().ok()?;
    let duration = hours * 3600.0 + minutes * 60.0 + seconds;

    let resolution_re = Regex::new(r"(\d{3,4})x(\d{3,4})").ok()?;
    let (width, height) = match resolution_re.captures(banner) {
        Some(res) => (res[1].parse().ok(), res[2].parse().ok()),
        None => (None, None),
    };

    Some(VideoInfo {
        duration,
        duration_str: format_duration(duration),
        width,
        height,
        codec: None,
        bitrate: None,
    })
}

/// Format seconds as HH:MM:SS for display and for ffmpeg -ss/-to arguments
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    format!("{h:02}:{m:02}:{s:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_reprocessing_decision() {
        assert!(needs_reprocessing(None));

        let mpeg_ps = FormatInfo {
            format_name: "mpeg".to_string(),
        };
        assert!(needs_reprocessing(Some(&mpeg_ps)));

        let mpegts = FormatInfo {
            format_name: "mpegts".to_string(),
        };
        assert!(needs_reprocessing(Some(&mpegts)));

        let mkv = FormatInfo {
            format_name: "matroska,webm".to_string(),
        };
        assert!(needs_reprocessing(Some(&mkv)));

        let mp4 = FormatInfo {
            format_name: STANDARD_MP4_FORMAT.to_string(),
        };
        assert!(!needs_reprocessing(Some(&mp4)));
    }

    #[test]
    fn test_parse_probe_info() {
        let stdout = br#"{
            "format": {"duration": "125.500000", "bit_rate": "1500000"},
            "streams": [
                {"codec_type": "audio", "codec_name": "aac"},
                {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080}
            ]
        }"#;

        let info = parse_probe_info(stdout).unwrap();
        assert_eq!(info.duration, 125.5);
        assert_eq!(info.duration_str, "00:02:05");
        assert_eq!(info.width, Some(1920));
        assert_eq!(info.height, Some(1080));
        assert_eq!(info.codec.as_deref(), Some("h264"));
        assert_eq!(info.bitrate, Some(1_500_000));
    }

    #[test]
    fn test_parse_banner() {
        let banner = "Input #0, mpegts, from 'a.ts':\n  Duration: 01:02:03.04, start: 1.4, bitrate: 4213 kb/s\n    Stream #0:0: Video: h264, yuv420p, 1280x720, 25 fps";
        let info = parse_banner(banner).unwrap();

        assert_eq!(info.duration, 3723.0);
        assert_eq!(info.width, Some(1280));
        assert_eq!(info.height, Some(720));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "00:00:00");
        assert_eq!(format_duration(61.9), "00:01:01");
        assert_eq!(format_duration(3723.0), "01:02:03");
    }
}
