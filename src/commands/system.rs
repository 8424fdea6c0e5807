// System Commands
// Handles system-level checks like FFmpeg and media-server validation

use std::time::{Duration, Instant};

use regex::Regex;
use serde::Serialize;

/// Result of probing the FFmpeg installation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegTestResult {
    pub success: bool,
    pub version: Option<String>,
    pub path: String,
    pub message: String,
}

/// Run `ffmpeg -version` and extract the version token from the banner
pub fn test_ffmpeg(ffmpeg_path: &str) -> FfmpegTestResult {
    let output = match std::process::Command::new(ffmpeg_path)
        .arg("-version")
        .output()
    {
        Ok(output) => output,
        Err(e) => {
            return FfmpegTestResult {
                success: false,
                version: None,
                path: ffmpeg_path.to_string(),
                message: format!("Cannot run ffmpeg: {e}"),
            };
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let version = parse_ffmpeg_version(&stdout);

    let banner: String = stdout.lines().take(3).collect::<Vec<_>>().join("\n");

    FfmpegTestResult {
        success: output.status.success(),
        version,
        path: ffmpeg_path.to_string(),
        message: banner,
    }
}

fn parse_ffmpeg_version(banner: &str) -> Option<String> {
    let re = Regex::new(r"ffmpeg version (\S+)").ok()?;
    re.captures(banner).map(|c| c[1].to_string())
}

/// Result of testing the media server's RTMP port
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtmpTestResult {
    pub success: bool,
    pub message: String,
    /// Time taken in milliseconds
    pub latency_ms: Option<u64>,
}

/// Test RTMP ingest connectivity with a plain TCP connection attempt
pub fn test_rtmp_endpoint(host: &str, port: u16) -> RtmpTestResult {
    use std::net::TcpStream;

    let start = Instant::now();
    let addr = format!("{host}:{port}");
    let parsed = match addr.parse() {
        Ok(parsed) => parsed,
        Err(e) => {
            return RtmpTestResult {
                success: false,
                message: format!("Invalid address {addr}: {e}"),
                latency_ms: None,
            };
        }
    };

    match TcpStream::connect_timeout(&parsed, Duration::from_secs(5)) {
        Ok(_) => RtmpTestResult {
            success: true,
            message: format!("RTMP port reachable at {addr}"),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(e) => RtmpTestResult {
            success: false,
            message: format!("Cannot reach {addr} - {e}"),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ffmpeg_version() {
        let banner = "ffmpeg version 6.1.1-3ubuntu5 Copyright (c) 2000-2023 the FFmpeg developers";
        assert_eq!(parse_ffmpeg_version(banner).as_deref(), Some("6.1.1-3ubuntu5"));
        assert_eq!(parse_ffmpeg_version("no banner here"), None);
    }

    #[test]
    fn test_unreachable_rtmp_endpoint() {
        // Port 1 on loopback is essentially never listening
        let result = test_rtmp_endpoint("127.0.0.1", 1);
        assert!(!result.success);
    }
}
