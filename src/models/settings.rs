// Settings Model
// Application-wide configuration

use serde::{Deserialize, Serialize};

fn default_log_retention_days() -> u32 {
    30
}

fn default_ffmpeg_path() -> String {
    String::new()
}

fn default_output_dir() -> String {
    String::new()
}

fn default_backend_host() -> String {
    "127.0.0.1".to_string()
}

fn default_backend_port() -> u16 {
    3000
}

fn default_rtmp_port() -> u16 {
    1935
}

fn default_media_server_api_port() -> u16 {
    9997
}

fn default_stream_name() -> String {
    "live".to_string()
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    // FFmpeg
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    // Clip output directory ("" = <data dir>/output)
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    // File browser
    #[serde(default)]
    pub last_browse_path: String,

    // Log retention
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,

    // Local host server (HTTP/WS)
    #[serde(default)]
    pub backend_remote_enabled: bool,
    #[serde(default = "default_backend_host")]
    pub backend_host: String,
    #[serde(default = "default_backend_port")]
    pub backend_port: u16,
    #[serde(default)]
    pub backend_token: String,

    // Media server (RTMP re-broadcast)
    #[serde(default)]
    pub media_server_path: String,
    #[serde(default = "default_rtmp_port")]
    pub rtmp_port: u16,
    #[serde(default = "default_media_server_api_port")]
    pub media_server_api_port: u16,
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ffmpeg_path: String::new(),
            output_dir: String::new(),
            last_browse_path: String::new(),
            log_retention_days: default_log_retention_days(),
            backend_remote_enabled: false,
            backend_host: default_backend_host(),
            backend_port: default_backend_port(),
            backend_token: String::new(),
            media_server_path: String::new(),
            rtmp_port: default_rtmp_port(),
            media_server_api_port: default_media_server_api_port(),
            stream_name: default_stream_name(),
        }
    }
}
