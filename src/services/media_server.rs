// Media Server Service
// Manages the MediaMTX RTMP server process lifecycle

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::RwLock;

use crate::services::SettingsManager;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Manages the external RTMP ingest/playback server. The stream controller
/// publishes into it; viewers connect to it. This service only starts and
/// stops the process and reports readiness.
pub struct MediaServer {
    child: RwLock<Option<Child>>,
    settings: Arc<SettingsManager>,
    is_available: AtomicBool,
    http: reqwest::Client,
}

impl MediaServer {
    pub fn new(settings: Arc<SettingsManager>) -> Self {
        Self {
            child: RwLock::new(None),
            settings,
            is_available: AtomicBool::new(false),
            http: reqwest::Client::new(),
        }
    }

    /// Find the MediaMTX binary.
    /// Checks in order: settings, env var, sidecar location, PATH
    pub fn find_binary(&self) -> Option<PathBuf> {
        if let Ok(settings) = self.settings.load() {
            let custom = settings.media_server_path.trim();
            if !custom.is_empty() {
                let path = PathBuf::from(custom);
                if path.exists() {
                    return Some(path);
                }
                log::warn!("Configured media server path does not exist: {custom}");
            }
        }

        if let Ok(env_path) = std::env::var("VODCAST_MEDIAMTX_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                log::debug!("Found mediamtx via VODCAST_MEDIAMTX_PATH: {:?}", path);
                return Some(path);
            }
        }

        // Sidecar location (next to our executable)
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let name = if cfg!(windows) { "mediamtx.exe" } else { "mediamtx" };
                let sidecar = exe_dir.join(name);
                if sidecar.exists() {
                    log::debug!("Found mediamtx as sidecar: {:?}", sidecar);
                    return Some(sidecar);
                }
            }
        }

        if let Ok(which_path) = which::which("mediamtx") {
            log::debug!("Found mediamtx in PATH: {:?}", which_path);
            return Some(which_path);
        }

        log::warn!("mediamtx binary not found in any location");
        None
    }

    /// Start the media server process and wait until its API answers
    pub async fn start(&self) -> Result<(), String> {
        if self.is_available() {
            log::debug!("Media server is already running");
            return Ok(());
        }

        let binary_path = self
            .find_binary()
            .ok_or_else(|| "mediamtx binary not found".to_string())?;

        let settings = self.settings.load()?;
        log::info!("Starting media server from: {:?}", binary_path);

        // MediaMTX wants a config file; keep only RTMP ingest and the API
        let config_content = format!(
            "api: yes\napiAddress: 127.0.0.1:{}\nrtmp: yes\nrtmpAddress: :{}\nrtsp: no\nhls: no\nwebrtc: no\nsrt: no\n",
            settings.media_server_api_port, settings.rtmp_port
        );

        let config_path =
            std::env::temp_dir().join(format!("mediamtx-{}.yml", settings.rtmp_port));
        let mut config_file = std::fs::File::create(&config_path)
            .map_err(|e| format!("Failed to create media server config: {e}"))?;
        config_file
            .write_all(config_content.as_bytes())
            .map_err(|e| format!("Failed to write media server config: {e}"))?;

        let child = Command::new(&binary_path)
            .arg(&config_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("Failed to spawn mediamtx: {e}"))?;

        *self.child.write().await = Some(child);

        // Wait for the API to come up
        let start_time = std::time::Instant::now();
        loop {
            if start_time.elapsed() > STARTUP_TIMEOUT {
                self.stop().await;
                return Err("Media server startup timeout".to_string());
            }

            if self.probe_api().await {
                self.is_available.store(true, Ordering::SeqCst);
                log::info!(
                    "Media server started (rtmp port {}, api port {})",
                    settings.rtmp_port,
                    settings.media_server_api_port
                );
                return Ok(());
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Stop the media server process
    pub async fn stop(&self) {
        self.is_available.store(false, Ordering::SeqCst);

        let mut child_guard = self.child.write().await;
        if let Some(mut child) = child_guard.take() {
            log::info!("Stopping media server process");
            let _ = child.kill().await;
        }
    }

    /// Readiness as of the last health check
    pub fn is_available(&self) -> bool {
        self.is_available.load(Ordering::SeqCst)
    }

    /// Perform a health check against the API, demoting availability on failure
    pub async fn health_check(&self) -> bool {
        if !self.is_available.load(Ordering::SeqCst) {
            return false;
        }

        let healthy = tokio::time::timeout(HEALTH_CHECK_TIMEOUT, self.probe_api())
            .await
            .unwrap_or(false);

        if !healthy {
            self.is_available.store(false, Ordering::SeqCst);
        }

        healthy
    }

    /// RTMP URL the stream controller publishes to
    pub fn publish_url(&self) -> String {
        let (rtmp_port, stream_name) = self.stream_endpoint();
        format!("rtmp://127.0.0.1:{rtmp_port}/{stream_name}")
    }

    /// Externally reachable RTMP URL viewers play from
    pub fn play_url(&self) -> String {
        let host = self
            .settings
            .load()
            .map(|s| {
                if s.backend_remote_enabled {
                    s.backend_host
                } else {
                    "127.0.0.1".to_string()
                }
            })
            .unwrap_or_else(|_| "127.0.0.1".to_string());

        let (rtmp_port, stream_name) = self.stream_endpoint();
        format!("rtmp://{host}:{rtmp_port}/{stream_name}")
    }

    fn stream_endpoint(&self) -> (u16, String) {
        match self.settings.load() {
            Ok(s) => (s.rtmp_port, s.stream_name),
            Err(_) => (1935, "live".to_string()),
        }
    }

    async fn probe_api(&self) -> bool {
        let api_port = match self.settings.load() {
            Ok(s) => s.media_server_api_port,
            Err(_) => return false,
        };

        let url = format!("http://127.0.0.1:{api_port}/v3/config/global/get");
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

impl Drop for MediaServer {
    fn drop(&mut self) {
        // Best-effort synchronous kill; we cannot await in Drop
        if let Ok(mut guard) = self.child.try_write() {
            if let Some(ref mut child) = *guard {
                let _ = child.start_kill();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_server() -> (tempfile::TempDir, MediaServer) {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(SettingsManager::new(dir.path().to_path_buf()));
        (dir, MediaServer::new(settings))
    }

    #[test]
    fn test_not_available_before_start() {
        let (_dir, server) = test_server();
        assert!(!server.is_available());
    }

    #[test]
    fn test_urls_use_configured_endpoint() {
        let (_dir, server) = test_server();
        assert_eq!(server.publish_url(), "rtmp://127.0.0.1:1935/live");
        // Remote access disabled: playback address stays loopback
        assert_eq!(server.play_url(), "rtmp://127.0.0.1:1935/live");
    }
}
