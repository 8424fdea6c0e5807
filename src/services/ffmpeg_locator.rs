// FFmpeg Locator Service
// Resolves the ffmpeg/ffprobe binaries from settings or PATH

use std::path::Path;
use std::sync::Arc;

use crate::services::SettingsManager;

/// Resolves media-processing binaries for every spawn, so a settings change
/// takes effect without a restart
pub struct FfmpegLocator {
    settings: Arc<SettingsManager>,
}

impl FfmpegLocator {
    pub fn new(settings: Arc<SettingsManager>) -> Self {
        Self { settings }
    }

    /// Path to the ffmpeg binary: custom path from settings if it exists,
    /// otherwise PATH lookup, otherwise the bare name (spawn will fail with a
    /// clear error)
    pub fn ffmpeg_path(&self) -> String {
        if let Ok(settings) = self.settings.load() {
            let custom = settings.ffmpeg_path.trim();
            if !custom.is_empty() {
                if Path::new(custom).exists() {
                    return custom.to_string();
                }
                log::warn!("Configured FFmpeg path does not exist: {custom}");
            }
        }

        match which::which("ffmpeg") {
            Ok(path) => path.to_string_lossy().to_string(),
            Err(_) => "ffmpeg".to_string(),
        }
    }

    /// Path to ffprobe, derived as a sibling of the resolved ffmpeg binary
    pub fn ffprobe_path(&self) -> String {
        let ffmpeg = self.ffmpeg_path();
        if let Some(sibling) = derive_ffprobe(&ffmpeg) {
            if Path::new(&sibling).exists() {
                return sibling;
            }
        }

        match which::which("ffprobe") {
            Ok(path) => path.to_string_lossy().to_string(),
            Err(_) => "ffprobe".to_string(),
        }
    }
}

/// Replace the trailing "ffmpeg" component with "ffprobe", preserving ".exe"
fn derive_ffprobe(ffmpeg_path: &str) -> Option<String> {
    let path = Path::new(ffmpeg_path);
    let file_name = path.file_name()?.to_str()?;

    let probe_name = if file_name.eq_ignore_ascii_case("ffmpeg") {
        "ffprobe".to_string()
    } else if file_name.eq_ignore_ascii_case("ffmpeg.exe") {
        "ffprobe.exe".to_string()
    } else {
        return None;
    };

    Some(
        path.with_file_name(probe_name)
            .to_string_lossy()
            .to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_ffprobe() {
        assert_eq!(
            derive_ffprobe("/usr/bin/ffmpeg").as_deref(),
            Some("/usr/bin/ffprobe")
        );
        assert_eq!(
            derive_ffprobe("ffmpeg.exe").as_deref(),
            Some("ffprobe.exe")
        );
        assert_eq!(derive_ffprobe("/usr/bin/avconv"), None);
    }
}
