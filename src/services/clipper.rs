// Clipper Service
// Cuts time ranges out of source files into the configured output directory

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::services::{
    diagnostic_tail, format_duration, run_ffmpeg, FfmpegLocator, JobError, SettingsManager,
};

/// Extracts clips with stream-copy by default, re-encoding on request
pub struct Clipper {
    locator: Arc<FfmpegLocator>,
    settings: Arc<SettingsManager>,
}

impl Clipper {
    pub fn new(locator: Arc<FfmpegLocator>, settings: Arc<SettingsManager>) -> Self {
        Self { locator, settings }
    }

    /// Where a clip with this name would land, and whether it already exists
    pub fn check_output(
        &self,
        input: &Path,
        output_name: Option<&str>,
    ) -> Result<(PathBuf, bool), String> {
        let output_dir = self.settings.output_dir()?;
        let path = output_dir.join(self.output_file_name(input, output_name));
        let exists = path.exists();
        Ok((path, exists))
    }

    /// First non-colliding output name, numbering `name_1`, `name_2`, ...
    pub fn available_name(
        &self,
        input: &Path,
        output_name: Option<&str>,
    ) -> Result<PathBuf, String> {
        let output_dir = self.settings.output_dir()?;
        let ext = extension_of(input);
        let base = self.base_name(output_name);

        let mut candidate = output_dir.join(format!("{base}{ext}"));
        let mut counter = 1;
        while candidate.exists() {
            candidate = output_dir.join(format!("{base}_{counter}{ext}"));
            counter += 1;

            if counter > 1000 {
                let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
                candidate = output_dir.join(format!("{base}_{stamp}{ext}"));
                break;
            }
        }

        Ok(candidate)
    }

    /// Cut `[start, end]` out of the input. Returns the written clip path.
    pub async fn clip(
        &self,
        input: &Path,
        start: f64,
        end: f64,
        output_name: Option<&str>,
        re_encode: bool,
        overwrite: bool,
    ) -> Result<PathBuf, JobError> {
        if !input.exists() {
            return Err(JobError::SourceNotFound(
                input.to_string_lossy().to_string(),
            ));
        }
        if start < 0.0 || end <= start {
            return Err(JobError::InvalidParameter(format!(
                "Invalid clip range: {start} -> {end}"
            )));
        }

        let (output, exists) = self
            .check_output(input, output_name)
            .map_err(JobError::InvalidParameter)?;
        if exists && !overwrite {
            return Err(JobError::InvalidParameter(format!(
                "Output file already exists: {}",
                output.display()
            )));
        }

        // -ss after -i trades seek speed for frame accuracy, which matters
        // for DVR program streams
        let mut args = vec![
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-ss".to_string(),
            format_duration(start),
            "-to".to_string(),
            format_duration(end),
        ];

        if re_encode {
            args.extend(
                ["-c:v", "libx264", "-c:a", "aac"]
                    .iter()
                    .map(|s| s.to_string()),
            );
        } else {
            args.push("-c".to_string());
            args.push("copy".to_string());
        }

        args.push("-y".to_string());
        args.push(output.to_string_lossy().to_string());

        log::info!(
            "Clipping {} [{} -> {}] into {}",
            input.display(),
            format_duration(start),
            format_duration(end),
            output.display()
        );

        let run = run_ffmpeg(&self.locator.ffmpeg_path(), &args).await?;
        if !run.success {
            let _ = std::fs::remove_file(&output);
            return Err(JobError::ProcessFailure(diagnostic_tail(&run.stderr, 15)));
        }

        log::info!("Clip written: {}", output.display());
        Ok(output)
    }

    fn output_file_name(&self, input: &Path, output_name: Option<&str>) -> String {
        format!("{}{}", self.base_name(output_name), extension_of(input))
    }

    fn base_name(&self, output_name: Option<&str>) -> String {
        match output_name {
            Some(name) if !name.trim().is_empty() => sanitize_name(name.trim()),
            _ => format!("clip_{}", chrono::Utc::now().format("%Y%m%d_%H%M%S")),
        }
    }
}

fn extension_of(input: &Path) -> String {
    input
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_clipper(dir: &Path) -> Clipper {
        let settings = Arc::new(SettingsManager::new(dir.to_path_buf()));
        let locator = Arc::new(FfmpegLocator::new(Arc::clone(&settings)));
        Clipper::new(locator, settings)
    }

    #[test]
    fn test_available_name_numbers_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let clipper = test_clipper(dir.path());

        let input = Path::new("/videos/movie.ts");
        let first = clipper.available_name(input, Some("scene")).unwrap();
        assert_eq!(first.file_name().unwrap(), "scene.ts");

        std::fs::write(&first, b"clip").unwrap();
        let second = clipper.available_name(input, Some("scene")).unwrap();
        assert_eq!(second.file_name().unwrap(), "scene_1.ts");

        std::fs::write(&second, b"clip").unwrap();
        let third = clipper.available_name(input, Some("scene")).unwrap();
        assert_eq!(third.file_name().unwrap(), "scene_2.ts");
    }

    #[test]
    fn test_check_output_reports_existing() {
        let dir = tempfile::tempdir().unwrap();
        let clipper = test_clipper(dir.path());

        let input = Path::new("/videos/movie.mp4");
        let (path, exists) = clipper.check_output(input, Some("scene")).unwrap();
        assert!(!exists);

        std::fs::write(&path, b"clip").unwrap();
        let (_, exists) = clipper.check_output(input, Some("scene")).unwrap();
        assert!(exists);
    }

    #[tokio::test]
    async fn test_clip_rejects_bad_range() {
        let dir = tempfile::tempdir().unwrap();
        let clipper = test_clipper(dir.path());

        let input = dir.path().join("movie.mp4");
        std::fs::write(&input, b"mp4 bytes").unwrap();

        let err = clipper
            .clip(&input, 20.0, 10.0, None, false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn test_clip_rejects_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let clipper = test_clipper(dir.path());

        let err = clipper
            .clip(&dir.path().join("missing.mp4"), 0.0, 5.0, None, false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::SourceNotFound(_)));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("my clip"), "my clip");
        assert_eq!(sanitize_name("a/b:c"), "a_b_c");
    }
}
