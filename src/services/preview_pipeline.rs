// Preview Pipeline Service
// Two-stage remux/transcode preparation of browser-playable working files

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::models::PreviewStrategy;
use crate::services::{diagnostic_tail, FfmpegLocator, JobError};

/// Outputs below this size are degenerate (header-only MP4 shells)
const MIN_PREVIEW_BYTES: u64 = 1024;

/// Lines of stderr kept for failure reports
const TAIL_LINES: usize = 15;

/// Result of one completed FFmpeg invocation
pub struct FfmpegRun {
    pub success: bool,
    pub stderr: String,
}

/// Spawn FFmpeg and wait for it to finish, capturing stderr. The child is
/// spawned with kill_on_drop, so cancelling the owning task kills it.
pub async fn run_ffmpeg(ffmpeg_path: &str, args: &[String]) -> Result<FfmpegRun, JobError> {
    let mut child = Command::new(ffmpeg_path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| JobError::spawn(ffmpeg_path, &e))?;

    let mut stderr = String::new();
    if let Some(mut pipe) = child.stderr.take() {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf).await;
        stderr = String::from_utf8_lossy(&buf).into_owned();
    }

    let status = child
        .wait()
        .await
        .map_err(|e| JobError::spawn(ffmpeg_path, &e))?;

    Ok(FfmpegRun {
        success: status.success(),
        stderr,
    })
}

/// Prepares preview working files: a fast container-only remux first, falling
/// back to a full re-encode when the streams themselves are incompatible
pub struct PreviewPipeline {
    locator: Arc<FfmpegLocator>,
}

impl PreviewPipeline {
    pub fn new(locator: Arc<FfmpegLocator>) -> Self {
        Self { locator }
    }

    /// Run the two-stage strategy, writing into `output`. Only one of the two
    /// subprocesses is ever active at once.
    pub async fn prepare(&self, source: &Path, output: &Path) -> Result<PreviewStrategy, JobError> {
        let started = Instant::now();

        match self.try_remux(source, output).await {
            Ok(()) => {
                log::info!(
                    "Remux finished: {} ({:.1}s)",
                    output.display(),
                    started.elapsed().as_secs_f64()
                );
                return Ok(PreviewStrategy::Remux);
            }
            Err(err) => {
                log::info!("Remux failed for {}, falling back to transcode: {err}", source.display());
                remove_if_exists(output);
            }
        }

        let started = Instant::now();
        if let Err(err) = self.transcode(source, output).await {
            remove_if_exists(output);
            return Err(err);
        }

        log::info!(
            "Transcode finished: {} ({:.1}s)",
            output.display(),
            started.elapsed().as_secs_f64()
        );
        Ok(PreviewStrategy::Transcode)
    }

    /// Stream-copy container change. Used directly by the batch converter.
    pub async fn remux(&self, source: &Path, output: &Path) -> Result<(), JobError> {
        let args = vec![
            "-i".to_string(),
            source.to_string_lossy().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-f".to_string(),
            "mp4".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-y".to_string(),
            output.to_string_lossy().to_string(),
        ];

        let run = run_ffmpeg(&self.locator.ffmpeg_path(), &args).await?;
        if !run.success {
            return Err(JobError::ProcessFailure(diagnostic_tail(
                &run.stderr,
                TAIL_LINES,
            )));
        }
        Ok(())
    }

    async fn try_remux(&self, source: &Path, output: &Path) -> Result<(), JobError> {
        self.remux(source, output).await?;

        let size = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
        if size <= MIN_PREVIEW_BYTES {
            return Err(JobError::ProcessFailure(format!(
                "Remux produced a degenerate file ({size} bytes)"
            )));
        }
        Ok(())
    }

    async fn transcode(&self, source: &Path, output: &Path) -> Result<(), JobError> {
        let args = vec![
            "-i".to_string(),
            source.to_string_lossy().to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "ultrafast".to_string(),
            "-crf".to_string(),
            "23".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-ac".to_string(),
            "2".to_string(),
            "-ar".to_string(),
            "44100".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-y".to_string(),
            output.to_string_lossy().to_string(),
        ];

        let run = run_ffmpeg(&self.locator.ffmpeg_path(), &args).await?;
        if !run.success || !output.exists() {
            return Err(JobError::ProcessFailure(diagnostic_tail(
                &run.stderr,
                TAIL_LINES,
            )));
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            log::warn!("Failed to remove partial output {}: {e}", path.display());
        }
    }
}
