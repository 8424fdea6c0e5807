// Batch Converter Service
// Sequential in-place remux of a directory with crash-safe replacement

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::models::{BatchFileResult, BatchStatus};
use crate::services::{JobError, MediaProbe, PreviewPipeline};

/// Extensions eligible for in-place conversion
const CONVERT_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mkv", "mov", "wmv", "flv", "mpeg", "mpg", "m4v", "ts",
];

/// A converted file smaller than half the original is assumed corrupt
const MIN_SIZE_RATIO: f64 = 0.5;

/// Runs the single global batch job. Only one batch may be in progress at a
/// time; originals are never left missing, even if the subprocess dies
/// mid-replacement.
pub struct BatchConverter {
    status: Mutex<BatchStatus>,
    running: AtomicBool,
    probe: Arc<MediaProbe>,
    pipeline: Arc<PreviewPipeline>,
}

impl BatchConverter {
    pub fn new(probe: Arc<MediaProbe>, pipeline: Arc<PreviewPipeline>) -> Self {
        Self {
            status: Mutex::new(BatchStatus::default()),
            running: AtomicBool::new(false),
            probe,
            pipeline,
        }
    }

    /// Scan a directory and start converting every file that needs it.
    /// Returns the candidate count immediately; the work happens in a
    /// background sequential loop.
    pub async fn start(self: &Arc<Self>, directory: &Path) -> Result<usize, JobError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(JobError::AlreadyRunning);
        }

        let candidates = match self.scan_candidates(directory).await {
            Ok(candidates) => candidates,
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(err);
            }
        };

        let count = candidates.len();
        if count == 0 {
            self.running.store(false, Ordering::SeqCst);
            let mut status = self.lock_status();
            *status = BatchStatus::default();
            return Ok(0);
        }

        {
            let mut status = self.lock_status();
            *status = BatchStatus {
                running: true,
                total: count,
                ..Default::default()
            };
        }

        log::info!(
            "Batch conversion started: {count} candidate(s) in {}",
            directory.display()
        );

        let converter = Arc::clone(self);
        let _ = tokio::spawn(async move {
            converter.run_worker(candidates).await;
        });

        Ok(count)
    }

    /// Live progress snapshot. Retains the final counters of the last run
    /// until the next one starts.
    pub fn status(&self) -> BatchStatus {
        self.lock_status().clone()
    }

    /// Cooperative cancel: the in-flight file finishes, then the loop stops.
    pub fn cancel(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            log::info!("Batch conversion cancel requested");
        }
    }

    async fn run_worker(&self, candidates: Vec<PathBuf>) {
        for path in candidates {
            if !self.running.load(Ordering::SeqCst) {
                log::info!("Batch conversion cancelled");
                break;
            }

            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            {
                let mut status = self.lock_status();
                status.current = name;
            }

            let result = self.convert_in_place(&path).await;

            let mut status = self.lock_status();
            match result {
                Ok(()) => {
                    status.completed += 1;
                    status.results.push(BatchFileResult {
                        path: path.to_string_lossy().to_string(),
                        success: true,
                        reason: None,
                    });
                }
                Err(reason) => {
                    log::warn!("Batch conversion skipped {}: {reason}", path.display());
                    status.failed += 1;
                    status.results.push(BatchFileResult {
                        path: path.to_string_lossy().to_string(),
                        success: false,
                        reason: Some(reason),
                    });
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        let mut status = self.lock_status();
        status.running = false;
        status.current.clear();
        log::info!(
            "Batch conversion finished: {} converted, {} skipped",
            status.completed,
            status.failed
        );
    }

    async fn scan_candidates(&self, directory: &Path) -> Result<Vec<PathBuf>, JobError> {
        let entries = std::fs::read_dir(directory).map_err(|e| {
            JobError::SourceNotFound(format!("{}: {e}", directory.display()))
        })?;

        let mut candidates = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || !candidate_extension(&path) {
                continue;
            }
            if self.probe.needs_reprocessing(&path).await {
                candidates.push(path);
            }
        }

        candidates.sort();
        Ok(candidates)
    }

    async fn convert_in_place(&self, path: &Path) -> Result<(), String> {
        let temp = sibling_with_suffix(path, "_converting");
        let backup = sibling_with_suffix(path, "_backup");

        log::info!("Batch converting: {}", path.display());

        if let Err(err) = self.pipeline.remux(path, &temp).await {
            let _ = std::fs::remove_file(&temp);
            return Err(err.to_string());
        }

        let orig_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let temp_size = std::fs::metadata(&temp).map(|m| m.len()).unwrap_or(0);
        if !plausible_output(temp_size, orig_size) {
            let _ = std::fs::remove_file(&temp);
            return Err(format!(
                "Implausibly small output ({temp_size} of {orig_size} bytes)"
            ));
        }

        replace_original(path, &temp, &backup)
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, BatchStatus> {
        match self.status.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn candidate_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            CONVERT_EXTENSIONS.iter().any(|c| *c == lower)
        })
        .unwrap_or(false)
}

fn plausible_output(temp_size: u64, orig_size: u64) -> bool {
    temp_size > 0 && (temp_size as f64) >= (orig_size as f64) * MIN_SIZE_RATIO
}

/// `name_converting.ext` / `name_backup.ext` next to the original
fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    path.with_file_name(format!("{stem}{suffix}{ext}"))
}

/// Swap the converted file into place. The original is renamed aside first
/// and restored on any failure, so it is never left missing.
fn replace_original(path: &Path, temp: &Path, backup: &Path) -> Result<(), String> {
    if !temp.exists() {
        return Err("Converted file missing".to_string());
    }

    if let Err(e) = std::fs::rename(path, backup) {
        let _ = std::fs::remove_file(temp);
        return Err(format!("Failed to back up original: {e}"));
    }

    if let Err(e) = std::fs::rename(temp, path) {
        // Put the original back before reporting
        if let Err(restore_err) = std::fs::rename(backup, path) {
            log::error!(
                "Failed to restore backup for {}: {restore_err}",
                path.display()
            );
        }
        let _ = std::fs::remove_file(temp);
        return Err(format!("Failed to move converted file into place: {e}"));
    }

    if let Err(e) = std::fs::remove_file(backup) {
        log::warn!("Failed to delete backup {}: {e}", backup.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{FfmpegLocator, SettingsManager};

    fn test_converter(dir: &Path) -> Arc<BatchConverter> {
        let settings = Arc::new(SettingsManager::new(dir.join("data")));
        let locator = Arc::new(FfmpegLocator::new(settings));
        let probe = Arc::new(MediaProbe::new(Arc::clone(&locator)));
        let pipeline = Arc::new(PreviewPipeline::new(locator));
        Arc::new(BatchConverter::new(probe, pipeline))
    }

    #[test]
    fn test_candidate_extension() {
        assert!(candidate_extension(Path::new("/v/a.ts")));
        assert!(candidate_extension(Path::new("/v/a.MKV")));
        assert!(!candidate_extension(Path::new("/v/a.srt")));
        assert!(!candidate_extension(Path::new("/v/noext")));
    }

    #[test]
    fn test_plausible_output() {
        assert!(plausible_output(600, 1000));
        assert!(!plausible_output(400, 1000));
        assert!(!plausible_output(0, 0));
    }

    #[test]
    fn test_sibling_with_suffix() {
        assert_eq!(
            sibling_with_suffix(Path::new("/v/movie.ts"), "_converting"),
            PathBuf::from("/v/movie_converting.ts")
        );
        assert_eq!(
            sibling_with_suffix(Path::new("/v/movie.ts"), "_backup"),
            PathBuf::from("/v/movie_backup.ts")
        );
    }

    #[test]
    fn test_replace_original_swaps_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movie.ts");
        let temp = dir.path().join("movie_converting.ts");
        let backup = dir.path().join("movie_backup.ts");

        std::fs::write(&path, b"original").unwrap();
        std::fs::write(&temp, b"converted").unwrap();

        replace_original(&path, &temp, &backup).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"converted");
        assert!(!temp.exists());
        assert!(!backup.exists());
    }

    #[test]
    fn test_replace_original_keeps_original_when_temp_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movie.ts");
        let temp = dir.path().join("movie_converting.ts");
        let backup = dir.path().join("movie_backup.ts");

        std::fs::write(&path, b"original").unwrap();

        assert!(replace_original(&path, &temp, &backup).is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_second_start_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let converter = test_converter(dir.path());

        converter.running.store(true, Ordering::SeqCst);
        let err = converter.start(dir.path()).await.unwrap_err();
        assert!(matches!(err, JobError::AlreadyRunning));
    }

    #[tokio::test]
    async fn test_missing_directory_resets_flag() {
        let dir = tempfile::tempdir().unwrap();
        let converter = test_converter(dir.path());

        let missing = dir.path().join("nope");
        assert!(converter.start(&missing).await.is_err());
        // A failed scan must not leave the singleton busy
        assert!(!converter.running.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_empty_directory_completes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let converter = test_converter(dir.path());

        let videos = dir.path().join("videos");
        std::fs::create_dir_all(&videos).unwrap();

        let count = converter.start(&videos).await.unwrap();
        assert_eq!(count, 0);
        assert!(!converter.status().running);
    }

    #[test]
    fn test_cancel_without_batch_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let converter = test_converter(dir.path());

        converter.cancel();
        assert!(!converter.status().running);
    }
}
