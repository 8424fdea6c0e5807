// Preview Session Manager
// Keyed registry of per-session preview preparation jobs with idle eviction

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::models::{BeginPreviewOutcome, PreviewState, PreviewStrategy};
use crate::services::{JobError, MediaProbe, PreviewPipeline};

/// Sessions untouched for this long are evicted by the sweeper
const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How often the sweeper wakes up
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

enum SessionPhase {
    Preparing,
    Ready(PreviewStrategy),
}

struct PreviewSession {
    source: PathBuf,
    output: PathBuf,
    phase: SessionPhase,
    last_touch: Instant,
    /// Handle of the in-flight pipeline task; aborting it kills the subprocess
    job: Option<JoinHandle<()>>,
}

impl PreviewSession {
    fn touch(&mut self) {
        self.last_touch = Instant::now();
    }
}

/// Owns all preview sessions and their working files. At most one preparation
/// subprocess exists per session id at any time.
pub struct PreviewManager {
    sessions: Mutex<HashMap<String, PreviewSession>>,
    work_dir: PathBuf,
    probe: Arc<MediaProbe>,
    pipeline: Arc<PreviewPipeline>,
}

impl PreviewManager {
    pub fn new(
        work_dir: PathBuf,
        probe: Arc<MediaProbe>,
        pipeline: Arc<PreviewPipeline>,
    ) -> Result<Self, String> {
        std::fs::create_dir_all(&work_dir)
            .map_err(|e| format!("Failed to create preview work directory: {e}"))?;

        Ok(Self {
            sessions: Mutex::new(HashMap::new()),
            work_dir,
            probe,
            pipeline,
        })
    }

    /// Delete leftover working files from a previous run. Session state does
    /// not survive a restart, so anything on disk is stale.
    pub fn clean_stale_files(&self) {
        let entries = match std::fs::read_dir(&self.work_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with("preview_") {
                if std::fs::remove_file(entry.path()).is_ok() {
                    log::info!("Removed stale working file: {}", entry.path().display());
                }
            }
        }
    }

    /// Begin (or re-observe) preview preparation for a session.
    pub async fn begin_session(
        self: &Arc<Self>,
        session_id: &str,
        source: &Path,
    ) -> Result<BeginPreviewOutcome, JobError> {
        if session_id.trim().is_empty() {
            return Err(JobError::InvalidParameter("Missing session id".to_string()));
        }
        if !source.exists() {
            return Err(JobError::SourceNotFound(
                source.to_string_lossy().to_string(),
            ));
        }

        // Fast paths that need no probe
        if let Some(outcome) = self.check_existing(session_id, source) {
            return Ok(outcome);
        }

        // Probe outside the lock; it runs a subprocess
        if !self.probe.needs_reprocessing(source).await {
            return Ok(BeginPreviewOutcome::NotNeeded);
        }

        // Re-check under the lock so two concurrent calls for the same
        // session never spawn two subprocesses, then insert and spawn
        // without releasing it.
        let mut sessions = self.lock_sessions();
        if let Some(entry) = sessions.get(session_id) {
            if entry.source == source {
                return Ok(match entry.phase {
                    SessionPhase::Preparing => BeginPreviewOutcome::Preparing,
                    SessionPhase::Ready(_) => BeginPreviewOutcome::Ready,
                });
            }
        }
        // Session replaced with a different source
        if let Some(entry) = sessions.remove(session_id) {
            cleanup_session(session_id, entry);
        }

        let output = self
            .work_dir
            .join(format!("preview_{}.mp4", sanitize_session_id(session_id)));

        sessions.insert(
            session_id.to_string(),
            PreviewSession {
                source: source.to_path_buf(),
                output: output.clone(),
                phase: SessionPhase::Preparing,
                last_touch: Instant::now(),
                job: None,
            },
        );

        let manager = Arc::clone(self);
        let id = session_id.to_string();
        let src = source.to_path_buf();
        let handle = tokio::spawn(async move {
            manager.run_pipeline(&id, &src, &output).await;
        });

        if let Some(entry) = sessions.get_mut(session_id) {
            entry.job = Some(handle);
        }

        log::info!("Preview preparation started for session {session_id}");
        Ok(BeginPreviewOutcome::Started)
    }

    /// Poll the observable state of a session.
    pub fn poll_status(&self, session_id: &str) -> PreviewState {
        let mut sessions = self.lock_sessions();
        let state = match sessions.get(session_id) {
            None => return PreviewState::None,
            Some(entry) => match entry.phase {
                SessionPhase::Preparing => PreviewState::Preparing,
                // Never report ready without the working file on disk
                SessionPhase::Ready(_) if entry.output.exists() => PreviewState::Ready,
                SessionPhase::Ready(_) => PreviewState::None,
            },
        };

        if state == PreviewState::None {
            if let Some(entry) = sessions.remove(session_id) {
                cleanup_session(session_id, entry);
            }
        }
        state
    }

    /// Path the player should read: the working file when one is ready for
    /// this exact source, otherwise the source itself. Refreshes the idle
    /// timer on hit.
    pub fn resolve_playback_path(&self, session_id: &str, source: &Path) -> PathBuf {
        let mut sessions = self.lock_sessions();
        if let Some(entry) = sessions.get_mut(session_id) {
            if matches!(entry.phase, SessionPhase::Ready(_))
                && entry.source == source
                && entry.output.exists()
            {
                entry.touch();
                return entry.output.clone();
            }
        }
        source.to_path_buf()
    }

    /// Strategy used for a ready session (for diagnostics endpoints)
    pub fn strategy(&self, session_id: &str) -> Option<PreviewStrategy> {
        let sessions = self.lock_sessions();
        sessions.get(session_id).and_then(|entry| match entry.phase {
            SessionPhase::Ready(strategy) => Some(strategy),
            SessionPhase::Preparing => None,
        })
    }

    /// Kill any active subprocess, delete the working file, drop the entry.
    /// A no-op for unknown session ids.
    pub fn end_session(&self, session_id: &str) {
        let removed = self.lock_sessions().remove(session_id);
        if let Some(entry) = removed {
            cleanup_session(session_id, entry);
            log::info!("Preview session ended: {session_id}");
        }
    }

    /// Evict every session idle past the timeout. Called by the sweeper and
    /// directly from tests.
    pub fn sweep_expired(&self) {
        let expired: Vec<(String, PreviewSession)> = {
            let mut sessions = self.lock_sessions();
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, entry)| entry.last_touch.elapsed() > IDLE_TIMEOUT)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        for (id, entry) in expired {
            log::info!("Evicting idle preview session: {id}");
            cleanup_session(&id, entry);
        }
    }

    /// Start the periodic eviction task.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                manager.sweep_expired();
            }
        })
    }

    async fn run_pipeline(&self, session_id: &str, source: &Path, output: &Path) {
        let result = self.pipeline.prepare(source, output).await;

        let mut sessions = self.lock_sessions();

        // Only finalize if the entry still describes this job
        let still_current = sessions
            .get(session_id)
            .map(|entry| entry.source == source)
            .unwrap_or(false);
        if !still_current {
            drop(sessions);
            let _ = std::fs::remove_file(output);
            return;
        }

        match result {
            Ok(strategy) => {
                if let Some(entry) = sessions.get_mut(session_id) {
                    entry.phase = SessionPhase::Ready(strategy);
                    entry.job = None;
                    entry.touch();
                }
                log::info!("Preview ready for session {session_id} ({strategy:?})");
            }
            Err(err) => {
                // Back to "none"; the caller may re-poll and retry
                log::error!("Preview preparation failed for session {session_id}: {err}");
                sessions.remove(session_id);
                drop(sessions);
                let _ = std::fs::remove_file(output);
            }
        }
    }

    fn check_existing(&self, session_id: &str, source: &Path) -> Option<BeginPreviewOutcome> {
        let mut sessions = self.lock_sessions();
        if !sessions.contains_key(session_id) {
            return None;
        }

        let outcome = match sessions.get(session_id) {
            Some(entry) if entry.source == source => match entry.phase {
                SessionPhase::Preparing => Some(BeginPreviewOutcome::Preparing),
                SessionPhase::Ready(_) if entry.output.exists() => {
                    Some(BeginPreviewOutcome::Ready)
                }
                SessionPhase::Ready(_) => None,
            },
            _ => None,
        };

        if outcome.is_none() {
            // Stale entry: replaced source or vanished working file
            if let Some(entry) = sessions.remove(session_id) {
                cleanup_session(session_id, entry);
            }
        }
        outcome
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, PreviewSession>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Abort the in-flight task (killing its subprocess) and delete the working
/// file. Must already be removed from the registry.
fn cleanup_session(session_id: &str, entry: PreviewSession) {
    if let Some(job) = entry.job {
        job.abort();
    }
    if entry.output.exists() {
        if let Err(e) = std::fs::remove_file(&entry.output) {
            log::warn!(
                "Failed to delete working file for session {session_id}: {e}"
            );
        }
    }
}

fn sanitize_session_id(id: &str) -> String {
    id.chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{FfmpegLocator, SettingsManager};

    fn test_manager(dir: &Path) -> Arc<PreviewManager> {
        let settings = Arc::new(SettingsManager::new(dir.join("data")));
        let locator = Arc::new(FfmpegLocator::new(settings));
        let probe = Arc::new(MediaProbe::new(Arc::clone(&locator)));
        let pipeline = Arc::new(PreviewPipeline::new(locator));
        Arc::new(PreviewManager::new(dir.join("work"), probe, pipeline).unwrap())
    }

    fn insert_ready(manager: &PreviewManager, id: &str, source: &Path, output: &Path) {
        manager.lock_sessions().insert(
            id.to_string(),
            PreviewSession {
                source: source.to_path_buf(),
                output: output.to_path_buf(),
                phase: SessionPhase::Ready(PreviewStrategy::Remux),
                last_touch: Instant::now(),
                job: None,
            },
        );
    }

    #[test]
    fn test_unknown_session_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());

        assert_eq!(manager.poll_status("nope"), PreviewState::None);
        // end_session on an unknown id must be a no-op
        manager.end_session("nope");
    }

    #[test]
    fn test_resolve_falls_back_to_source() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());

        let source = dir.path().join("movie.ts");
        assert_eq!(manager.resolve_playback_path("s1", &source), source);
    }

    #[test]
    fn test_ready_requires_working_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());

        let source = dir.path().join("movie.ts");
        let output = dir.path().join("work").join("preview_s1.mp4");

        insert_ready(&manager, "s1", &source, &output);
        // Working file missing: never report ready
        assert_eq!(manager.poll_status("s1"), PreviewState::None);

        insert_ready(&manager, "s1", &source, &output);
        std::fs::write(&output, b"mp4 bytes").unwrap();
        assert_eq!(manager.poll_status("s1"), PreviewState::Ready);
        assert_eq!(manager.resolve_playback_path("s1", &source), output);
    }

    #[test]
    fn test_end_session_deletes_working_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());

        let source = dir.path().join("movie.ts");
        let output = dir.path().join("work").join("preview_s1.mp4");
        std::fs::write(&output, b"mp4 bytes").unwrap();
        insert_ready(&manager, "s1", &source, &output);

        manager.end_session("s1");
        assert!(!output.exists());
        assert_eq!(manager.poll_status("s1"), PreviewState::None);
    }

    #[test]
    fn test_sweep_evicts_idle_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());

        let source = dir.path().join("movie.ts");
        let output = dir.path().join("work").join("preview_s1.mp4");
        std::fs::write(&output, b"mp4 bytes").unwrap();
        insert_ready(&manager, "s1", &source, &output);

        // Fresh session survives a sweep
        manager.sweep_expired();
        assert_eq!(manager.poll_status("s1"), PreviewState::Ready);

        // Backdate the touch timestamp past the idle timeout
        let backdated = match Instant::now().checked_sub(IDLE_TIMEOUT + Duration::from_secs(1)) {
            Some(instant) => instant,
            None => return, // machine uptime too short to backdate
        };
        if let Some(entry) = manager.lock_sessions().get_mut("s1") {
            entry.last_touch = backdated;
        }

        manager.sweep_expired();
        assert_eq!(manager.poll_status("s1"), PreviewState::None);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_begin_session_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());

        let missing = dir.path().join("missing.ts");
        let err = manager.begin_session("s1", &missing).await.unwrap_err();
        assert!(matches!(err, JobError::SourceNotFound(_)));
    }

    #[tokio::test]
    async fn test_begin_session_rejects_empty_id() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());

        let source = dir.path().join("movie.ts");
        std::fs::write(&source, b"ts bytes").unwrap();

        let err = manager.begin_session("  ", &source).await.unwrap_err();
        assert!(matches!(err, JobError::InvalidParameter(_)));
    }

    #[test]
    fn test_sanitize_session_id() {
        assert_eq!(sanitize_session_id("abc-123_x"), "abc-123_x");
        assert_eq!(sanitize_session_id("../etc/passwd"), "___etc_passwd");
    }
}
