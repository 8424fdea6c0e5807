// Stream Controller Service
// Global state machine driving the single re-broadcast FFmpeg process

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::models::{PlaybackOptions, StreamStats, StreamStatus, TelemetryUpdate};
use crate::services::{
    diagnostic_tail, run_ffmpeg, EventSink, FfmpegLocator, JobError, MediaServer,
};

/// Output frame rate cap for re-encoded speed playback
const FPS_CAP: u32 = 60;

/// Frame rate of the still-image loop while paused
const PAUSE_FRAME_RATE: u32 = 2;

/// How long to watch a freshly spawned process for immediate failure
const SPAWN_GRACE: Duration = Duration::from_millis(500);

/// Lines of stderr retained for failure reports
const TAIL_CAPACITY: usize = 40;

/// A media-time drop larger than this while looping means the source wrapped
const LOOP_REWIND_THRESHOLD: f64 = 1.5;

/// Telemetry shared between the stderr monitor task and status polls
struct Telemetry {
    stats: StreamStats,
    loop_count: u64,
    /// Wall-clock anchor for extrapolating the playback position
    anchor: Instant,
    /// Stream position at the anchor, in seconds
    base_offset: f64,
    /// Last media time parsed from stderr, for loop-wrap detection
    last_media_time: f64,
}

impl Telemetry {
    fn new(base_offset: f64) -> Self {
        Self {
            stats: StreamStats::default(),
            loop_count: 0,
            anchor: Instant::now(),
            base_offset,
            last_media_time: 0.0,
        }
    }
}

/// The active re-broadcast process and everything needed to supervise it
struct StreamJob {
    child: Child,
    monitor: JoinHandle<()>,
    source: PathBuf,
    options: PlaybackOptions,
    telemetry: Arc<StdMutex<Telemetry>>,
    tail: Arc<StdMutex<VecDeque<String>>>,
}

/// The still-frame looper that keeps viewers connected while paused
struct PauseJob {
    child: Child,
    source: PathBuf,
    /// Frozen playback position
    position: f64,
    options: PlaybackOptions,
    frame_path: PathBuf,
    /// Last stats snapshot before pausing
    stats: StreamStats,
    loop_count: u64,
}

/// Illegal flag combinations are unrepresentable: paused implies an active
/// pause process, streaming implies an active stream process.
enum StreamState {
    Idle,
    Streaming(StreamJob),
    Paused(PauseJob),
}

/// Drives the single global re-broadcast stream. All operations serialize on
/// the state mutex, so read-then-replace transitions are strictly ordered.
pub struct StreamController {
    state: Mutex<StreamState>,
    locator: Arc<FfmpegLocator>,
    media_server: Arc<MediaServer>,
    work_dir: PathBuf,
    event_sink: Arc<dyn EventSink>,
}

impl StreamController {
    pub fn new(
        locator: Arc<FfmpegLocator>,
        media_server: Arc<MediaServer>,
        work_dir: PathBuf,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            state: Mutex::new(StreamState::Idle),
            locator,
            media_server,
            work_dir,
            event_sink,
        }
    }

    /// Start (or replace) the re-broadcast. Returns the playback address.
    pub async fn start(
        &self,
        source: &Path,
        start_offset: f64,
        options: PlaybackOptions,
    ) -> Result<String, JobError> {
        if !options.speed_supported() {
            return Err(JobError::InvalidParameter(format!(
                "Unsupported speed: {}",
                options.speed
            )));
        }
        if start_offset < 0.0 {
            return Err(JobError::InvalidParameter(format!(
                "Negative start offset: {start_offset}"
            )));
        }
        if !source.exists() {
            return Err(JobError::SourceNotFound(
                source.to_string_lossy().to_string(),
            ));
        }
        if !self.media_server.is_available() {
            return Err(JobError::SpawnFailure {
                binary: "mediamtx".to_string(),
                message: "Media server is not running".to_string(),
            });
        }

        let mut state = self.state.lock().await;
        // "start" is effectively "replace"
        stop_current(&mut state).await;
        self.spawn_stream(&mut state, source, start_offset, options)
            .await
    }

    /// Kill whatever is running and return to idle. Idempotent.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        stop_current(&mut state).await;
    }

    /// Freeze the output on a still frame of the current position.
    /// Valid only while streaming.
    pub async fn pause(&self) -> Result<(), JobError> {
        let mut state = self.state.lock().await;
        self.reap(&mut state);

        let job = match &*state {
            StreamState::Streaming(job) => job,
            _ => {
                return Err(JobError::InvalidParameter(
                    "No active stream to pause".to_string(),
                ))
            }
        };

        let position = current_position(job);
        let source = job.source.clone();
        let options = job.options;
        let (stats, loop_count) = {
            let telemetry = lock_unpoisoned(&job.telemetry);
            (telemetry.stats.clone(), telemetry.loop_count)
        };

        // Capture the frame before touching the running stream, so a capture
        // failure leaves the stream untouched
        let frame_path = self.work_dir.join("pause_frame.jpg");
        self.capture_frame(&source, position, &frame_path).await?;

        stop_current(&mut state).await;

        let child = match self.spawn_pause_loop(&frame_path).await {
            Ok(child) => child,
            Err(err) => {
                let _ = std::fs::remove_file(&frame_path);
                return Err(err);
            }
        };

        *state = StreamState::Paused(PauseJob {
            child,
            source,
            position,
            options,
            frame_path,
            stats,
            loop_count,
        });

        log::info!("Stream paused at {position:.1}s");
        Ok(())
    }

    /// Resume playback from the frozen position with the options recorded at
    /// pause time. Valid only while paused.
    pub async fn resume(&self) -> Result<String, JobError> {
        let mut state = self.state.lock().await;
        self.reap(&mut state);

        let (source, position, options) = match &*state {
            StreamState::Paused(job) => (job.source.clone(), job.position, job.options),
            _ => {
                return Err(JobError::InvalidParameter(
                    "No paused stream to resume".to_string(),
                ))
            }
        };

        stop_current(&mut state).await;
        let address = self
            .spawn_stream(&mut state, &source, position, options)
            .await?;

        log::info!("Stream resumed at {position:.1}s");
        Ok(address)
    }

    /// Jump to a new position, staying in the current sub-state.
    pub async fn seek(&self, offset: f64) -> Result<(), JobError> {
        if offset < 0.0 {
            return Err(JobError::InvalidParameter(format!(
                "Negative seek offset: {offset}"
            )));
        }

        let mut state = self.state.lock().await;
        self.reap(&mut state);

        match &*state {
            StreamState::Idle => Err(JobError::InvalidParameter(
                "No active stream to seek".to_string(),
            )),
            StreamState::Streaming(job) => {
                let source = job.source.clone();
                let options = job.options;
                stop_current(&mut state).await;
                self.spawn_stream(&mut state, &source, offset, options)
                    .await?;
                log::info!("Stream seeked to {offset:.1}s");
                Ok(())
            }
            StreamState::Paused(job) => {
                // Stay paused, but loop the frame at the new position
                let source = job.source.clone();
                let frame_path = job.frame_path.clone();

                // Capture first; on failure the old pause loop keeps running
                self.capture_frame(&source, offset, &frame_path).await?;

                if let StreamState::Paused(job) = &mut *state {
                    let _ = job.child.kill().await;
                }

                match self.spawn_pause_loop(&frame_path).await {
                    Ok(child) => {
                        if let StreamState::Paused(job) = &mut *state {
                            job.child = child;
                            job.position = offset;
                        }
                        log::info!("Paused stream repositioned to {offset:.1}s");
                        Ok(())
                    }
                    Err(err) => {
                        let _ = std::fs::remove_file(&frame_path);
                        *state = StreamState::Idle;
                        Err(err)
                    }
                }
            }
        }
    }

    /// Point-in-time snapshot. The position is extrapolated from the last
    /// wall-clock anchor rather than queried from the subprocess.
    pub async fn status(&self) -> StreamStatus {
        let mut state = self.state.lock().await;
        self.reap(&mut state);

        match &*state {
            StreamState::Idle => StreamStatus::default(),
            StreamState::Streaming(job) => {
                let telemetry = lock_unpoisoned(&job.telemetry);
                StreamStatus {
                    active: true,
                    paused: false,
                    source: job.source.to_string_lossy().to_string(),
                    current_time: extrapolate_position(
                        telemetry.base_offset,
                        telemetry.anchor.elapsed(),
                        job.options.speed,
                        job.options.end_offset,
                    ),
                    loop_count: telemetry.loop_count,
                    options: job.options,
                    stats: telemetry.stats.clone(),
                }
            }
            StreamState::Paused(job) => StreamStatus {
                active: true,
                paused: true,
                source: job.source.to_string_lossy().to_string(),
                current_time: job.position,
                loop_count: job.loop_count,
                options: job.options,
                stats: job.stats.clone(),
            },
        }
    }

    /// Spawn the re-broadcast process and hand it to the state machine.
    /// Any early exit resolves the state back to idle with the stderr tail.
    async fn spawn_stream(
        &self,
        state: &mut StreamState,
        source: &Path,
        start_offset: f64,
        options: PlaybackOptions,
    ) -> Result<String, JobError> {
        let publish_url = self.media_server.publish_url();
        let args = build_stream_args(source, start_offset, &options, &publish_url);
        let ffmpeg_path = self.locator.ffmpeg_path();

        log::info!("Starting re-broadcast: {} {}", ffmpeg_path, args.join(" "));

        let mut child = Command::new(&ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| JobError::spawn(&ffmpeg_path, &e))?;

        let telemetry = Arc::new(StdMutex::new(Telemetry::new(start_offset)));
        let tail = Arc::new(StdMutex::new(VecDeque::with_capacity(TAIL_CAPACITY)));

        let stderr = child.stderr.take().ok_or_else(|| JobError::SpawnFailure {
            binary: ffmpeg_path.clone(),
            message: "Failed to capture stderr".to_string(),
        })?;

        let monitor = tokio::spawn(monitor_stderr(
            stderr,
            Arc::clone(&telemetry),
            Arc::clone(&tail),
            options,
            start_offset,
            Arc::clone(&self.event_sink),
        ));

        // Give the process a moment to fail fast (bad source, refused publish)
        tokio::time::sleep(SPAWN_GRACE).await;
        if let Ok(Some(status)) = child.try_wait() {
            monitor.abort();
            let tail_text = drain_tail(&tail);
            log::error!("Re-broadcast process exited immediately ({status}): {tail_text}");
            *state = StreamState::Idle;
            return Err(JobError::ProcessFailure(tail_text));
        }

        *state = StreamState::Streaming(StreamJob {
            child,
            monitor,
            source: source.to_path_buf(),
            options,
            telemetry,
            tail,
        });

        Ok(self.media_server.play_url())
    }

    /// Notice a subprocess that exited on its own and resolve the state
    /// machine instead of leaving it ambiguous.
    fn reap(&self, state: &mut StreamState) {
        let exited = match state {
            StreamState::Idle => None,
            StreamState::Streaming(job) => job.child.try_wait().ok().flatten(),
            StreamState::Paused(job) => job.child.try_wait().ok().flatten(),
        };

        let Some(status) = exited else {
            return;
        };

        match std::mem::replace(state, StreamState::Idle) {
            StreamState::Streaming(job) => {
                job.monitor.abort();
                if status.success() {
                    log::info!("Re-broadcast reached end of stream");
                } else {
                    log::error!(
                        "Re-broadcast process died ({status}): {}",
                        drain_tail(&job.tail)
                    );
                }
            }
            StreamState::Paused(job) => {
                let _ = std::fs::remove_file(&job.frame_path);
                log::error!("Pause loop process died ({status})");
            }
            StreamState::Idle => {}
        }
    }

    async fn capture_frame(
        &self,
        source: &Path,
        position: f64,
        frame_path: &Path,
    ) -> Result<(), JobError> {
        let args = vec![
            "-ss".to_string(),
            format!("{position:.3}"),
            "-i".to_string(),
            source.to_string_lossy().to_string(),
            "-frames:v".to_string(),
            "1".to_string(),
            "-q:v".to_string(),
            "2".to_string(),
            "-y".to_string(),
            frame_path.to_string_lossy().to_string(),
        ];

        let run = run_ffmpeg(&self.locator.ffmpeg_path(), &args).await?;
        if !run.success || !frame_path.exists() {
            return Err(JobError::ProcessFailure(diagnostic_tail(&run.stderr, 15)));
        }
        Ok(())
    }

    async fn spawn_pause_loop(&self, frame_path: &Path) -> Result<Child, JobError> {
        let args = build_pause_args(frame_path, &self.media_server.publish_url());
        let ffmpeg_path = self.locator.ffmpeg_path();

        log::info!("Starting pause loop: {} {}", ffmpeg_path, args.join(" "));

        Command::new(&ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| JobError::spawn(&ffmpeg_path, &e))
    }
}

/// Hard-kill whatever is active and clean up its artifacts. Callers already
/// hold the state lock.
async fn stop_current(state: &mut StreamState) {
    match std::mem::replace(state, StreamState::Idle) {
        StreamState::Idle => {}
        StreamState::Streaming(mut job) => {
            job.monitor.abort();
            let _ = job.child.kill().await;
            log::info!("Re-broadcast process stopped");
        }
        StreamState::Paused(mut job) => {
            let _ = job.child.kill().await;
            let _ = std::fs::remove_file(&job.frame_path);
            log::info!("Pause loop process stopped");
        }
    }
}

/// Reads FFmpeg stderr, folds telemetry into the shared snapshot, detects
/// loop wraps, and keeps a diagnostic tail.
async fn monitor_stderr(
    stderr: tokio::process::ChildStderr,
    telemetry: Arc<StdMutex<Telemetry>>,
    tail: Arc<StdMutex<VecDeque<String>>>,
    options: PlaybackOptions,
    start_offset: f64,
    event_sink: Arc<dyn EventSink>,
) {
    let reader = BufReader::new(stderr);
    let mut lines = reader.lines();
    let mut last_emit = Instant::now();

    while let Ok(Some(line)) = lines.next_line().await {
        {
            let mut tail = lock_unpoisoned(&tail);
            if tail.len() == TAIL_CAPACITY {
                tail.pop_front();
            }
            tail.push_back(line.clone());
        }

        let update = TelemetryUpdate::parse(&line);
        if update.is_empty() {
            continue;
        }

        let stats = {
            let mut telemetry = lock_unpoisoned(&telemetry);

            if let Some(media_time) = update.time {
                if options.loop_playback
                    && media_time + LOOP_REWIND_THRESHOLD < telemetry.last_media_time
                {
                    // The subprocess wrapped back to the start of the source
                    telemetry.loop_count += 1;
                    telemetry.anchor = Instant::now();
                    telemetry.base_offset = start_offset;
                    log::debug!("Loop restart detected (count {})", telemetry.loop_count);
                }
                telemetry.last_media_time = media_time;
            }

            telemetry.stats.apply(&update);
            telemetry.stats.clone()
        };

        if last_emit.elapsed() >= Duration::from_secs(1) {
            last_emit = Instant::now();
            if let Ok(payload) = serde_json::to_value(&stats) {
                event_sink.emit("stream-stats", payload);
            }
        }
    }

    event_sink.emit("stream-ended", json!({}));
}

/// Estimated playback position while actively streaming
fn current_position(job: &StreamJob) -> f64 {
    let telemetry = lock_unpoisoned(&job.telemetry);
    extrapolate_position(
        telemetry.base_offset,
        telemetry.anchor.elapsed(),
        job.options.speed,
        job.options.end_offset,
    )
}

/// base + elapsed * speed, clamped to the end offset when one is set
fn extrapolate_position(base: f64, elapsed: Duration, speed: f64, end_offset: f64) -> f64 {
    let position = base + elapsed.as_secs_f64() * speed;
    if end_offset > 0.0 {
        position.min(end_offset)
    } else {
        position
    }
}

/// Build the FFmpeg invocation for the re-broadcast.
///
/// speed == 1.0 stream-copies both tracks; anything else re-encodes with a
/// PTS rescale, a frame-rate cap, and a matching audio tempo chain. `-re`
/// paces input reads to real time so fast playback does not flood the
/// network.
fn build_stream_args(
    source: &Path,
    start_offset: f64,
    options: &PlaybackOptions,
    publish_url: &str,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-re".to_string()];

    if options.loop_playback {
        args.push("-stream_loop".to_string());
        args.push("-1".to_string());
    }

    args.push("-ss".to_string());
    args.push(format!("{start_offset:.3}"));

    if options.end_offset > 0.0 && options.end_offset > start_offset {
        args.push("-t".to_string());
        args.push(format!("{:.3}", options.end_offset - start_offset));
    }

    args.push("-i".to_string());
    args.push(source.to_string_lossy().to_string());

    if (options.speed - 1.0).abs() < f64::EPSILON {
        args.extend(
            ["-c:v", "copy", "-c:a", "copy"]
                .iter()
                .map(|s| s.to_string()),
        );
    } else {
        let filter = format!(
            "[0:v]setpts=PTS/{speed},fps={FPS_CAP}[v];[0:a]{atempo}[a]",
            speed = options.speed,
            atempo = build_atempo_chain(options.speed)
        );
        args.push("-filter_complex".to_string());
        args.push(filter);
        args.extend(
            [
                "-map", "[v]", "-map", "[a]", "-c:v", "libx264", "-preset", "veryfast", "-c:a",
                "aac",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
    }

    args.push("-f".to_string());
    args.push("flv".to_string());
    args.push(publish_url.to_string());
    args
}

/// atempo supports 0.5-2.0 per stage; chain stages for factors outside that
fn build_atempo_chain(speed: f64) -> String {
    let mut factors = Vec::new();
    let mut remaining = speed;

    while remaining > 2.0 {
        factors.push(2.0);
        remaining /= 2.0;
    }
    while remaining < 0.5 {
        factors.push(0.5);
        remaining /= 0.5;
    }
    factors.push(remaining);

    factors
        .iter()
        .map(|f| format!("atempo={f}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Loop the captured still at a minimal frame rate to keep the connection up
fn build_pause_args(frame_path: &Path, publish_url: &str) -> Vec<String> {
    vec![
        "-re".to_string(),
        "-loop".to_string(),
        "1".to_string(),
        "-framerate".to_string(),
        PAUSE_FRAME_RATE.to_string(),
        "-i".to_string(),
        frame_path.to_string_lossy().to_string(),
        "-an".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-tune".to_string(),
        "stillimage".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-g".to_string(),
        "4".to_string(),
        "-f".to_string(),
        "flv".to_string(),
        publish_url.to_string(),
    ]
}

fn drain_tail(tail: &Arc<StdMutex<VecDeque<String>>>) -> String {
    let lines: Vec<String> = lock_unpoisoned(tail).iter().cloned().collect();
    diagnostic_tail(&lines.join("\n"), 15)
}

fn lock_unpoisoned<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{NoopEventSink, SettingsManager};

    fn test_controller(dir: &Path) -> StreamController {
        let settings = Arc::new(SettingsManager::new(dir.join("data")));
        let locator = Arc::new(FfmpegLocator::new(Arc::clone(&settings)));
        let media_server = Arc::new(MediaServer::new(settings));
        StreamController::new(
            locator,
            media_server,
            dir.to_path_buf(),
            Arc::new(NoopEventSink),
        )
    }

    #[tokio::test]
    async fn test_unsupported_speed_rejected_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let controller = test_controller(dir.path());

        let source = dir.path().join("movie.mp4");
        std::fs::write(&source, b"mp4 bytes").unwrap();

        let err = controller
            .start(
                &source,
                0.0,
                PlaybackOptions {
                    speed: 3.0,
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::InvalidParameter(_)));
        let status = controller.status().await;
        assert!(!status.active);
    }

    #[tokio::test]
    async fn test_start_requires_media_server() {
        let dir = tempfile::tempdir().unwrap();
        let controller = test_controller(dir.path());

        let source = dir.path().join("movie.mp4");
        std::fs::write(&source, b"mp4 bytes").unwrap();

        let err = controller
            .start(&source, 0.0, PlaybackOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::SpawnFailure { .. }));
    }

    #[tokio::test]
    async fn test_pause_without_stream_fails() {
        let dir = tempfile::tempdir().unwrap();
        let controller = test_controller(dir.path());

        assert!(matches!(
            controller.pause().await.unwrap_err(),
            JobError::InvalidParameter(_)
        ));
        assert!(matches!(
            controller.resume().await.unwrap_err(),
            JobError::InvalidParameter(_)
        ));
        assert!(matches!(
            controller.seek(10.0).await.unwrap_err(),
            JobError::InvalidParameter(_)
        ));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let controller = test_controller(dir.path());

        controller.stop().await;
        controller.stop().await;
        assert!(!controller.status().await.active);
    }

    #[test]
    fn test_stream_copy_at_unit_speed() {
        let options = PlaybackOptions::default();
        let args = build_stream_args(
            Path::new("/videos/a.mp4"),
            30.0,
            &options,
            "rtmp://127.0.0.1:1935/live",
        );

        assert!(args.contains(&"-re".to_string()));
        assert!(args.contains(&"-c:v".to_string()));
        assert!(args.contains(&"copy".to_string()));
        assert!(!args.iter().any(|a| a.contains("setpts")));
        assert_eq!(args[args.len() - 1], "rtmp://127.0.0.1:1935/live");

        let ss_index = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[ss_index + 1], "30.000");
    }

    #[test]
    fn test_filter_chain_at_double_speed() {
        let options = PlaybackOptions {
            speed: 2.0,
            ..Default::default()
        };
        let args = build_stream_args(Path::new("/videos/a.mp4"), 0.0, &options, "rtmp://x/live");

        let filter = args
            .iter()
            .find(|a| a.contains("setpts"))
            .expect("filter chain present");
        assert!(filter.contains("setpts=PTS/2"));
        assert!(filter.contains("fps=60"));
        assert!(filter.contains("atempo=2"));
        assert!(args.contains(&"libx264".to_string()));
        assert!(!args.contains(&"copy".to_string()));
    }

    #[test]
    fn test_loop_and_range_flags() {
        let options = PlaybackOptions {
            speed: 1.0,
            end_offset: 90.0,
            loop_playback: true,
        };
        let args = build_stream_args(Path::new("/videos/a.mp4"), 30.0, &options, "rtmp://x/live");

        let loop_index = args.iter().position(|a| a == "-stream_loop").unwrap();
        assert_eq!(args[loop_index + 1], "-1");

        let t_index = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[t_index + 1], "60.000");
    }

    #[test]
    fn test_atempo_chain() {
        assert_eq!(build_atempo_chain(1.25), "atempo=1.25");
        assert_eq!(build_atempo_chain(0.5), "atempo=0.5");
        // Outside the single-stage range: chained in two stages
        assert_eq!(build_atempo_chain(4.0), "atempo=2,atempo=2");
    }

    #[test]
    fn test_position_extrapolation() {
        // 30s base, 10s elapsed at 2x -> 50s
        let position = extrapolate_position(30.0, Duration::from_secs(10), 2.0, 0.0);
        assert!((position - 50.0).abs() < 0.01);

        // Clamped to the end offset
        let clamped = extrapolate_position(30.0, Duration::from_secs(100), 2.0, 90.0);
        assert!((clamped - 90.0).abs() < 0.01);
    }
}
