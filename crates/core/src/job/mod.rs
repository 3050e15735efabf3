//! Background sonification jobs.
//!
//! A [`JobController`] runs detection followed by [`synthesize`] on its own
//! worker thread. Callers get a [`JobHandle`] back immediately and observe
//! the job through a channel of [`JobEvent`]s. Every job owns its
//! [`CancellationToken`], and the controller refuses to start a second job
//! while one is in flight since all jobs share one output path.
//!
//! [`synthesize`]: crate::timeline::synthesize

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::{
    assets::SampleLibrary,
    config::{DetectionConfig, SynthesisConfig},
    detection::{BlobDetector, Point},
    timeline::{self, SynthesisOutcome, SynthesisReport},
    Result, SonifyError,
};

pub type JobId = u64;

/// Cooperative cancellation signal shared between a job and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Progress snapshot published after each processed point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JobState {
    pub processed_count: usize,
    pub total_count: usize,
    pub progress_percent: f32,
}

impl JobState {
    pub fn new(processed_count: usize, total_count: usize, progress_percent: f32) -> Self {
        Self {
            processed_count,
            total_count,
            progress_percent,
        }
    }
}

/// Receiver of progress snapshots. Called from the worker thread.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, state: JobState);
}

impl<F> ProgressSink for F
where
    F: Fn(JobState) + Send + Sync,
{
    fn publish(&self, state: JobState) {
        self(state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Detection,
    Synthesis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobOutcome {
    Succeeded(SynthesisReport),
    Failed(String),
    Cancelled,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    fn from_synthesis(result: Result<SynthesisOutcome>) -> Self {
        match result {
            Ok(SynthesisOutcome::Exported(report)) => Self::Succeeded(report),
            Ok(SynthesisOutcome::Cancelled { .. }) => Self::Cancelled,
            Ok(SynthesisOutcome::NoPoints) => Self::Failed("no stars detected".to_string()),
            Ok(SynthesisOutcome::Silent) => Self::Failed("no audio generated".to_string()),
            Err(err) => Self::Failed(err.to_string()),
        }
    }
}

/// Events delivered from the worker, in order. `Finished` is always last.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Progress { stage: Stage, state: JobState },
    Finished(JobOutcome),
}

/// What the job starts from.
#[derive(Debug, Clone)]
pub enum JobSource {
    /// A decoded image; detection runs on the worker.
    Image(DynamicImage),
    /// Detection already happened.
    Points { points: Vec<Point>, image_width: u32 },
}

#[derive(Debug, Clone)]
pub struct JobRequest {
    pub source: JobSource,
    pub output_path: PathBuf,
    pub detection: DetectionConfig,
    pub synthesis: SynthesisConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Running(JobId),
}

#[derive(Debug)]
struct Shared {
    state: ControllerState,
    last_outcome: Option<JobOutcome>,
}

/// Single-flight launcher for sonification jobs.
#[derive(Debug)]
pub struct JobController {
    library: Arc<SampleLibrary>,
    shared: Arc<Mutex<Shared>>,
    next_id: AtomicU64,
}

impl JobController {
    pub fn new(library: Arc<SampleLibrary>) -> Self {
        Self {
            library,
            shared: Arc::new(Mutex::new(Shared {
                state: ControllerState::Idle,
                last_outcome: None,
            })),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn library(&self) -> &Arc<SampleLibrary> {
        &self.library
    }

    pub fn state(&self) -> Result<ControllerState> {
        Ok(lock(&self.shared)?.state)
    }

    /// Outcome of the most recently finished job.
    pub fn last_outcome(&self) -> Result<Option<JobOutcome>> {
        Ok(lock(&self.shared)?.last_outcome.clone())
    }

    /// Spawns a worker for `request` and returns without waiting for it.
    pub fn start(&self, request: JobRequest) -> Result<JobHandle> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut shared = lock(&self.shared)?;
            if let ControllerState::Running(running) = shared.state {
                return Err(SonifyError::JobInFlight(running));
            }
            shared.state = ControllerState::Running(id);
        }

        let cancel = CancellationToken::new();
        let (sender, events) = mpsc::channel();
        let worker = Worker {
            id,
            request,
            library: self.library.clone(),
            cancel: cancel.clone(),
            events: sender,
            guard: RunningGuard {
                id,
                shared: self.shared.clone(),
            },
        };

        tracing::info!(job = id, "starting sonification job");
        let join = std::thread::Builder::new()
            .name(format!("sonify-{id}"))
            .spawn(move || worker.run())?;

        Ok(JobHandle {
            id,
            cancel,
            events,
            join,
        })
    }
}

/// Caller-side view of a running job.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    cancel: CancellationToken,
    events: Receiver<JobEvent>,
    join: JoinHandle<JobOutcome>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Requests cancellation. The worker notices before its next point.
    pub fn cancel(&self) {
        tracing::info!(job = self.id, "cancelling sonification job");
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn events(&self) -> &Receiver<JobEvent> {
        &self.events
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Blocks until the worker exits.
    pub fn wait(self) -> Result<JobOutcome> {
        self.join.join().map_err(|_| SonifyError::WorkerPanicked)
    }
}

struct Worker {
    id: JobId,
    request: JobRequest,
    library: Arc<SampleLibrary>,
    cancel: CancellationToken,
    events: Sender<JobEvent>,
    guard: RunningGuard,
}

impl Worker {
    fn run(self) -> JobOutcome {
        let Worker {
            id,
            request,
            library,
            cancel,
            events,
            guard,
        } = self;

        let (points, image_width) = match request.source {
            JobSource::Points {
                points,
                image_width,
            } => (points, image_width),
            JobSource::Image(image) => {
                let detection = StageSink::new(Stage::Detection, events.clone());
                detection.publish(JobState::new(0, 1, 0.0));
                let points = BlobDetector::new(request.detection).detect(&image);
                detection.publish(JobState::new(1, 1, 100.0));
                tracing::info!(job = id, stars = points.len(), "stars detected");
                (points, image.width())
            }
        };

        let progress = StageSink::new(Stage::Synthesis, events.clone());
        let result = timeline::synthesize(
            points,
            image_width,
            &request.output_path,
            &request.synthesis,
            &library,
            &cancel,
            &progress,
        );
        let outcome = JobOutcome::from_synthesis(result);
        tracing::info!(job = id, success = outcome.is_success(), "sonification job finished");

        guard.finish(outcome.clone());
        let _ = events.send(JobEvent::Finished(outcome.clone()));
        outcome
    }
}

struct StageSink {
    stage: Stage,
    sender: Mutex<Sender<JobEvent>>,
}

impl StageSink {
    fn new(stage: Stage, sender: Sender<JobEvent>) -> Self {
        Self {
            stage,
            sender: Mutex::new(sender),
        }
    }
}

impl ProgressSink for StageSink {
    fn publish(&self, state: JobState) {
        if let Ok(sender) = self.sender.lock() {
            // The caller may have dropped its handle; the job still runs.
            let _ = sender.send(JobEvent::Progress {
                stage: self.stage,
                state,
            });
        }
    }
}

/// Returns the controller to `Idle` when the worker exits, even by panic.
struct RunningGuard {
    id: JobId,
    shared: Arc<Mutex<Shared>>,
}

impl RunningGuard {
    fn finish(self, outcome: JobOutcome) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.last_outcome = Some(outcome);
        }
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let mut shared = match self.shared.lock() {
            Ok(shared) => shared,
            Err(poisoned) => poisoned.into_inner(),
        };
        if shared.state == ControllerState::Running(self.id) {
            shared.state = ControllerState::Idle;
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> Result<MutexGuard<'_, Shared>> {
    shared
        .lock()
        .map_err(|_| SonifyError::msg("job controller state has been poisoned"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use image::{GrayImage, Luma};

    use super::*;
    use crate::audio;

    fn library(buckets: &[i32]) -> (tempfile::TempDir, Arc<SampleLibrary>) {
        let dir = tempfile::tempdir().unwrap();
        for &bucket in buckets {
            let path = dir.path().join(format!("{bucket}.wav"));
            audio::save_wav(&path, &[0.25; 20], 1_000).unwrap();
        }
        let library = Arc::new(SampleLibrary::new(dir.path(), 1_000));
        (dir, library)
    }

    fn request(source: JobSource, output_path: PathBuf) -> JobRequest {
        JobRequest {
            source,
            output_path,
            detection: DetectionConfig::default(),
            synthesis: SynthesisConfig::default(),
        }
    }

    fn star_field() -> DynamicImage {
        let mut gray = GrayImage::new(60, 60);
        for (cx, cy) in [(10u32, 10u32), (30, 40), (50, 20)] {
            for y in cy - 1..=cy + 1 {
                for x in cx - 1..=cx + 1 {
                    gray.put_pixel(x, y, Luma([255]));
                }
            }
        }
        DynamicImage::ImageLuma8(gray)
    }

    fn drain(handle: &JobHandle) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Ok(event) = handle.events().recv_timeout(Duration::from_secs(10)) {
            let finished = matches!(event, JobEvent::Finished(_));
            events.push(event);
            if finished {
                break;
            }
        }
        events
    }

    #[test]
    fn token_starts_unset_and_is_shared_by_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());

        clone.cancel();
        assert!(token.is_cancelled());
        assert!(!CancellationToken::new().is_cancelled());
    }

    #[test]
    fn runs_detection_then_synthesis() {
        let (_lib, library) = library(&[25, 41, 75]);
        let out = tempfile::tempdir().unwrap();
        let output = out.path().join("stars.wav");
        let controller = JobController::new(library);

        let handle = controller
            .start(request(JobSource::Image(star_field()), output.clone()))
            .unwrap();
        let events = drain(&handle);
        let outcome = handle.wait().unwrap();

        assert!(outcome.is_success());
        assert!(output.is_file());
        assert_eq!(controller.state().unwrap(), ControllerState::Idle);
        assert_eq!(controller.last_outcome().unwrap(), Some(outcome.clone()));

        let stages: Vec<Stage> = events
            .iter()
            .filter_map(|e| match e {
                JobEvent::Progress { stage, .. } => Some(*stage),
                JobEvent::Finished(_) => None,
            })
            .collect();
        assert_eq!(stages.first(), Some(&Stage::Detection));
        assert_eq!(stages.last(), Some(&Stage::Synthesis));
        assert_eq!(events.last(), Some(&JobEvent::Finished(outcome.clone())));

        let JobOutcome::Succeeded(report) = outcome else {
            unreachable!()
        };
        let buckets: Vec<i32> = report.overlays.iter().map(|o| o.bucket).collect();
        // Sorted by x: (10,10), (30,40), (50,20).
        assert_eq!(buckets, vec![25, 75, 41]);
    }

    #[test]
    fn empty_detection_reports_failure() {
        let (_lib, library) = library(&[50]);
        let out = tempfile::tempdir().unwrap();
        let output = out.path().join("none.wav");
        let controller = JobController::new(library);
        let blank = DynamicImage::ImageLuma8(GrayImage::new(16, 16));

        let handle = controller
            .start(request(JobSource::Image(blank), output.clone()))
            .unwrap();
        let outcome = handle.wait().unwrap();

        assert!(matches!(outcome, JobOutcome::Failed(_)));
        assert!(!output.exists());
    }

    #[test]
    fn refuses_second_job_while_running() {
        let (_lib, library) = library(&[50]);
        let out = tempfile::tempdir().unwrap();
        let controller = JobController::new(library);
        controller.shared.lock().unwrap().state = ControllerState::Running(7);

        let second = controller.start(request(
            JobSource::Points {
                points: vec![Point::new(1, 1)],
                image_width: 2,
            },
            out.path().join("b.wav"),
        ));

        assert!(matches!(second, Err(SonifyError::JobInFlight(7))));
        assert_eq!(controller.state().unwrap(), ControllerState::Running(7));
        assert!(!out.path().join("b.wav").exists());
    }

    #[test]
    fn controller_recovers_after_cancel() {
        let (_lib, library) = library(&[50]);
        let out = tempfile::tempdir().unwrap();
        let output = out.path().join("cancelled.wav");
        let controller = JobController::new(library);

        let points: Vec<Point> = (0..100_000).map(|x| Point::new(x, 3)).collect();
        let mut long_job = request(
            JobSource::Points {
                points,
                image_width: 100_000,
            },
            output.clone(),
        );
        long_job.synthesis.interval_ms = 1;
        let handle = controller.start(long_job).unwrap();
        handle.cancel();
        let events = drain(&handle);
        let outcome = handle.wait().unwrap();

        // The worker may already be past its last point; either way the
        // event stream ends consistently with the outcome.
        let last_progress = events.iter().rev().find_map(|e| match e {
            JobEvent::Progress { state, .. } => Some(state.progress_percent),
            JobEvent::Finished(_) => None,
        });
        match outcome {
            JobOutcome::Cancelled => {
                assert!(!output.exists());
                assert_eq!(last_progress, Some(0.0));
            }
            other => {
                assert!(other.is_success());
                assert_eq!(last_progress, Some(100.0));
            }
        }

        // The controller accepts a new job afterwards.
        let next = controller
            .start(request(
                JobSource::Points {
                    points: vec![Point::new(1, 1)],
                    image_width: 2,
                },
                out.path().join("next.wav"),
            ))
            .unwrap();
        assert!(next.wait().unwrap().is_success());
    }
}
