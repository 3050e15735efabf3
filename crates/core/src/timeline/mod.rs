use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    assets::SampleLibrary,
    audio::{self, Clip},
    config::SynthesisConfig,
    detection::Point,
    job::{CancellationToken, JobState, ProgressSink},
    mapping::RangeMap,
    Result, SonifyError,
};

/// Mutable mono audio buffer holding the in-progress mix.
///
/// The buffer only ever grows; overlays add into existing content.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    sample_rate: u32,
    samples: Vec<f32>,
}

impl Timeline {
    /// Allocates `duration_ms` of silence.
    pub fn silent(duration_ms: u64, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            samples: vec![0.0; audio::ms_to_samples(duration_ms, sample_rate)],
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        audio::samples_to_ms(self.samples.len(), self.sample_rate)
    }

    /// Pads with silence until the buffer holds at least `len` samples.
    pub fn extend_to(&mut self, len: usize) {
        if len > self.samples.len() {
            self.samples.resize(len, 0.0);
        }
    }

    /// Mixes `clip` into the buffer starting at `position_ms`. Whatever does
    /// not fit inside the current length is dropped; call [`extend_to`]
    /// first to keep the whole clip.
    ///
    /// [`extend_to`]: Timeline::extend_to
    pub fn overlay(&mut self, clip: &Clip, position_ms: u64) {
        let start = audio::ms_to_samples(position_ms, self.sample_rate);
        if start >= self.samples.len() {
            return;
        }
        for (dst, src) in self.samples[start..].iter_mut().zip(clip.samples()) {
            *dst += *src;
        }
    }

    /// Writes the mix as a 16-bit WAV file.
    pub fn export(&self, path: impl AsRef<Path>) -> Result<()> {
        audio::save_wav(path, &self.samples, self.sample_rate)
    }
}

/// Ordered, truncated point set plus the derived mixing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisPlan {
    /// Points in non-decreasing `x` order, at most `max_stars` of them.
    pub points: Vec<Point>,
    pub min_y: u32,
    pub max_y: u32,
    pub total_duration_ms: u64,
}

impl SynthesisPlan {
    /// Returns `None` for an empty point set.
    pub fn new(mut points: Vec<Point>, config: &SynthesisConfig) -> Option<Self> {
        if points.is_empty() {
            return None;
        }

        points.sort_by_key(|point| point.x);
        if let Some(max_stars) = config.max_stars {
            points.truncate(max_stars);
        }

        // max_stars = 0 leaves nothing to derive a range from.
        let min_y = points.iter().map(|p| p.y).min()?;
        let max_y = points.iter().map(|p| p.y).max()?;
        let total_duration_ms = total_duration_ms(points.len(), config);

        Some(Self {
            points,
            min_y,
            max_y,
            total_duration_ms,
        })
    }

    /// Pitch mapping shared by every point of the job.
    pub fn pitch_map(&self, config: &SynthesisConfig) -> RangeMap {
        RangeMap::new(
            self.min_y as f64,
            self.max_y as f64,
            config.pitch_min as f64,
            config.pitch_max as f64,
        )
    }
}

/// `(count - 1) * interval + tail`, never shorter than the configured floor.
pub fn total_duration_ms(count: usize, config: &SynthesisConfig) -> u64 {
    let steps = count.saturating_sub(1) as u64;
    let natural = steps * config.interval_ms as u64 + config.tail_ms as u64;
    natural.max(config.min_duration_ms as u64)
}

/// One clip placed on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overlay {
    pub point: Point,
    pub bucket: i32,
    pub position_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisReport {
    pub output_path: PathBuf,
    pub duration_ms: u64,
    pub overlays: Vec<Overlay>,
    /// Points whose bucket had no usable clip.
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SynthesisOutcome {
    Exported(SynthesisReport),
    /// Nothing was detected; no file is written.
    NoPoints,
    /// The job was cancelled after `processed` points; no file is written.
    Cancelled { processed: usize },
    /// The mix ended up with zero length and was not exported.
    Silent,
}

impl SynthesisOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exported(_))
    }
}

/// Mixes the library clips selected by `points` into one track and exports
/// it to `output_path`.
///
/// Points are played in ascending `x` order, one every `interval_ms`. Each
/// point's `y` picks the pitch bucket through a linear map of the job's own
/// vertical extent onto `[pitch_min, pitch_max]`. Missing clips are logged
/// and skipped without advancing the cursor.
///
/// Progress is published after every point that passes the cancellation
/// check and once more at 100 when the loop completes. A cancelled job
/// publishes 0 and stops.
pub fn synthesize(
    points: Vec<Point>,
    image_width: u32,
    output_path: &Path,
    config: &SynthesisConfig,
    library: &SampleLibrary,
    cancel: &CancellationToken,
    progress: &dyn ProgressSink,
) -> Result<SynthesisOutcome> {
    let Some(plan) = SynthesisPlan::new(points, config) else {
        tracing::info!("no star coordinates to sonify");
        return Ok(SynthesisOutcome::NoPoints);
    };

    let pitch = plan.pitch_map(config);
    let placement = RangeMap::new(0.0, image_width as f64, 0.0, plan.total_duration_ms as f64);
    let total = plan.points.len();
    let mut timeline = Timeline::silent(plan.total_duration_ms, library.sample_rate());
    let mut cursor_ms = 0u64;
    let mut overlays = Vec::new();
    let mut skipped = 0usize;

    tracing::info!(
        stars = total,
        min_y = plan.min_y,
        max_y = plan.max_y,
        duration_ms = plan.total_duration_ms,
        "mixing star timeline"
    );

    for (index, point) in plan.points.iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::info!(processed = index, total, "audio processing cancelled");
            progress.publish(JobState::new(index, total, 0.0));
            return Ok(SynthesisOutcome::Cancelled { processed: index });
        }

        let processed = index + 1;
        progress.publish(JobState::new(
            processed,
            total,
            processed as f32 / total as f32 * 100.0,
        ));

        let mapped = pitch.apply(point.y as f64);
        // Placement by horizontal position is reported only; notes start on
        // the fixed-interval cursor.
        let mapped_ms = placement.apply(point.x as f64);
        if !pitch.contains_target(mapped) {
            tracing::warn!(x = point.x, y = point.y, mapped, "pitch outside bucket range");
            skipped += 1;
            continue;
        }
        let bucket = mapped as i32;

        let sample = match library.lookup(bucket) {
            Ok(sample) => sample,
            Err(SonifyError::SampleMissing { path, .. }) => {
                tracing::warn!(bucket, path = %path.display(), "sample not found, skipping star");
                skipped += 1;
                continue;
            }
            Err(err) => {
                tracing::warn!(bucket, error = %err, "sample unreadable, skipping star");
                skipped += 1;
                continue;
            }
        };

        let start = audio::ms_to_samples(cursor_ms, timeline.sample_rate());
        timeline.extend_to(start + sample.clip.len());
        timeline.overlay(&sample.clip, cursor_ms);
        tracing::debug!(bucket, position_ms = cursor_ms, mapped_ms, "overlaid sample");

        overlays.push(Overlay {
            point: *point,
            bucket,
            position_ms: cursor_ms,
        });
        cursor_ms += config.interval_ms as u64;
    }

    let outcome = if timeline.duration_ms() > 0 {
        timeline.export(output_path).map(|()| {
            tracing::info!(
                path = %output_path.display(),
                duration_ms = timeline.duration_ms(),
                "audio saved"
            );
            SynthesisOutcome::Exported(SynthesisReport {
                output_path: output_path.to_path_buf(),
                duration_ms: timeline.duration_ms(),
                overlays,
                skipped,
            })
        })
    } else {
        tracing::info!("no audio generated");
        Ok(SynthesisOutcome::Silent)
    };

    progress.publish(JobState::new(total, total, 100.0));
    outcome
}
