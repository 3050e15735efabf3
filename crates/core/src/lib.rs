//! Core library for the Star Sonifier application.
//!
//! The crate turns a star field image into a short piece of music. Bright
//! blobs are detected in the image, each one's vertical position picks a
//! prerecorded note, and the notes are laid out left to right on a mixed
//! timeline that is exported as a WAV file. Jobs run on a background worker
//! with cooperative cancellation and streamed progress.

pub mod assets;
pub mod audio;
pub mod catalog;
pub mod config;
pub mod detection;
pub mod error;
pub mod job;
pub mod mapping;
pub mod timeline;

pub use image;

pub use assets::{Sample, SampleLibrary};
pub use audio::Clip;
pub use catalog::{FileImageLoader, ImageCatalog, ImageLoader, Studio};
pub use config::{AppConfig, DetectionConfig, SynthesisConfig};
pub use detection::{annotate, detect, intensity, BlobDetector, Point};
pub use error::{Result, SonifyError};
pub use job::{
    CancellationToken, ControllerState, JobController, JobEvent, JobHandle, JobOutcome, JobRequest,
    JobSource, JobState, ProgressSink, Stage,
};
pub use mapping::{map_to_range, RangeMap};
pub use timeline::{
    synthesize, Overlay, SynthesisOutcome, SynthesisPlan, SynthesisReport, Timeline,
};
