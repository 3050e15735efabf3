use std::path::PathBuf;

/// Result alias that carries the custom [`SonifyError`] type.
pub type Result<T> = std::result::Result<T, SonifyError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum SonifyError {
    /// Free-form failure, mostly used for poisoned locks and worker plumbing.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Image decoding or encoding failed.
    #[error("{0}")]
    Image(#[from] image::ImageError),
    /// Configuration (de)serialisation failed.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// A caller handed the pipeline a value it cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// No clip is stored for the requested pitch bucket.
    #[error("no sample for bucket {bucket} at `{}`", .path.display())]
    SampleMissing { bucket: i32, path: PathBuf },
    /// A clip exists but is not a PCM WAV file we can decode.
    #[error("invalid wav data: {0}")]
    InvalidWav(String),
    /// Single-flight guard: another synthesis job is still running.
    #[error("job {0} is still running")]
    JobInFlight(u64),
    #[error("image index {index} out of range (catalog has {len} entries)")]
    IndexOutOfRange { index: usize, len: usize },
    /// No exported audio exists at the configured output path.
    #[error("no audio has been exported to `{}`", .0.display())]
    NoOutput(PathBuf),
    #[error("synthesis worker panicked")]
    WorkerPanicked,
}

impl SonifyError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for SonifyError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for SonifyError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
