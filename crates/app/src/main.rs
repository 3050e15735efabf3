use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use star_sonifier_core::image::DynamicImage;
use star_sonifier_core::{
    annotate, AppConfig, BlobDetector, DetectionConfig, FileImageLoader, ImageLoader,
    JobController, JobEvent, JobOutcome, JobRequest, JobSource, SampleLibrary, SonifyError,
    Stage, Studio,
};
use tracing_subscriber::EnvFilter;

fn main() -> star_sonifier_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Detect {
            image,
            annotate,
            min_area,
        } => run_detect(&image, annotate.as_deref(), min_area),
        Commands::Sonify { image, options } => run_sonify(&image, options),
        Commands::Catalog { config } => run_catalog(config.as_deref()),
        Commands::Create { index, options } => run_create(index, options),
    }
}

fn run_detect(
    image: &Path,
    annotated: Option<&Path>,
    min_area: f64,
) -> star_sonifier_core::Result<()> {
    tracing::info!(?image, "detecting stars");

    let decoded = load_image(image)?;
    let points = BlobDetector::new(DetectionConfig { min_area }).detect(&decoded);
    tracing::info!(stars = points.len(), "detection finished");

    if let Some(path) = annotated {
        annotate(&decoded, &points).save(path)?;
        tracing::info!(?path, "annotated image written");
    }

    println!("{}", serde_json::to_string_pretty(&points)?);
    Ok(())
}

fn run_sonify(image: &Path, options: SonifyOptions) -> star_sonifier_core::Result<()> {
    let config = options.resolve()?;
    tracing::info!(?image, output = ?config.output_path, "sonifying image");

    let decoded = load_image(image)?;
    let library = Arc::new(SampleLibrary::new(&config.sample_dir, config.sample_rate));
    let pitch = config.synthesis.pitch_min..=config.synthesis.pitch_max;
    let missing = library.missing_buckets(pitch);
    if !missing.is_empty() {
        tracing::warn!(?missing, dir = ?config.sample_dir, "sample library is incomplete");
    }

    let controller = JobController::new(library);
    let handle = controller.start(JobRequest {
        source: JobSource::Image(decoded),
        output_path: config.output_path.clone(),
        detection: config.detection,
        synthesis: config.synthesis,
    })?;

    report_progress(handle.events());
    finish(handle.wait()?)
}

fn run_catalog(config: Option<&Path>) -> star_sonifier_core::Result<()> {
    let config = AppConfig::load_or_default(config)?;
    for (index, entry) in config.catalog.iter().enumerate() {
        println!("{index:>3}  {entry}");
    }
    Ok(())
}

fn run_create(index: usize, options: SonifyOptions) -> star_sonifier_core::Result<()> {
    let config = options.resolve()?;
    let (max_stars, interval) = (config.synthesis.max_stars, config.synthesis.interval_ms);
    let studio = Studio::new(config, Box::new(FileImageLoader));

    let handle = studio.create_audio(index, max_stars, Some(interval))?;
    report_progress(handle.events());
    finish(handle.wait()?)?;

    let bytes = studio.download_audio()?;
    tracing::info!(
        bytes = bytes.len(),
        path = ?studio.output_path(),
        "audio ready for download"
    );
    Ok(())
}

fn load_image(path: &Path) -> star_sonifier_core::Result<DynamicImage> {
    let location = path
        .to_str()
        .ok_or(SonifyError::InvalidInput("image path is not valid UTF-8"))?;
    FileImageLoader.load(location)
}

fn report_progress(events: &std::sync::mpsc::Receiver<JobEvent>) {
    let mut last_decile = None;
    for event in events.iter() {
        match event {
            JobEvent::Progress {
                stage: Stage::Detection,
                state,
            } => {
                tracing::info!(percent = state.progress_percent, "star detection");
            }
            JobEvent::Progress {
                stage: Stage::Synthesis,
                state,
            } => {
                let decile = (state.progress_percent / 10.0) as u32;
                if last_decile != Some(decile) {
                    last_decile = Some(decile);
                    tracing::info!(
                        processed = state.processed_count,
                        total = state.total_count,
                        percent = state.progress_percent,
                        "audio processing"
                    );
                }
            }
            JobEvent::Finished(_) => break,
        }
    }
}

fn finish(outcome: JobOutcome) -> star_sonifier_core::Result<()> {
    match outcome {
        JobOutcome::Succeeded(report) => {
            tracing::info!(
                path = ?report.output_path,
                duration_ms = report.duration_ms,
                notes = report.overlays.len(),
                skipped = report.skipped,
                "audio saved"
            );
            Ok(())
        }
        JobOutcome::Failed(reason) => {
            Err(SonifyError::msg(format!("no audio generated: {reason}")))
        }
        JobOutcome::Cancelled => Err(SonifyError::msg("audio processing cancelled")),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Turn star fields into music", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Detect stars in an image and print their coordinates as JSON.
    Detect {
        image: PathBuf,
        /// Write a copy of the image with every detected star marked.
        #[arg(long)]
        annotate: Option<PathBuf>,
        #[arg(long, default_value_t = 3.0)]
        min_area: f64,
    },
    /// Detect stars in an image and render them to a WAV file.
    Sonify {
        image: PathBuf,
        #[command(flatten)]
        options: SonifyOptions,
    },
    /// List the candidate images known to the configuration.
    Catalog {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Sonify the catalog entry at `index`.
    ///
    /// Entries are opened as local image paths. The built-in gallery lists
    /// telescope URLs, so pass a `--config` whose `catalog` names downloaded
    /// copies.
    Create {
        index: usize,
        #[command(flatten)]
        options: SonifyOptions,
    },
}

#[derive(Args, Debug)]
struct SonifyOptions {
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Directory holding one `<bucket>.wav` per pitch bucket.
    #[arg(long)]
    samples: Option<PathBuf>,
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Only sonify the leftmost N stars.
    #[arg(long)]
    max_stars: Option<usize>,
    /// Milliseconds between consecutive note starts.
    #[arg(long)]
    interval: Option<u32>,
}

impl SonifyOptions {
    fn resolve(self) -> star_sonifier_core::Result<AppConfig> {
        let mut config = AppConfig::load_or_default(self.config.as_deref())?;
        if let Some(samples) = self.samples {
            config.sample_dir = samples;
        }
        if let Some(output) = self.output {
            config.output_path = output;
        }
        if self.max_stars.is_some() {
            config.synthesis.max_stars = self.max_stars;
        }
        if let Some(interval) = self.interval {
            config.synthesis.interval_ms = interval;
        }
        Ok(config)
    }
}
