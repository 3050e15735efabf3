//! Candidate images and the front-end facade over the job pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::DynamicImage;

use crate::{
    assets::SampleLibrary,
    config::AppConfig,
    job::{JobController, JobHandle, JobRequest, JobSource},
    Result, SonifyError,
};

const DEFAULT_IMAGE_URLS: &[&str] = &[
    "https://stsci-opo.org/STScI-01J7BVGEPR6BTSCGHRG8MM8GDJ.jpg",
    "https://stsci-opo.org/STScI-01J5E84FQE409A25RG9KCSSCRS.png",
    "https://stsci-opo.org/STScI-01J09ECGMXDT8TCQH19HQN9FZ2.jpg",
    "https://stsci-opo.org/STScI-01J06XZZCGVD7HBM57Y0D0PQ12.jpg",
    "https://stsci-opo.org/STScI-01J06ZFWJRYEWWC7DX59QVCKTC.jpg",
    "https://stsci-opo.org/STScI-01J0PA3WF4913VD555ZXMRXGA6.jpg",
    "https://stsci-opo.org/STScI-01J0709DWCQ62K2TWJ6RNRH9BY.jpg",
    "https://stsci-opo.org/STScI-01J070EA2WHYN4C1HNWW4JGAMD.jpg",
    "https://stsci-opo.org/STScI-01HYGF8985BWJWGT9DZ7WM9F62.png",
    "https://stsci-opo.org/STScI-01HYGK7ZHMKHSFAFS4X3T2883J.png",
    "https://stsci-opo.org/STScI-01HYGKZ738T2BKTF6426GC5TKE.png",
    "https://stsci-opo.org/STScI-01J04A5Z6KRTGC8K9B5R7SYK77.jpg",
    "https://stsci-opo.org/STScI-01HZME8S3F7D5TG8VSC61Y3QJY.png",
    "https://stsci-opo.org/STScI-01HZ0846ZKA69JAA217MPJZ9RV.png",
    "https://stsci-opo.org/STScI-01HTFYYGRMK3C2PRJ7GMHRQAMA.jpg",
    "https://stsci-opo.org/STScI-01HV4BFQCW7RZHQM563V9H1BVM.png",
    "https://stsci-opo.org/STScI-01HWDBWWT0SYNXXSETE5VD21QJ.jpg",
    "https://stsci-opo.org/STScI-01HRD3C2D0VJFYXXZTGPDPG49E.png",
    "https://stsci-opo.org/STScI-01HRD50Q449N2A4YQ9RN6EZKCX.png",
    "https://webbtelescope.org/files/live/sites/webb/files/home/resource-gallery/_images/wt-image-resources.jpg?t=tn1600",
];

/// The predefined telescope gallery.
pub fn default_image_urls() -> Vec<String> {
    DEFAULT_IMAGE_URLS.iter().map(|url| url.to_string()).collect()
}

/// Index-addressable list of candidate image locations.
#[derive(Debug, Clone, Default)]
pub struct ImageCatalog {
    entries: Vec<String>,
}

impl ImageCatalog {
    pub fn new(entries: Vec<String>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&str> {
        self.entries
            .get(index)
            .map(String::as_str)
            .ok_or(SonifyError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            })
    }
}

/// Turns a catalog entry into a decoded image.
pub trait ImageLoader: Send + Sync {
    fn load(&self, location: &str) -> Result<DynamicImage>;
}

/// Opens catalog entries as local file paths. Remote entries such as the
/// default gallery URLs are rejected; point the catalog at downloaded copies.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileImageLoader;

impl FileImageLoader {
    pub fn is_remote(location: &str) -> bool {
        location.starts_with("http://") || location.starts_with("https://")
    }
}

impl ImageLoader for FileImageLoader {
    fn load(&self, location: &str) -> Result<DynamicImage> {
        if Self::is_remote(location) {
            return Err(SonifyError::InvalidInput(
                "remote catalog entries need a downloading image loader",
            ));
        }
        Ok(image::open(location)?)
    }
}

/// Front-end facade: list candidates, start a job for one, fetch the result.
pub struct Studio {
    config: AppConfig,
    catalog: ImageCatalog,
    loader: Box<dyn ImageLoader>,
    controller: JobController,
}

impl Studio {
    pub fn new(config: AppConfig, loader: Box<dyn ImageLoader>) -> Self {
        let library = Arc::new(SampleLibrary::new(&config.sample_dir, config.sample_rate));
        Self {
            catalog: ImageCatalog::new(config.catalog.clone()),
            controller: JobController::new(library),
            config,
            loader,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn controller(&self) -> &JobController {
        &self.controller
    }

    pub fn output_path(&self) -> &Path {
        &self.config.output_path
    }

    pub fn list_candidate_images(&self) -> &[String] {
        self.catalog.entries()
    }

    /// Starts detection and synthesis for catalog entry `index`.
    ///
    /// The image is decoded on the caller's thread; a decode failure means
    /// no job is started. `interval_ms` of `None` keeps the configured step.
    pub fn create_audio(
        &self,
        index: usize,
        max_stars: Option<usize>,
        interval_ms: Option<u32>,
    ) -> Result<JobHandle> {
        let location = self.catalog.get(index)?;
        let image = self.loader.load(location)?;
        tracing::info!(
            index,
            location,
            width = image.width(),
            height = image.height(),
            "image loaded"
        );

        let mut synthesis = self.config.synthesis;
        synthesis.max_stars = max_stars;
        if let Some(interval_ms) = interval_ms {
            synthesis.interval_ms = interval_ms;
        }

        self.controller.start(JobRequest {
            source: JobSource::Image(image),
            output_path: self.config.output_path.clone(),
            detection: self.config.detection,
            synthesis,
        })
    }

    /// Bytes of the most recently exported file.
    pub fn download_audio(&self) -> Result<Vec<u8>> {
        let path = &self.config.output_path;
        if !path.is_file() {
            return Err(SonifyError::NoOutput(PathBuf::from(path)));
        }
        Ok(std::fs::read(path)?)
    }
}

impl std::fmt::Debug for Studio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Studio")
            .field("config", &self.config)
            .field("catalog", &self.catalog.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma};

    use super::*;
    use crate::audio;

    struct StarLoader;

    impl ImageLoader for StarLoader {
        fn load(&self, location: &str) -> Result<DynamicImage> {
            if location != "sky" {
                return Err(SonifyError::msg(format!("cannot fetch {location}")));
            }
            let mut gray = GrayImage::new(30, 30);
            for y in 4..=6 {
                for x in 4..=6 {
                    gray.put_pixel(x, y, Luma([255]));
                }
            }
            Ok(DynamicImage::ImageLuma8(gray))
        }
    }

    fn studio(dir: &Path, catalog: &[&str]) -> Studio {
        let sample_dir = dir.join("samples");
        std::fs::create_dir_all(&sample_dir).unwrap();
        audio::save_wav(sample_dir.join("50.wav"), &[0.3; 40], 1_000).unwrap();

        let config = AppConfig {
            sample_dir,
            output_path: dir.join("out.wav"),
            sample_rate: 1_000,
            catalog: catalog.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        Studio::new(config, Box::new(StarLoader))
    }

    #[test]
    fn catalog_rejects_out_of_range_index() {
        let catalog = ImageCatalog::new(default_image_urls());
        assert_eq!(catalog.len(), 20);
        assert!(catalog.get(0).unwrap().starts_with("https://"));

        let err = catalog.get(20).unwrap_err();
        assert!(matches!(err, SonifyError::IndexOutOfRange { index: 20, len: 20 }));
    }

    #[test]
    fn create_then_download() {
        let dir = tempfile::tempdir().unwrap();
        let studio = studio(dir.path(), &["sky"]);
        assert!(matches!(studio.download_audio(), Err(SonifyError::NoOutput(_))));

        let handle = studio.create_audio(0, None, Some(350)).unwrap();
        assert!(handle.wait().unwrap().is_success());

        let bytes = studio.download_audio().unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(audio::load_wav(&bytes).unwrap().duration_ms(), 10_000);
    }

    #[test]
    fn undecodable_image_starts_no_job() {
        let dir = tempfile::tempdir().unwrap();
        let studio = studio(dir.path(), &["sky", "cloud"]);

        assert!(studio.create_audio(1, None, None).is_err());
        assert!(studio.create_audio(5, None, None).is_err());
        assert_eq!(
            studio.controller().state().unwrap(),
            crate::job::ControllerState::Idle
        );
    }

    #[test]
    fn file_loader_reads_local_images() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("field.png");
        GrayImage::new(8, 4).save(&path).unwrap();

        let image = FileImageLoader.load(path.to_str().unwrap()).unwrap();
        assert_eq!((image.width(), image.height()), (8, 4));
    }

    #[test]
    fn file_loader_rejects_gallery_urls() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            sample_dir: dir.path().to_path_buf(),
            output_path: dir.path().join("out.wav"),
            ..Default::default()
        };
        let studio = Studio::new(config, Box::new(FileImageLoader));
        assert!(studio.list_candidate_images()[0].starts_with("https://"));

        let err = studio.create_audio(0, None, None).unwrap_err();
        assert!(matches!(err, SonifyError::InvalidInput(_)));
        assert!(!FileImageLoader::is_remote("stars/field.png"));
    }
}
