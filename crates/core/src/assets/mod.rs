use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{audio, audio::Clip, Result, SonifyError};

/// Prerendered note clip for one pitch bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub bucket: i32,
    pub clip: Clip,
}

/// Read-only store of note clips keyed by integer pitch bucket.
///
/// Clips live in one directory as `<bucket>.wav`. Decoded clips are cached
/// after the first lookup and resampled to the library's output rate.
#[derive(Debug)]
pub struct SampleLibrary {
    root: PathBuf,
    sample_rate: u32,
    cache: Mutex<HashMap<i32, Arc<Sample>>>,
}

impl SampleLibrary {
    pub fn new(root: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            root: root.into(),
            sample_rate,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Storage location of the clip for `bucket`.
    pub fn path_for(&self, bucket: i32) -> PathBuf {
        self.root.join(format!("{bucket}.wav"))
    }

    /// Looks up the clip for `bucket`.
    ///
    /// A missing file yields [`SonifyError::SampleMissing`]; callers decide
    /// whether that is fatal.
    pub fn lookup(&self, bucket: i32) -> Result<Arc<Sample>> {
        if let Some(sample) = self.lock_cache()?.get(&bucket) {
            return Ok(sample.clone());
        }

        let path = self.path_for(bucket);
        if !path.is_file() {
            return Err(SonifyError::SampleMissing { bucket, path });
        }

        let clip = audio::read_wav(&path)?.resampled(self.sample_rate);
        let sample = Arc::new(Sample { bucket, clip });
        self.lock_cache()?.insert(bucket, sample.clone());
        Ok(sample)
    }

    /// Buckets in `range` that have no clip on disk.
    pub fn missing_buckets(&self, range: std::ops::RangeInclusive<i32>) -> Vec<i32> {
        range.filter(|&b| !self.path_for(b).is_file()).collect()
    }

    fn lock_cache(&self) -> Result<MutexGuard<'_, HashMap<i32, Arc<Sample>>>> {
        self.cache
            .lock()
            .map_err(|_| SonifyError::msg("sample cache has been poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library_with(buckets: &[i32], rate: u32) -> (tempfile::TempDir, SampleLibrary) {
        let dir = tempfile::tempdir().unwrap();
        for &bucket in buckets {
            let path = dir.path().join(format!("{bucket}.wav"));
            audio::save_wav(&path, &[0.5; 100], rate).unwrap();
        }
        let library = SampleLibrary::new(dir.path(), 1_000);
        (dir, library)
    }

    #[test]
    fn resolves_registered_buckets() {
        let (_dir, library) = library_with(&[25, 50], 1_000);

        let sample = library.lookup(50).unwrap();
        assert_eq!(sample.bucket, 50);
        assert_eq!(sample.clip.len(), 100);
        assert_eq!(sample.clip.duration_ms(), 100);
    }

    #[test]
    fn errors_on_missing_buckets() {
        let (_dir, library) = library_with(&[25], 1_000);

        let err = library.lookup(26).unwrap_err();
        assert!(matches!(err, SonifyError::SampleMissing { bucket: 26, .. }));
        assert!(format!("{err}").contains("26.wav"));
    }

    #[test]
    fn cached_lookup_matches_fresh_read() {
        let (dir, library) = library_with(&[30], 1_000);
        let first = library.lookup(30).unwrap();

        std::fs::remove_file(dir.path().join("30.wav")).unwrap();
        let second = library.lookup(30).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn resamples_to_library_rate() {
        let (_dir, library) = library_with(&[40], 500);

        let sample = library.lookup(40).unwrap();
        assert_eq!(sample.clip.sample_rate(), 1_000);
        assert_eq!(sample.clip.len(), 200);
    }

    #[test]
    fn lists_missing_buckets() {
        let (_dir, library) = library_with(&[25, 27], 1_000);
        assert_eq!(library.missing_buckets(25..=28), vec![26, 28]);
    }
}
