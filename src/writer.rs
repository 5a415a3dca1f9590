use crate::{AcquisitionError, CaptureBatch};
use anyhow::{Context, Result};
use hdf5::{File, H5Type};
use log::{info, warn};
use ndarray::{Array1, Array2};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Artifact name prefixes of one session; all four share the run id.
pub const ARTIFACTS: [&str; 4] = [
    "shuffle_traces",
    "message_traces",
    "shuffle_labels",
    "message_labels",
];

const EXTENSION: &str = "h5";
const PARTIAL_EXTENSION: &str = "h5.partial";

/// Numeric suffix of `<artifact>_<N>[.ext...]`, if `file_name` has that shape.
fn artifact_id(file_name: &str, artifact: &str) -> Option<usize> {
    let rest = file_name.strip_prefix(artifact)?.strip_prefix('_')?;
    let digits = rest.split('.').next()?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// One past the highest id used by any `<artifact>_<N>` file in `dir`, or 0.
///
/// A missing directory is created. Two sessions scanning the same directory
/// concurrently can be handed the same id.
pub fn next_available_id(dir: &Path, artifacts: &[&str]) -> Result<usize> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
        info!("Created output directory {}", dir.display());
    }

    let max_id = fs::read_dir(dir)
        .with_context(|| format!("scanning {}", dir.display()))?
        .filter_map(|e| e.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            artifacts
                .iter()
                .filter_map(|artifact| artifact_id(name, artifact))
                .max()
        })
        .max();

    Ok(max_id.map_or(0, |max| max + 1))
}

/// Hands out the run id a new session is saved under.
pub trait RunIdAllocator {
    fn next_id(&self, dir: &Path, artifacts: &[&str]) -> Result<usize>;
}

/// Allocates by scanning the output directory; see [`next_available_id`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryScan;

impl RunIdAllocator for DirectoryScan {
    fn next_id(&self, dir: &Path, artifacts: &[&str]) -> Result<usize> {
        next_available_id(dir, artifacts)
    }
}

/// Paths of the four files written for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFileSet {
    pub run_id: usize,
    pub shuffle_traces: PathBuf,
    pub message_traces: PathBuf,
    pub shuffle_labels: PathBuf,
    pub message_labels: PathBuf,
}

impl SessionFileSet {
    pub fn new(dir: &Path, run_id: usize) -> Self {
        let path = |artifact: &str| dir.join(format!("{artifact}_{run_id}.{EXTENSION}"));
        Self {
            run_id,
            shuffle_traces: path(ARTIFACTS[0]),
            message_traces: path(ARTIFACTS[1]),
            shuffle_labels: path(ARTIFACTS[2]),
            message_labels: path(ARTIFACTS[3]),
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        [
            &self.shuffle_traces,
            &self.message_traces,
            &self.shuffle_labels,
            &self.message_labels,
        ]
        .into_iter()
        .map(PathBuf::as_path)
    }
}

fn partial(path: &Path) -> PathBuf {
    path.with_extension(PARTIAL_EXTENSION)
}

/// Writes complete batches as one HDF5 file per artifact.
pub struct SessionWriter<A = DirectoryScan> {
    pub output_dir: PathBuf,
    pub compression_level: u8,
    pub blosc_threads: u8,
    allocator: A,
}

impl<A: RunIdAllocator> SessionWriter<A> {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        compression_level: u8,
        blosc_threads: u8,
        allocator: A,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            compression_level,
            blosc_threads,
            allocator,
        }
    }

    /// Allocate a run id and write all four artifacts under it.
    ///
    /// Files are written under a `.partial` name and only renamed once all of
    /// them succeeded.
    pub fn commit(&self, batch: &CaptureBatch) -> Result<SessionFileSet> {
        if !batch.is_complete() {
            return Err(AcquisitionError::IncompleteBatch {
                filled: batch.filled(),
                rows: batch.layout().rows,
            }
            .into());
        }

        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("creating output directory {}", self.output_dir.display()))?;
        let run_id = self.allocator.next_id(&self.output_dir, &ARTIFACTS)?;
        info!("file_number = {run_id}");
        let files = SessionFileSet::new(&self.output_dir, run_id);

        if self.compression_level > 0 {
            hdf5::filters::blosc_set_nthreads(self.blosc_threads);
        }

        if let Err(e) = self.write_partials(batch, &files) {
            discard(files.paths().map(partial));
            return Err(e);
        }

        let mut finalized = Vec::with_capacity(ARTIFACTS.len());
        for path in files.paths() {
            if let Err(e) = fs::rename(partial(path), path) {
                // a run is all four files or none of them
                discard(finalized.into_iter().chain(files.paths().map(partial)));
                return Err(e).with_context(|| format!("finalizing {}", path.display()));
            }
            finalized.push(path.to_path_buf());
        }
        Ok(files)
    }

    fn write_partials(&self, batch: &CaptureBatch, files: &SessionFileSet) -> Result<()> {
        self.write_matrix(&files.shuffle_traces, ARTIFACTS[0], &batch.shuffle_waveforms)?;
        let message = self.write_matrix(&files.message_traces, ARTIFACTS[1], &batch.message_waveforms)?;
        write_vector(&message, "trigger_counts", &batch.trigger_counts)?;
        self.write_matrix(&files.shuffle_labels, ARTIFACTS[2], &batch.shuffle_labels)?;
        self.write_matrix(&files.message_labels, ARTIFACTS[3], &batch.message_labels)?;
        Ok(())
    }

    /// Create `<path>.partial` holding `data` as dataset `name`; one row per chunk.
    fn write_matrix<T: H5Type>(&self, path: &Path, name: &str, data: &Array2<T>) -> Result<File> {
        let partial = partial(path);
        let file = File::create(&partial)
            .with_context(|| format!("creating {}", partial.display()))?;

        let (rows, cols) = data.dim();
        let builder = file.new_dataset::<T>().shape((rows, cols)).chunk((1, cols));
        let builder = if self.compression_level > 0 {
            builder.blosc_zstd(self.compression_level, true)
        } else {
            builder
        };
        let dataset = builder.create(name)?;
        dataset.write(data)?;
        Ok(file)
    }
}

/// Remove the regular files among `paths`; failures are only logged.
fn discard(paths: impl IntoIterator<Item = PathBuf>) {
    for path in paths {
        if path.is_file() {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Could not remove {}: {e}", path.display());
            }
        }
    }
}

fn write_vector<T: H5Type>(file: &File, name: &str, data: &Array1<T>) -> Result<()> {
    let dataset = file.new_dataset::<T>().shape(data.len()).create(name)?;
    dataset.write(data)?;
    Ok(())
}
