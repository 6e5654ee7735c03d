//! Zip bundles of a job's compressed outputs.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::task::{self, JoinHandle};
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::domains::compression::service::remove_file_quietly;
use crate::errors::{DomainError, DomainResult};
use super::types::BatchJob;

const ENTRY_PREFIX: &str = "compressed_";

pub struct ArchiveBuilder {
    output_dir: PathBuf,
}

impl ArchiveBuilder {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn archive_path(&self, job_id: Uuid) -> PathBuf {
        self.output_dir.join(format!("batch-{}.zip", job_id))
    }

    /// Write every successful output of `job` into `batch-<id>.zip`.
    ///
    /// Outputs that have disappeared from disk are skipped. The archive is
    /// assembled in a temporary file and moved into place once complete.
    pub async fn build(&self, job: &BatchJob) -> DomainResult<PathBuf> {
        let entries: Vec<(String, PathBuf)> = job
            .successful_files()
            .filter_map(|file| {
                file.result
                    .as_ref()
                    .map(|result| (file.original_name.clone(), result.output_path.clone()))
            })
            .collect();

        let output_dir = self.output_dir.clone();
        let target = self.archive_path(job.id);
        let job_id = job.id;

        let path = task::spawn_blocking(move || write_archive(&output_dir, &target, &entries)).await??;
        log::info!("Created archive {} for job {}", path.display(), job_id);
        Ok(path)
    }
}

fn archive_error(e: zip::result::ZipError) -> DomainError {
    DomainError::Archive(e.to_string())
}

fn write_archive(output_dir: &Path, target: &Path, entries: &[(String, PathBuf)]) -> DomainResult<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let temp = NamedTempFile::new_in(output_dir)?;
    let mut zip = ZipWriter::new(BufWriter::new(temp));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));

    let mut taken = HashSet::new();
    let mut written = 0usize;
    for (original_name, path) in entries {
        let mut source = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::warn!("Skipping missing output {} for archive", path.display());
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let name = unique_entry_name(&mut taken, &entry_name(original_name));
        zip.start_file(name, options).map_err(archive_error)?;
        // Streamed in chunks, never buffered whole
        io::copy(&mut source, &mut zip)?;
        written += 1;
    }

    if written == 0 {
        return Err(DomainError::Archive("No compressed files available".to_string()));
    }

    let writer = zip.finish().map_err(archive_error)?;
    let temp = writer
        .into_inner()
        .map_err(|e| DomainError::File(e.error().to_string()))?;
    temp.persist(target)
        .map_err(|e| DomainError::File(e.error.to_string()))?;
    Ok(target.to_path_buf())
}

fn entry_name(original_name: &str) -> String {
    let flat: String = original_name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    format!("{}{}", ENTRY_PREFIX, flat)
}

/// `name`, or `name` with a ` (n)` suffix before its extension if taken.
fn unique_entry_name(taken: &mut HashSet<String>, name: &str) -> String {
    if taken.insert(name.to_string()) {
        return name.to_string();
    }

    let (stem, extension) = match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    };
    let mut n = 1;
    loop {
        let candidate = format!("{} ({}){}", stem, n, extension);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Delete `path` once `delay` has passed.
pub fn schedule_removal(path: PathBuf, delay: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        remove_file_quietly(&path).await;
    })
}
