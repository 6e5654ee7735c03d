//! Progress arithmetic for files and jobs.

use super::types::BatchFile;

/// Ramp step per tick while a file is in flight.
pub const RAMP_STEP: u8 = 10;
/// Highest synthetic value before the real result arrives.
pub const RAMP_CEILING: u8 = 90;

/// Next synthetic progress value for an in-flight file.
pub fn ramp(current: u8) -> u8 {
    current.saturating_add(RAMP_STEP).min(RAMP_CEILING).max(current)
}

/// Rounded mean of the files' progress; 0 for an empty list.
pub fn job_progress(files: &[BatchFile]) -> u8 {
    if files.is_empty() {
        return 0;
    }
    let total: u32 = files.iter().map(|f| u32::from(f.progress)).sum();
    let count = files.len() as u32;
    // Integer round-half-up of total / count
    ((total * 2 + count) / (count * 2)).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::batch::types::{BatchJob, NewBatchFile};
    use crate::domains::compression::types::CompressionOptions;

    fn files(progress: &[u8]) -> Vec<BatchFile> {
        let new_files = progress
            .iter()
            .enumerate()
            .map(|(i, _)| NewBatchFile::new(format!("{}.pdf", i), format!("/tmp/{}.pdf", i), 1))
            .collect();
        let mut job = BatchJob::new("u", new_files, CompressionOptions::default());
        for (file, p) in job.files.iter_mut().zip(progress) {
            file.progress = *p;
        }
        job.files
    }

    #[test]
    fn test_ramp_caps_at_ninety() {
        let mut p = 0;
        let mut seen = Vec::new();
        for _ in 0..12 {
            p = ramp(p);
            seen.push(p);
        }
        assert_eq!(&seen[..3], &[10, 20, 30]);
        assert_eq!(*seen.last().unwrap(), 90);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_ramp_never_moves_backwards() {
        assert_eq!(ramp(95), 95);
        assert_eq!(ramp(100), 100);
    }

    #[test]
    fn test_job_progress_rounds_mean() {
        assert_eq!(job_progress(&[]), 0);
        assert_eq!(job_progress(&files(&[100, 0, 0])), 33);
        assert_eq!(job_progress(&files(&[100, 100, 0])), 67);
        assert_eq!(job_progress(&files(&[50, 0])), 25);
        assert_eq!(job_progress(&files(&[1, 0])), 1); // 0.5 rounds up
        assert_eq!(job_progress(&files(&[100, 100])), 100);
    }
}
