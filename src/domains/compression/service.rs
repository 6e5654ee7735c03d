use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::errors::{DomainError, DomainResult};
use super::compressors::{
    Compressor,
    pdf_compressor::PdfCompressor,
    pdf_rewriter::PdfRewriter,
};
use super::types::{format_file_size, CompressionMethod, CompressionOptions, CompressionResult};

#[async_trait]
pub trait CompressionService: Send + Sync {
    /// Compress one file. Never fails: errors are reported through the result.
    async fn compress(&self, source: &Path, options: &CompressionOptions) -> CompressionResult;
}

/// Delete `path`, ignoring files that are already gone.
pub async fn remove_file_quietly(path: &Path) {
    if path.as_os_str().is_empty() {
        return;
    }
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to cleanup file {}: {}", path.display(), e),
    }
}

/// Native-first PDF compression with an in-process fallback
pub struct CompressionEngine {
    output_dir: PathBuf,
    native: Box<dyn Compressor>,
    fallback: Box<dyn Compressor>,
}

impl CompressionEngine {
    pub fn new(config: &BatchConfig) -> Self {
        Self::with_compressors(
            config.output_dir.clone(),
            Box::new(PdfCompressor::new(Some(config.ghostscript_path.clone()), config.file_timeout)),
            Box::new(PdfRewriter::new()),
        )
    }

    pub fn with_compressors(
        output_dir: PathBuf,
        native: Box<dyn Compressor>,
        fallback: Box<dyn Compressor>,
    ) -> Self {
        Self {
            output_dir,
            native,
            fallback,
        }
    }

    /// Try the native tool. `None` means "fall back", never an error.
    async fn try_native(
        &self,
        source: &Path,
        output_path: &Path,
        original_size: u64,
        options: &CompressionOptions,
    ) -> Option<u64> {
        if !self.native.is_available().await {
            return None;
        }

        match self.native.compress(source, output_path, options).await {
            Ok(size) if size > 0 && size < original_size => Some(size),
            Ok(size) => {
                log::debug!(
                    "{} output for {} not smaller ({} -> {}), falling back",
                    self.native.compressor_name(),
                    source.display(),
                    format_file_size(original_size),
                    format_file_size(size)
                );
                remove_file_quietly(output_path).await;
                None
            }
            Err(e) => {
                log::warn!(
                    "{} failed for {}: {}; falling back",
                    self.native.compressor_name(),
                    source.display(),
                    e
                );
                remove_file_quietly(output_path).await;
                None
            }
        }
    }

    async fn try_compress(&self, source: &Path, options: &CompressionOptions) -> DomainResult<CompressionResult> {
        let original_size = match tokio::fs::metadata(source).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DomainError::FileNotFound(source.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let file_name = format!("compressed_{}.pdf", Uuid::new_v4());
        let output_path = self.output_dir.join(&file_name);

        if let Some(compressed_size) = self.try_native(source, &output_path, original_size, options).await {
            return Ok(CompressionResult::succeeded(
                original_size,
                compressed_size,
                output_path,
                file_name,
                CompressionMethod::Native,
            ));
        }

        match self.fallback.compress(source, &output_path, options).await {
            Ok(compressed_size) => Ok(CompressionResult::succeeded(
                original_size,
                compressed_size,
                output_path,
                file_name,
                CompressionMethod::Fallback,
            )),
            Err(e) => {
                remove_file_quietly(&output_path).await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl CompressionService for CompressionEngine {
    async fn compress(&self, source: &Path, options: &CompressionOptions) -> CompressionResult {
        let start_time = Instant::now();
        log::info!("Starting compression for {} ({})", source.display(), options.quality.as_str());

        match self.try_compress(source, options).await {
            Ok(result) => {
                log::info!(
                    "Compressed {} via {:?}: {} -> {} ({}%) in {}ms",
                    source.display(),
                    result.method,
                    format_file_size(result.original_size),
                    format_file_size(result.compressed_size),
                    result.ratio,
                    start_time.elapsed().as_millis()
                );
                result
            }
            Err(e) => {
                log::error!("PDF compression error for {}: {}", source.display(), e);
                CompressionResult::failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::compression::compressors::pdf_rewriter::fixtures::sample_pdf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Native stand-in writing a fixed number of bytes
    struct FakeNative {
        available: bool,
        output_len: usize,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Compressor for FakeNative {
        async fn is_available(&self) -> bool {
            self.available
        }

        async fn compress(&self, _input: &Path, output: &Path, _options: &CompressionOptions) -> DomainResult<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(output, vec![b'x'; self.output_len]).await?;
            Ok(self.output_len as u64)
        }

        fn compressor_name(&self) -> &'static str {
            "FakeNative"
        }
    }

    fn engine(dir: &Path, available: bool, output_len: usize) -> (CompressionEngine, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = CompressionEngine::with_compressors(
            dir.join("out"),
            Box::new(FakeNative { available, output_len, calls: calls.clone() }),
            Box::new(PdfRewriter::new()),
        );
        (engine, calls)
    }

    async fn write_sample(dir: &Path) -> PathBuf {
        let path = dir.join("sample.pdf");
        tokio::fs::write(&path, sample_pdf(false)).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_native_result_is_used_when_smaller() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_sample(dir.path()).await;
        let (engine, calls) = engine(dir.path(), true, 10);

        let result = engine.compress(&source, &CompressionOptions::default()).await;
        assert!(result.success);
        assert_eq!(result.method, CompressionMethod::Native);
        assert_eq!(result.compressed_size, 10);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.file_name.starts_with("compressed_"));
        assert!(result.output_path.exists());
    }

    #[tokio::test]
    async fn test_unavailable_native_uses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_sample(dir.path()).await;
        let (engine, calls) = engine(dir.path(), false, 10);

        let result = engine.compress(&source, &CompressionOptions::default()).await;
        assert!(result.success);
        assert_eq!(result.method, CompressionMethod::Fallback);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(result.ratio <= 100);
        assert_eq!(
            result.compressed_size,
            tokio::fs::metadata(&result.output_path).await.unwrap().len()
        );
    }

    #[tokio::test]
    async fn test_oversized_native_output_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_sample(dir.path()).await;
        let original = tokio::fs::metadata(&source).await.unwrap().len() as usize;
        let (engine, calls) = engine(dir.path(), true, original + 1);

        let result = engine.compress(&source, &CompressionOptions::default()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.success);
        assert_eq!(result.method, CompressionMethod::Fallback);
        assert_ne!(result.compressed_size, (original + 1) as u64);
    }

    #[tokio::test]
    async fn test_empty_native_output_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_sample(dir.path()).await;
        let (engine, _) = engine(dir.path(), true, 0);

        let result = engine.compress(&source, &CompressionOptions::default()).await;
        assert!(result.success);
        assert_eq!(result.method, CompressionMethod::Fallback);
        assert!(result.compressed_size > 0);
    }

    #[tokio::test]
    async fn test_missing_source_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(dir.path(), false, 10);

        let result = engine.compress(&dir.path().join("nope.pdf"), &CompressionOptions::default()).await;
        assert!(!result.success);
        assert_eq!(result.method, CompressionMethod::None);
        assert!(result.error.unwrap().contains("File not found"));
    }

    #[tokio::test]
    async fn test_corrupt_source_leaves_no_output_behind() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("corrupt.pdf");
        tokio::fs::write(&source, b"definitely not a pdf").await.unwrap();
        let (engine, _) = engine(dir.path(), false, 10);

        let result = engine.compress(&source, &CompressionOptions::default()).await;
        assert!(!result.success);
        assert!(result.error.is_some());

        let mut entries = tokio::fs::read_dir(dir.path().join("out")).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_ghostscript_falls_back_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_sample(dir.path()).await;
        let config = BatchConfig {
            output_dir: dir.path().join("out"),
            ghostscript_path: "definitely-not-ghostscript-xyz".to_string(),
            ..Default::default()
        };

        let result = CompressionEngine::new(&config)
            .compress(&source, &CompressionOptions { remove_metadata: true, ..Default::default() })
            .await;
        assert!(result.success);
        assert_eq!(result.method, CompressionMethod::Fallback);
        assert!(result.compressed_size < result.original_size);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stalled_ghostscript_is_killed_and_falls_back() {
        use crate::domains::compression::compressors::pdf_compressor::fixtures::stalling_ghostscript;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let source = write_sample(dir.path()).await;
        let config = BatchConfig {
            output_dir: dir.path().join("out"),
            ghostscript_path: stalling_ghostscript(dir.path()).to_string_lossy().into_owned(),
            file_timeout: Duration::from_secs(1),
            ..Default::default()
        };

        let started = Instant::now();
        let result = CompressionEngine::new(&config)
            .compress(&source, &CompressionOptions::default())
            .await;
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(result.success);
        assert_eq!(result.method, CompressionMethod::Fallback);
        assert!(result.output_path.exists());
    }
}
