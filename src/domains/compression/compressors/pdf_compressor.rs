//! PDF compression through an external Ghostscript process

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;

use crate::errors::{DomainError, DomainResult};
use super::Compressor;
use crate::domains::compression::types::{CompressionOptions, CompressionQuality};

/// PDF compressor using external tools (gs)
pub struct PdfCompressor {
    ghostscript_path: String,
    timeout: Duration,
    available: OnceCell<bool>,
}

impl PdfCompressor {
    pub fn new(ghostscript_path: Option<String>, timeout: Duration) -> Self {
        Self {
            ghostscript_path: ghostscript_path.unwrap_or_else(|| "gs".to_string()),
            timeout,
            available: OnceCell::new(),
        }
    }

    async fn probe(&self) -> bool {
        let status = Command::new(&self.ghostscript_path)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(Duration::from_secs(10), status).await {
            Ok(Ok(status)) if status.success() => {
                log::info!("Ghostscript found at '{}'", self.ghostscript_path);
                true
            }
            Ok(Ok(status)) => {
                log::info!("Ghostscript probe exited with {}; using in-process fallback", status);
                false
            }
            Ok(Err(e)) => {
                log::info!("Ghostscript not available ({}); using in-process fallback", e);
                false
            }
            Err(_) => {
                log::warn!("Ghostscript probe timed out; using in-process fallback");
                false
            }
        }
    }
}

/// Argument list for one Ghostscript run.
pub fn build_ghostscript_args(input: &Path, output: &Path, options: &CompressionOptions) -> Vec<String> {
    let mut args = vec![
        "-sDEVICE=pdfwrite".to_string(),
        "-dCompatibilityLevel=1.4".to_string(),
        format!("-dPDFSETTINGS={}", options.quality.ghostscript_preset()),
        "-dNOPAUSE".to_string(),
        "-dQUIET".to_string(),
        "-dBATCH".to_string(),
    ];

    if options.quality == CompressionQuality::Custom {
        let dpi = options.custom_dpi;
        args.extend([
            "-dAutoFilterColorImages=false".to_string(),
            "-dAutoFilterGrayImages=false".to_string(),
            "-dColorImageDownsampleType=/Average".to_string(),
            format!("-dColorImageResolution={}", dpi),
            "-dGrayImageDownsampleType=/Average".to_string(),
            format!("-dGrayImageResolution={}", dpi),
            "-dMonoImageDownsampleType=/Subsample".to_string(),
            format!("-dMonoImageResolution={}", dpi.clamp(72, 600)),
            format!("-dJPEGQ={}", options.image_quality.clamp(10, 95)),
        ]);
    }

    args.push(format!("-sOutputFile={}", output.to_string_lossy()));
    args.push(input.to_string_lossy().into_owned());
    args
}

#[async_trait]
impl Compressor for PdfCompressor {
    async fn is_available(&self) -> bool {
        *self.available.get_or_init(|| self.probe()).await
    }

    async fn compress(
        &self,
        input: &Path,
        output: &Path,
        options: &CompressionOptions,
    ) -> DomainResult<u64> {
        if !self.is_available().await {
            return Err(DomainError::EngineUnavailable(self.ghostscript_path.clone()));
        }

        let args = build_ghostscript_args(input, output, options);
        log::debug!("Running {} {}", self.ghostscript_path, args.join(" "));

        // kill_on_drop: a timed-out run is killed when the future is dropped
        let run = Command::new(&self.ghostscript_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let result = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| DomainError::Compression(format!(
                "Ghostscript timed out after {}s", self.timeout.as_secs()
            )))?
            .map_err(|e| DomainError::Compression(format!("Failed to execute ghostscript: {}", e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let code = result
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(DomainError::Compression(format!(
                "Ghostscript exited with code {}: {}", code, stderr.trim()
            )));
        }

        let metadata = tokio::fs::metadata(output).await?;
        Ok(metadata.len())
    }

    fn compressor_name(&self) -> &'static str {
        "PdfCompressor"
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_preset_args_for_medium() {
        let args = build_ghostscript_args(
            &PathBuf::from("/in/a.pdf"),
            &PathBuf::from("/out/b.pdf"),
            &CompressionOptions::default(),
        );
        assert!(args.contains(&"-dPDFSETTINGS=/ebook".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("-dJPEGQ")));
        assert_eq!(args[args.len() - 2], "-sOutputFile=/out/b.pdf");
        assert_eq!(args[args.len() - 1], "/in/a.pdf");
    }

    #[test]
    fn test_custom_args_carry_dpi_and_clamped_jpeg_quality() {
        let options = CompressionOptions {
            quality: CompressionQuality::Custom,
            custom_dpi: 200,
            image_quality: 100,
            ..Default::default()
        };
        let args = build_ghostscript_args(Path::new("in.pdf"), Path::new("out.pdf"), &options);
        assert!(args.contains(&"-dPDFSETTINGS=/default".to_string()));
        assert!(args.contains(&"-dColorImageResolution=200".to_string()));
        assert!(args.contains(&"-dGrayImageResolution=200".to_string()));
        assert!(args.contains(&"-dMonoImageResolution=200".to_string()));
        assert!(args.contains(&"-dJPEGQ=95".to_string()));

        let low_q = CompressionOptions { image_quality: 0, ..options };
        let args = build_ghostscript_args(Path::new("in.pdf"), Path::new("out.pdf"), &low_q);
        assert!(args.contains(&"-dJPEGQ=10".to_string()));
    }

    #[tokio::test]
    async fn test_missing_executable_is_unavailable() {
        let compressor = PdfCompressor::new(
            Some("definitely-not-ghostscript-xyz".to_string()),
            Duration::from_secs(5),
        );
        assert!(!compressor.is_available().await);
        // Cached answer
        assert!(!compressor.is_available().await);

        let err = compressor
            .compress(Path::new("a.pdf"), Path::new("b.pdf"), &CompressionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::EngineUnavailable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stalled_run_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let gs = fixtures::stalling_ghostscript(dir.path());
        let compressor = PdfCompressor::new(
            Some(gs.to_string_lossy().into_owned()),
            Duration::from_millis(500),
        );
        assert!(compressor.is_available().await);

        let started = std::time::Instant::now();
        let err = compressor
            .compress(
                &dir.path().join("a.pdf"),
                &dir.path().join("b.pdf"),
                &CompressionOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(10));
        match err {
            DomainError::Compression(message) => assert!(message.contains("timed out")),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
