//! Compression strategies for PDF documents

pub mod image_compressor;
pub mod pdf_compressor;
pub mod pdf_rewriter;

use async_trait::async_trait;
use std::path::Path;
use crate::errors::DomainResult;
use super::types::CompressionOptions;

/// Common trait for all compression strategies
#[async_trait]
pub trait Compressor: Send + Sync {
    /// Whether this strategy can run in the current environment
    async fn is_available(&self) -> bool;

    /// Compress `input` into `output`, returning the number of bytes written
    async fn compress(
        &self,
        input: &Path,
        output: &Path,
        options: &CompressionOptions,
    ) -> DomainResult<u64>;

    /// Name used in log lines
    fn compressor_name(&self) -> &'static str;
}
