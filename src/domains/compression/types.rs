//! Type definitions for the compression domain.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use crate::errors::{DomainError, ValidationError};

pub const DEFAULT_IMAGE_QUALITY: u8 = 60;
pub const DEFAULT_CUSTOM_DPI: u16 = 150;
pub const IMAGE_QUALITY_RANGE: (u8, u8) = (0, 100);
pub const CUSTOM_DPI_RANGE: (u16, u16) = (72, 600);

/// Named bundle of compression parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionQuality {
    Low,
    #[default]
    Medium,
    High,
    Custom,
}

impl CompressionQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionQuality::Low => "low",
            CompressionQuality::Medium => "medium",
            CompressionQuality::High => "high",
            CompressionQuality::Custom => "custom",
        }
    }

    /// Ghostscript `-dPDFSETTINGS` preset for this quality.
    pub fn ghostscript_preset(&self) -> &'static str {
        match self {
            CompressionQuality::Low => "/screen",
            CompressionQuality::Medium => "/ebook",
            CompressionQuality::High => "/printer",
            CompressionQuality::Custom => "/default",
        }
    }
}

impl FromStr for CompressionQuality {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(CompressionQuality::Low),
            "medium" => Ok(CompressionQuality::Medium),
            "high" => Ok(CompressionQuality::High),
            "custom" => Ok(CompressionQuality::Custom),
            _ => Err(DomainError::Validation(ValidationError::invalid_value(
                "quality",
                &format!("must be one of low, medium, high, custom (got {})", s),
            ))),
        }
    }
}

/// Options shared by every file in a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompressionOptions {
    pub quality: CompressionQuality,
    pub remove_metadata: bool,
    pub remove_annotations: bool,
    pub optimize_images: bool,
    pub image_quality: u8,
    #[serde(rename = "customDPI")]
    pub custom_dpi: u16,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            quality: CompressionQuality::Medium,
            remove_metadata: false,
            remove_annotations: false,
            optimize_images: false,
            image_quality: DEFAULT_IMAGE_QUALITY,
            custom_dpi: DEFAULT_CUSTOM_DPI,
        }
    }
}

impl CompressionOptions {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let (min_q, max_q) = IMAGE_QUALITY_RANGE;
        if !(min_q..=max_q).contains(&self.image_quality) {
            return Err(ValidationError::range("imageQuality", min_q, max_q));
        }
        let (min_dpi, max_dpi) = CUSTOM_DPI_RANGE;
        if !(min_dpi..=max_dpi).contains(&self.custom_dpi) {
            return Err(ValidationError::range("customDPI", min_dpi, max_dpi));
        }
        Ok(())
    }

    /// JPEG quality used when re-encoding embedded images in-process.
    pub fn effective_image_quality(&self) -> u8 {
        match self.quality {
            CompressionQuality::Low => 30,
            CompressionQuality::Medium => 60,
            CompressionQuality::High => 85,
            CompressionQuality::Custom => self.image_quality.clamp(1, 100),
        }
    }
}

/// Which strategy produced a compression result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    /// External Ghostscript run
    Native,
    /// In-process document rewrite
    Fallback,
    /// Nothing was produced
    None,
}

/// Result from a compression operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionResult {
    pub success: bool,
    pub original_size: u64,
    pub compressed_size: u64,
    #[serde(rename = "compressionRatio")]
    pub ratio: u8,
    pub output_path: PathBuf,
    pub file_name: String,
    pub method: CompressionMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompressionResult {
    pub fn succeeded(
        original_size: u64,
        compressed_size: u64,
        output_path: PathBuf,
        file_name: String,
        method: CompressionMethod,
    ) -> Self {
        Self {
            success: true,
            original_size,
            compressed_size,
            ratio: calculate_compression_ratio(original_size, compressed_size),
            output_path,
            file_name,
            method,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            original_size: 0,
            compressed_size: 0,
            ratio: 0,
            output_path: PathBuf::new(),
            file_name: String::new(),
            method: CompressionMethod::None,
            error: Some(error.into()),
        }
    }
}

/// Percentage of bytes saved, rounded, in `0..=100`.
pub fn calculate_compression_ratio(original_size: u64, compressed_size: u64) -> u8 {
    if original_size == 0 {
        return 0;
    }
    let saved = original_size.saturating_sub(compressed_size) as f64;
    ((saved / original_size as f64) * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Human readable size, e.g. `"1.5 MB"`.
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    let mut exponent = 0usize;
    let mut threshold = 1024u64;
    while exponent < UNITS.len() - 1 && bytes >= threshold {
        exponent += 1;
        threshold = threshold.saturating_mul(1024);
    }
    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    let rounded = (value * 100.0).round() / 100.0;
    // Trim trailing zeros the way a float-to-string conversion would.
    let mut text = format!("{:.2}", rounded);
    while text.contains('.') && (text.ends_with('0') || text.ends_with('.')) {
        text.pop();
    }
    format!("{} {}", text, UNITS[exponent])
}
