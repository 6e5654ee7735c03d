// Declare submodules for the compression domain
pub mod types;
pub mod service;
pub mod compressors;

pub use types::{
    CompressionMethod, CompressionOptions, CompressionQuality, CompressionResult,
    calculate_compression_ratio, format_file_size,
};

pub use compressors::Compressor;
pub use service::{CompressionEngine, CompressionService};
