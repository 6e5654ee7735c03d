pub mod batch;
pub mod compression;

pub use batch::BatchProcessor;
pub use compression::{CompressionEngine, CompressionService};
