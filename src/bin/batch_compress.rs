use std::env;
use std::path::PathBuf;
use std::process;

use futures::StreamExt;
use pdf_batch_core::domains::batch::JobStatus;
use pdf_batch_core::{
    format_file_size, BatchConfig, BatchEvent, BatchProcessor, CompressionOptions,
    CompressionQuality, NewBatchFile,
};

const USAGE: &str = "usage: batch_compress [--quality low|medium|high|custom] [--image-quality N] \
[--dpi N] [--remove-metadata] [--remove-annotations] [--optimize-images] FILE.pdf...";

fn parse_args(args: &[String]) -> Result<(CompressionOptions, Vec<PathBuf>), String> {
    let mut options = CompressionOptions::default();
    let mut files = Vec::new();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--quality" => {
                let value = iter.next().ok_or("--quality needs a value")?;
                options.quality = value.parse::<CompressionQuality>().map_err(|e| e.to_string())?;
            }
            "--image-quality" => {
                let value = iter.next().ok_or("--image-quality needs a value")?;
                options.image_quality = value.parse().map_err(|_| format!("bad image quality: {}", value))?;
            }
            "--dpi" => {
                let value = iter.next().ok_or("--dpi needs a value")?;
                options.custom_dpi = value.parse().map_err(|_| format!("bad dpi: {}", value))?;
            }
            "--remove-metadata" => options.remove_metadata = true,
            "--remove-annotations" => options.remove_annotations = true,
            "--optimize-images" => options.optimize_images = true,
            "-h" | "--help" => return Err(USAGE.to_string()),
            flag if flag.starts_with("--") => return Err(format!("unknown option {}", flag)),
            path => files.push(PathBuf::from(path)),
        }
    }

    if files.is_empty() {
        return Err(USAGE.to_string());
    }
    Ok((options, files))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let (options, paths) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("{}", message);
            process::exit(2);
        }
    };

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        files.push(NewBatchFile::new(name, path, size));
    }

    let owner = env::var("USER").unwrap_or_else(|_| "local".to_string());
    let processor = BatchProcessor::from_config(BatchConfig::from_env());
    let job_id = processor.create_batch_job(&owner, files, options).await?;
    println!("Job {}", job_id);

    if let Some(mut events) = processor.subscribe(job_id).await? {
        while let Some(event) = events.next().await {
            match event {
                BatchEvent::FileCompleted { result, .. } => println!(
                    "  ok    {} -> {} ({}%)  {}",
                    format_file_size(result.original_size),
                    format_file_size(result.compressed_size),
                    result.ratio,
                    result.output_path.display()
                ),
                BatchEvent::FileError { file_id, error, .. } => println!("  fail  {}: {}", file_id, error),
                BatchEvent::JobFailed { error, .. } => println!("Job failed: {}", error),
                _ => {}
            }
        }
    }

    let Some(report) = processor.get_job_report(job_id).await? else {
        return Err("job disappeared".into());
    };
    let stats = report.stats;
    println!(
        "{} of {} files compressed, saved {} ({} -> {})",
        stats.completed_files,
        stats.total_files,
        format_file_size(stats.total_savings),
        format_file_size(stats.total_original_size),
        format_file_size(stats.total_compressed_size)
    );

    if report.job.status == JobStatus::Completed {
        let archive = processor.create_archive(job_id).await?;
        println!("Archive: {}", archive.display());
    } else {
        process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let (options, files) = parse_args(&args(&[
            "--quality", "custom", "--dpi", "200", "--optimize-images", "a.pdf", "b.pdf",
        ]))
        .unwrap();
        assert_eq!(options.quality, CompressionQuality::Custom);
        assert_eq!(options.custom_dpi, 200);
        assert!(options.optimize_images);
        assert!(!options.remove_metadata);
        assert_eq!(files, vec![PathBuf::from("a.pdf"), PathBuf::from("b.pdf")]);
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["--quality"])).is_err());
        assert!(parse_args(&args(&["--bogus", "a.pdf"])).is_err());
        assert!(parse_args(&args(&["--quality", "ultra", "a.pdf"])).is_err());
    }
}
