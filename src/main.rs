//! jimage CLI - Command-line tool for Java runtime module images.
//!
//! This is the main entry point for the jimage command-line application.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glob::Pattern;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use jimage::prelude::*;
use jimage::reader::StringTable;

/// Number of resources read per batch during extraction.
const EXTRACT_BATCH: usize = 256;

/// jimage - Java runtime module image inspection tool
#[derive(Parser)]
#[command(name = "jimage")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the image file (usually `lib/modules`)
    #[arg(short, long, global = true, env = "JIMAGE")]
    image: Option<PathBuf>,

    /// Byte order of the image (little, big or native)
    #[arg(long, global = true, env = "JIMAGE_BYTE_ORDER", default_value = "native")]
    byte_order: Endian,

    /// Map only the index and read content through positioned reads
    #[arg(long, global = true, env = "JIMAGE_INDEX_ONLY")]
    index_only: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the image header and summary counts as JSON
    Info,

    /// List resource names
    List {
        /// Filter pattern (glob-style, matched against `/module/path`)
        #[arg(short, long)]
        filter: Option<String>,

        /// Show sizes next to each name
        #[arg(short, long)]
        detailed: bool,
    },

    /// Extract resources into a directory
    Extract {
        /// Output directory
        #[arg(short, long, env = "OUTPUT_FOLDER")]
        output: PathBuf,

        /// Filter pattern (glob-style, matched against `/module/path`)
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// List a directory of the virtual tree
    Ls {
        /// Tree path such as `/modules/java.base/java/lang`
        #[arg(default_value = "/")]
        path: String,
    },

    /// Write one resource to stdout
    Cat {
        /// Module owning the resource
        module: String,

        /// Resource path inside the module
        name: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let path = cli
        .image
        .clone()
        .context("No image given; pass --image or set JIMAGE")?;
    let options = ImageOptions::default()
        .with_endian(cli.byte_order)
        .with_access(if cli.index_only {
            AccessStrategy::IndexOnly
        } else {
            AccessStrategy::Auto
        });

    match cli.command {
        Commands::Info => {
            cmd_info(&path, options)?;
        }
        Commands::List { filter, detailed } => {
            cmd_list(&path, options, filter.as_deref(), detailed)?;
        }
        Commands::Extract { output, filter } => {
            cmd_extract(&path, options, &output, filter.as_deref())?;
        }
        Commands::Ls { path: node } => {
            cmd_ls(&path, options, &node)?;
        }
        Commands::Cat { module, name } => {
            cmd_cat(&path, options, &module, &name)?;
        }
    }

    Ok(())
}

fn open_image(path: &Path, options: ImageOptions) -> Result<ImageFile> {
    ImageFile::open_with(path, options)
        .with_context(|| format!("Failed to open image {}", path.display()))
}

fn parse_filter(filter: Option<&str>) -> Result<Option<Pattern>> {
    filter
        .map(|pattern| Pattern::new(pattern).context("Invalid filter pattern"))
        .transpose()
}

/// Resources of real modules, skipping the `/modules` and `/packages` listings.
fn resources<'a>(
    image: &'a ImageFile,
    filter: Option<&'a Pattern>,
) -> impl Iterator<Item = Result<(String, Location)>> + 'a {
    let strings = image.strings();
    image
        .locations()
        .filter_map(move |location| resource_entry(location, &strings, filter).transpose())
}

fn resource_entry(
    location: jimage::reader::Result<Location>,
    strings: &StringTable<'_>,
    filter: Option<&Pattern>,
) -> Result<Option<(String, Location)>> {
    let location = location?;
    let module = location.module(strings)?;
    if module.is_empty() || module == "modules" || module == "packages" {
        return Ok(None);
    }

    let name = location.full_name(strings, false)?;
    match filter {
        Some(pattern) if !pattern.matches(&name) => Ok(None),
        _ => Ok(Some((name, location))),
    }
}

fn cmd_info(path: &Path, options: ImageOptions) -> Result<()> {
    let start = Instant::now();
    let image = open_image(path, options)?;
    let modules = image.module_names()?;

    let info = serde_json::json!({
        "path": image.path(),
        "byte_order": image.endian().to_string(),
        "access": format!("{:?}", image.access()),
        "file_size": image.file_len(),
        "index_size": image.index_size(),
        "header": image.header(),
        "modules": modules,
    });
    println!("{}", serde_json::to_string_pretty(&info)?);
    tracing::debug!(elapsed = ?start.elapsed(), "read image info");

    Ok(())
}

fn cmd_list(path: &Path, options: ImageOptions, filter: Option<&str>, detailed: bool) -> Result<()> {
    let image = open_image(path, options)?;
    let pattern = parse_filter(filter)?;

    let mut count = 0;
    for entry in resources(&image, pattern.as_ref()) {
        let (name, location) = entry?;
        if detailed {
            println!(
                "{:>12} {:>12} {}",
                location.compressed_size(),
                location.uncompressed_size(),
                name
            );
        } else {
            println!("{}", name);
        }
        count += 1;
    }

    println!("\nTotal: {} resources", count);

    Ok(())
}

fn cmd_extract(path: &Path, options: ImageOptions, output: &Path, filter: Option<&str>) -> Result<()> {
    println!("Opening image: {}", path.display());

    let start = Instant::now();
    let image = open_image(path, options)?;
    let pattern = parse_filter(filter)?;
    let entries: Vec<(String, Location)> = resources(&image, pattern.as_ref()).collect::<Result<_>>()?;

    println!(
        "Indexed {} of {} resources in {:?}",
        entries.len(),
        image.header().resource_count,
        start.elapsed()
    );
    println!("Extracting {} resources...", entries.len());

    let pb = ProgressBar::new(entries.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    fs::create_dir_all(output)?;

    let start = Instant::now();
    for batch in entries.chunks(EXTRACT_BATCH) {
        let contents = read_batch(&image, batch);
        for ((name, _), data) in batch.iter().zip(contents) {
            let data = data.with_context(|| format!("Failed to read {}", name))?;
            let output_path = output.join(name.trim_start_matches('/'));

            if let Some(parent) = output_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&output_path, data)
                .with_context(|| format!("Failed to write {}", output_path.display()))?;

            pb.inc(1);
        }
    }

    pb.finish_with_message("Done");
    println!("Extraction completed in {:?}", start.elapsed());

    Ok(())
}

#[cfg(feature = "parallel")]
fn read_batch(image: &ImageFile, batch: &[(String, Location)]) -> Vec<jimage::reader::Result<Vec<u8>>> {
    let locations: Vec<Location> = batch.iter().map(|(_, location)| *location).collect();
    image.read_parallel(&locations)
}

#[cfg(not(feature = "parallel"))]
fn read_batch(image: &ImageFile, batch: &[(String, Location)]) -> Vec<jimage::reader::Result<Vec<u8>>> {
    batch.iter().map(|(_, location)| image.read(location)).collect()
}

fn cmd_ls(path: &Path, options: ImageOptions, node_path: &str) -> Result<()> {
    let reader = ImageReader::open_with(path, options)
        .with_context(|| format!("Failed to open image {}", path.display()))?;

    let node = reader
        .find_node(node_path)?
        .with_context(|| format!("No such path in image: {}", node_path))?;
    let node = reader.resolve_link(&node, true)?;

    match node.kind() {
        NodeKind::Directory { .. } => {
            for child in reader.children(&node)? {
                let marker = match child.kind() {
                    NodeKind::Directory { .. } => "d",
                    NodeKind::Resource(_) => "-",
                    NodeKind::Link { .. } => "l",
                };
                println!("{} {:>12} {}", marker, child.size(), child.file_name());
            }
        }
        _ => println!("- {:>12} {}", node.size(), node.name()),
    }

    reader.close()?;

    Ok(())
}

fn cmd_cat(path: &Path, options: ImageOptions, module: &str, name: &str) -> Result<()> {
    let image = open_image(path, options)?;
    let location = image
        .find_location_in(module, name)?
        .with_context(|| format!("Resource not found: /{}/{}", module, name))?;

    let data = image.read(&location)?;
    let mut stdout = io::stdout().lock();
    stdout.write_all(&data)?;
    stdout.flush()?;

    Ok(())
}
