use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chunkbridge_codecs::{default_filters, filters_with, FramedCodec};
use chunkbridge_core::container::{self, DatasetMeta};
use chunkbridge_core::writer::{ATTR_CHUNK_SHAPE, ATTR_LOGICAL_SHAPE};
use chunkbridge_core::{
    schunk, ArrayDescriptor, BlockCodec, ChunkStoreWriter, CompressionProfile, Compressor,
    ConsistencyVerifier, ContainerReader, ContainerWriter, DenseSource, SChunkReader, SChunkWriter,
    VerificationReport, VerifyOptions, WriteSummary,
};

mod synth;

use synth::SynthKind;

/// Dataset name used when none is given.
const DEFAULT_DATASET: &str = "DSCAT";

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "chunkbridge",
    about = "Bridge compressed chunked arrays into a chunked container and cross-check both read paths",
    version
)]
struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a synthetic super-chunk file
    Synth {
        /// Data pattern
        #[arg(value_enum)]
        kind: SynthKind,
        /// Destination super-chunk file
        output: PathBuf,
        /// Array shape, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        shape: Vec<u64>,
        /// Chunk shape, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        chunks: Vec<u64>,
        /// Stored (padded) chunk shape; defaults to the chunk shape
        #[arg(long, value_delimiter = ',')]
        ext_chunks: Option<Vec<u64>>,
        /// Bytes per element
        #[arg(long, default_value_t = 4)]
        itemsize: usize,
        /// Seed for the noise pattern
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[command(flatten)]
        profile: ProfileArgs,
    },
    /// Copy every chunk of a super-chunk file into a container dataset
    Bridge {
        /// Source super-chunk file
        source: PathBuf,
        /// Destination container file
        container: PathBuf,
        /// Dataset to create
        #[arg(long, default_value = DEFAULT_DATASET)]
        dataset: String,
        #[command(flatten)]
        profile: ProfileArgs,
    },
    /// Compare the raw and filtered read paths of bridged datasets
    ///
    /// Exits non-zero when any element differs.
    Verify {
        /// Container file
        container: PathBuf,
        /// Dataset to check; all datasets when omitted
        #[arg(long)]
        dataset: Option<String>,
        #[command(flatten)]
        check: CheckArgs,
        /// Write the verification reports as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Bridge and verify each source, printing "Success!" per dataset
    ///
    /// With no sources, a synthetic suite is generated first.
    Run {
        /// Source super-chunk files
        sources: Vec<PathBuf>,
        /// Keep containers (and generated sources) here instead of a scratch directory
        #[arg(long)]
        workdir: Option<PathBuf>,
        #[command(flatten)]
        profile: ProfileArgs,
        #[command(flatten)]
        check: CheckArgs,
    },
    /// Print super-chunk or container metadata
    Inspect {
        /// Super-chunk or container file
        file: PathBuf,
        /// Print per-chunk details
        #[arg(long)]
        chunks: bool,
    },
}

#[derive(Args, Debug, Clone)]
struct ProfileArgs {
    /// Compressor inside each block: lz4 | zlib | zstd
    #[arg(long, default_value = "zlib")]
    codec: Compressor,
    /// Compression level (0 stores blocks uncompressed, 9 is slowest)
    #[arg(long, default_value_t = 1)]
    level: u8,
    /// Disable the byte shuffle
    #[arg(long)]
    no_shuffle: bool,
    /// Bytes per internal block (0 = automatic)
    #[arg(long, default_value_t = 0)]
    blocksize: usize,
    /// Codec worker threads
    #[arg(long, default_value_t = 6)]
    threads: usize,
}

impl ProfileArgs {
    fn profile(&self) -> CompressionProfile {
        CompressionProfile::default()
            .compressor(self.codec)
            .level(self.level)
            .shuffle(!self.no_shuffle)
            .blocksize(self.blocksize)
            .nthreads(self.threads)
    }

    fn codec(&self) -> anyhow::Result<Arc<FramedCodec>> {
        Ok(Arc::new(FramedCodec::for_profile(&self.profile())?))
    }
}

#[derive(Args, Debug, Clone)]
struct CheckArgs {
    /// Stop at the first mismatching element
    #[arg(long)]
    fail_fast: bool,
    /// Also compare padding elements
    #[arg(long)]
    include_padding: bool,
    /// Decompression threads used while verifying
    #[arg(long, default_value_t = 6)]
    verify_threads: usize,
}

impl CheckArgs {
    fn options(&self) -> VerifyOptions {
        VerifyOptions {
            fail_fast: self.fail_fast,
            include_padding: self.include_padding,
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn init_tracing(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

/// Rebuild the source layout of a bridged dataset from its attributes.
///
/// Datasets written without the layout attributes are treated as unpadded.
fn descriptor_for(meta: &DatasetMeta) -> anyhow::Result<ArrayDescriptor> {
    let shape = meta.attribute(ATTR_LOGICAL_SHAPE).unwrap_or(meta.shape());
    let chunk_shape = meta.attribute(ATTR_CHUNK_SHAPE).unwrap_or(meta.chunk_dims());
    ArrayDescriptor::new(
        shape.to_vec(),
        chunk_shape.to_vec(),
        meta.chunk_dims().to_vec(),
        meta.element_type().size(),
    )
    .with_context(|| format!("dataset '{}' has an inconsistent layout", meta.name))
}

fn synthesize(
    kind: SynthKind,
    output: &Path,
    descriptor: ArrayDescriptor,
    seed: u64,
    profile: &ProfileArgs,
) -> anyhow::Result<u64> {
    let data = synth::generate(kind, descriptor.logical_len(), descriptor.itemsize(), seed);
    let mut source = DenseSource::new(descriptor, data)?;
    let codec: Arc<dyn BlockCodec> = profile.codec()?;
    let chunks = SChunkWriter::from_source(output, &mut source, codec, profile.profile())
        .with_context(|| format!("writing super-chunk file {:?}", output))?;
    Ok(chunks)
}

fn bridge(
    source: &Path,
    container: &Path,
    dataset: &str,
    profile: &ProfileArgs,
) -> anyhow::Result<WriteSummary> {
    let codec = profile.codec()?;
    let mut reader = SChunkReader::open(source, codec.clone())
        .with_context(|| format!("opening source {:?}", source))?;
    let mut out = ContainerWriter::create(container)
        .with_context(|| format!("creating container {:?}", container))?
        .with_filters(Arc::new(filters_with(codec.clone())));

    let writer = ChunkStoreWriter::new(codec, profile.profile());
    let summary = writer
        .write_all(&mut reader, &mut out, dataset)
        .with_context(|| format!("bridging {:?} into dataset '{}'", source, dataset))?;
    out.finish()?;
    Ok(summary)
}

fn verify(
    container: &Path,
    dataset: Option<&str>,
    check: &CheckArgs,
) -> anyhow::Result<Vec<VerificationReport>> {
    let codec = Arc::new(FramedCodec::new(check.verify_threads)?);
    let mut reader = ContainerReader::open(container, Arc::new(filters_with(codec.clone())))
        .with_context(|| format!("opening container {:?}", container))?;
    let names: Vec<String> = match dataset {
        Some(name) => vec![name.to_string()],
        None => reader.datasets().iter().map(|d| d.name.clone()).collect(),
    };

    let verifier = ConsistencyVerifier::new(check.options());
    let mut reports = Vec::with_capacity(names.len());
    for name in &names {
        let descriptor = descriptor_for(reader.dataset(name)?)?;
        let report = verifier
            .verify(&mut reader, codec.as_ref(), name, &descriptor)
            .with_context(|| format!("verifying dataset '{}'", name))?;
        reports.push(report);
    }
    Ok(reports)
}

fn inconsistent(reports: &[VerificationReport]) -> usize {
    reports.iter().filter(|r| !r.is_consistent()).count()
}

// ── Subcommand implementations ─────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn run_synth(
    kind: SynthKind,
    output: PathBuf,
    shape: Vec<u64>,
    chunks: Vec<u64>,
    ext_chunks: Option<Vec<u64>>,
    itemsize: usize,
    seed: u64,
    profile: ProfileArgs,
) -> anyhow::Result<()> {
    let ext = ext_chunks.unwrap_or_else(|| chunks.clone());
    let descriptor = ArrayDescriptor::new(shape, chunks, ext, itemsize)?;
    let nchunks = synthesize(kind, &output, descriptor, seed, &profile)?;
    let size = std::fs::metadata(&output)?.len();
    info!(kind = kind.name(), chunks = nchunks, file = ?output, "synthesized");
    eprintln!("  chunks      : {}", nchunks);
    eprintln!("  file size   : {}", human_bytes(size));
    Ok(())
}

fn run_bridge(
    source: PathBuf,
    container: PathBuf,
    dataset: String,
    profile: ProfileArgs,
) -> anyhow::Result<()> {
    let t0 = Instant::now();
    let summary = bridge(&source, &container, &dataset, &profile)?;
    let elapsed = t0.elapsed();

    eprintln!("  codec       : {}", profile.codec);
    eprintln!("  chunks      : {}", summary.chunks);
    eprintln!("  raw size    : {}", human_bytes(summary.raw_bytes));
    eprintln!("  compressed  : {}", human_bytes(summary.compressed_bytes));
    eprintln!("  ratio       : {:.2}x", summary.ratio());
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn write_report(path: &Path, reports: &[VerificationReport]) -> anyhow::Result<()> {
    let out = File::create(path).with_context(|| format!("creating report {:?}", path))?;
    let mut out = BufWriter::new(out);
    serde_json::to_writer_pretty(&mut out, reports)?;
    out.flush()
        .with_context(|| format!("writing report {:?}", path))?;
    Ok(())
}

fn run_verify(
    container: PathBuf,
    dataset: Option<String>,
    check: CheckArgs,
    report: Option<PathBuf>,
) -> anyhow::Result<()> {
    let reports = verify(&container, dataset.as_deref(), &check)?;
    for r in &reports {
        println!(
            "  {:<16} chunks {:>6}  elements {:>10}  violations {}",
            r.dataset,
            r.chunks_checked,
            r.elements_compared,
            r.violations.len()
        );
    }
    if let Some(path) = report {
        write_report(&path, &reports)?;
    }
    let failed = inconsistent(&reports);
    if failed > 0 {
        anyhow::bail!("{} of {} dataset(s) failed verification", failed, reports.len());
    }
    Ok(())
}

/// Sources generated when `run` is given none: each pattern in a padded 3-D layout.
fn synth_suite(dir: &Path, profile: &ProfileArgs) -> anyhow::Result<Vec<PathBuf>> {
    let mut sources = Vec::with_capacity(SynthKind::ALL.len());
    for kind in SynthKind::ALL {
        let path = dir.join(format!("{}.cbs", kind.name()));
        let descriptor = ArrayDescriptor::new(vec![37, 60, 45], vec![10, 25, 16], vec![12, 25, 16], 4)?;
        synthesize(kind, &path, descriptor, 42, profile)?;
        sources.push(path);
    }
    Ok(sources)
}

fn run_suite(
    sources: Vec<PathBuf>,
    workdir: Option<PathBuf>,
    profile: ProfileArgs,
    check: CheckArgs,
) -> anyhow::Result<()> {
    let scratch = tempfile::tempdir().context("creating scratch directory")?;
    let dir = workdir.as_deref().unwrap_or(scratch.path());
    let sources = if sources.is_empty() {
        synth_suite(dir, &profile)?
    } else {
        sources
    };

    for source in &sources {
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(DEFAULT_DATASET);
        println!("{}", stem);
        let container = dir.join(format!("{}.cbc", stem));
        bridge(source, &container, DEFAULT_DATASET, &profile)?;
        let reports = verify(&container, Some(DEFAULT_DATASET), &check)?;
        if inconsistent(&reports) > 0 {
            for r in &reports {
                if let Some(v) = r.violations.first() {
                    warn!(chunk = %v.chunk, element = v.element, "first violation");
                }
            }
            anyhow::bail!("raw and filtered reads of {:?} differ", source);
        }
        println!("Success!");
    }
    Ok(())
}

fn run_inspect(file: PathBuf, show_chunks: bool) -> anyhow::Result<()> {
    let mut magic = [0u8; 8];
    File::open(&file)
        .and_then(|mut f| f.read_exact(&mut magic))
        .with_context(|| format!("reading {:?}", file))?;
    if magic == *schunk::MAGIC {
        inspect_schunk(&file, show_chunks)
    } else if magic == *container::MAGIC {
        inspect_container(&file, show_chunks)
    } else {
        anyhow::bail!("{:?} is neither a super-chunk nor a container file", file)
    }
}

fn inspect_schunk(file: &Path, show_chunks: bool) -> anyhow::Result<()> {
    let reader = SChunkReader::open(file, Arc::new(FramedCodec::default()))?;
    let header = reader.header();
    let d = &header.descriptor;
    let p = reader.profile();

    println!("=== super-chunk file: {:?} ===", file);
    println!();
    println!("  format version : {}", header.version);
    println!("  shape          : {:?}", d.shape());
    println!("  chunk shape    : {:?}", d.chunk_shape());
    println!("  stored chunk   : {:?}", d.ext_chunk_shape());
    println!("  item size      : {}", d.itemsize());
    println!("  chunks         : {}", header.chunk_count);
    println!(
        "  compression    : {} level {}{}",
        p.compressor,
        p.level,
        if p.shuffle { " + shuffle" } else { "" }
    );
    println!("  block size     : {}", human_bytes(p.blocksize as u64));
    println!("  raw size       : {}", human_bytes(reader.raw_size()));
    println!("  compressed     : {}", human_bytes(reader.compressed_size()));
    println!("  ratio          : {:.2}x", reader.ratio());

    if show_chunks {
        println!();
        println!(
            "  {:>8}  {:>14}  {:>12}  {:>12}  {:>16}",
            "chunk", "file offset", "compressed", "raw", "checksum"
        );
        println!("  {}", "-".repeat(70));
        for (i, e) in reader.entries().iter().enumerate() {
            println!(
                "  {:>8}  {:>14}  {:>12}  {:>12}  {:016x}",
                i,
                e.offset,
                human_bytes(e.compressed_len as u64),
                human_bytes(e.raw_len as u64),
                e.checksum
            );
        }
    }
    Ok(())
}

fn inspect_container(file: &Path, show_chunks: bool) -> anyhow::Result<()> {
    let reader = ContainerReader::open(file, Arc::new(default_filters()))?;
    let header = reader.header();

    println!("=== container file: {:?} ===", file);
    println!();
    println!("  format version : {}", header.version);
    println!("  datasets       : {}", header.dataset_count);

    for meta in reader.datasets() {
        println!();
        println!("  [{}]", meta.name);
        println!("    element type : {}", meta.element_type());
        println!("    shape        : {:?}", meta.shape());
        println!("    chunk dims   : {:?}", meta.chunk_dims());
        for (name, values) in &meta.spec.attributes {
            println!("    @{:<11} : {:?}", name, values);
        }
        for (i, f) in meta.pipeline().iter().enumerate() {
            println!(
                "    filter {}     : id {} flags 0x{:04x} cd_values {:?}",
                i, f.id, f.flags, f.cd_values
            );
        }
        println!("    chunks       : {} of {}", meta.chunks.len(), meta.chunk_capacity());
        println!("    stored       : {}", human_bytes(meta.stored_bytes()));

        if show_chunks {
            println!(
                "    {:<20}  {:>12}  {:>10}  {:>10}  {:>6}  {:>16}",
                "offset", "address", "size", "allocated", "mask", "checksum"
            );
            for record in meta.chunks.values() {
                println!(
                    "    {:<20}  {:>12}  {:>10}  {:>10}  {:>6x}  {:016x}",
                    format!("{:?}", record.offset),
                    record.address,
                    record.size,
                    record.allocated,
                    record.filter_mask,
                    record.checksum
                );
            }
        }
    }
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    match cli.command {
        Commands::Synth {
            kind,
            output,
            shape,
            chunks,
            ext_chunks,
            itemsize,
            seed,
            profile,
        } => run_synth(kind, output, shape, chunks, ext_chunks, itemsize, seed, profile),
        Commands::Bridge {
            source,
            container,
            dataset,
            profile,
        } => run_bridge(source, container, dataset, profile),
        Commands::Verify {
            container,
            dataset,
            check,
            report,
        } => run_verify(container, dataset, check, report),
        Commands::Run {
            sources,
            workdir,
            profile,
            check,
        } => run_suite(sources, workdir, profile, check),
        Commands::Inspect { file, chunks } => run_inspect(file, chunks),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_file_is_complete_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let reports = vec![
            VerificationReport {
                dataset: "a".into(),
                chunks_checked: 3,
                ..Default::default()
            },
            VerificationReport::default(),
        ];
        write_report(&path, &reports).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        let entries = parsed.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["dataset"], "a");
        assert_eq!(entries[0]["chunks_checked"], 3);
    }

    #[test]
    fn report_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent").join("report.json");
        assert!(write_report(&path, &[]).is_err());
    }
}
