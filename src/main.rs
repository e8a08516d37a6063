use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use photomark::export::{parse_quality, DEFAULT_QUALITY};
use photomark::{
    BatchItem, BatchPipeline, CancelToken, ExportOptions, ItemOutcome, ItemResult, NamingRule, OutputFormat,
    OverwritePolicy, ProgressSink, ResizeRule, SkipReason, SystemFontResolver, TemplateStore, WatermarkConfig,
};

#[derive(Parser)]
#[command(name = "photomark", version, about = "Batch watermark photos with text or image overlays")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watermark photos and export them
    Apply(ApplyArgs),

    /// Manage saved templates
    Templates {
        /// Template directory
        #[arg(long, default_value = "templates")]
        dir: PathBuf,

        #[command(subcommand)]
        action: TemplateAction,
    },
}

#[derive(Args)]
struct ApplyArgs {
    /// Photos to watermark
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Watermark config JSON file
    #[arg(long, conflicts_with = "template")]
    config: Option<PathBuf>,

    /// Name of a saved template
    #[arg(long)]
    template: Option<String>,

    /// Template directory used with --template
    #[arg(long, default_value = "templates")]
    templates_dir: PathBuf,

    /// Replace the watermark text ({date} and {name} are substituted)
    #[arg(long)]
    text: Option<String>,

    /// Output directory
    #[arg(short, long, default_value = "watermarked")]
    output: PathBuf,

    /// Output format: jpeg, png, bmp, tiff, webp (default: keep source format)
    #[arg(long)]
    format: Option<OutputFormat>,

    /// JPEG quality 1-100
    #[arg(long, default_value_t = DEFAULT_QUALITY, value_parser = parse_quality)]
    quality: u8,

    /// Downscale so the longer edge is at most this many pixels
    #[arg(long)]
    max_edge: Option<u32>,

    /// When the output exists: skip, overwrite or rename
    #[arg(long, default_value = "skip")]
    overwrite: OverwritePolicy,

    /// Prepend to output file names
    #[arg(long, group = "naming")]
    prefix: Option<String>,

    /// Append to output file names
    #[arg(long, group = "naming")]
    suffix: Option<String>,

    /// Output name pattern: {name} {index} {date} {time} {year} {month} {day}
    #[arg(long, group = "naming")]
    pattern: Option<String>,

    /// Worker threads (0 = one per core)
    #[arg(short = 'j', long, default_value_t = 0)]
    jobs: usize,

    /// Write into a watermarked_images subfolder of the output directory
    #[arg(long)]
    subfolder: bool,
}

#[derive(Subcommand)]
enum TemplateAction {
    /// List templates
    List,
    /// Export a template to a JSON file
    Export { name: String, path: PathBuf },
    /// Import a template from a JSON file
    Import { path: PathBuf },
    /// Delete a user template
    Delete { name: String },
}

/// Prints one line per finished item.
struct ConsoleProgress {
    total: usize,
    done: AtomicUsize,
}

impl ProgressSink for ConsoleProgress {
    fn on_item_result(&self, result: &ItemResult) {
        let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        let name = result.source.display();
        match &result.outcome {
            ItemOutcome::Succeeded { output, watermarked: true } => {
                println!("  [{n}/{}] {name} -> {} ✓", self.total, output.display())
            }
            ItemOutcome::Succeeded { output, watermarked: false } => {
                println!("  [{n}/{}] {name} -> {} ✓ (no watermark)", self.total, output.display())
            }
            ItemOutcome::Failed(err) => println!("  [{n}/{}] ✗ {err}", self.total),
            ItemOutcome::Skipped(SkipReason::Cancelled) => {
                println!("  [{n}/{}] {name} skipped (cancelled)", self.total)
            }
            ItemOutcome::Skipped(SkipReason::OutputExists { path }) => {
                println!("  [{n}/{}] {name} skipped ({} exists)", self.total, path.display())
            }
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Apply(args) => apply(args),
        Command::Templates { dir, action } => templates(&dir, action),
    }
}

fn apply(args: ApplyArgs) -> Result<()> {
    println!("  Inputs:  {} photo(s)", args.inputs.len());
    println!("  Output:  {}", args.output.display());
    println!();

    println!("[1/3] Loading watermark config...");
    let mut config = load_config(&args)?;
    if let Some(text) = &args.text {
        config.text.content = text.clone();
    }
    config.validate().context("watermark config is invalid")?;

    println!("[2/3] Loading fonts...");
    let fonts = Arc::new(SystemFontResolver::new());

    println!("[3/3] Watermarking...");
    let export = export_options(&args);
    let items: Vec<BatchItem> = args.inputs.iter().map(BatchItem::new).collect();
    let progress = ConsoleProgress {
        total: items.len(),
        done: AtomicUsize::new(0),
    };
    let report = BatchPipeline::new(config)
        .with_fonts(fonts)
        .with_concurrency(args.jobs)
        .run(&items, &export, &progress, &CancelToken::new())?;

    let s = report.summary;
    println!(
        "Done: {} succeeded, {} failed, {} skipped in {:.1?}",
        s.succeeded, s.failed, s.skipped, s.elapsed
    );
    if report.has_failures() {
        bail!("{} of {} photo(s) failed", s.failed, s.total);
    }
    Ok(())
}

fn load_config(args: &ApplyArgs) -> Result<WatermarkConfig> {
    if let Some(path) = &args.config {
        let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        return WatermarkConfig::from_json(&json).with_context(|| format!("parsing {}", path.display()));
    }
    if let Some(name) = &args.template {
        let store = TemplateStore::open(&args.templates_dir)?;
        let template = store
            .get(name)
            .with_context(|| format!("no template named `{name}` in {}", args.templates_dir.display()))?;
        println!("  Template: {}", template.name);
        return Ok(template.config.clone());
    }
    Ok(WatermarkConfig::default())
}

fn export_options(args: &ApplyArgs) -> ExportOptions {
    let naming = if let Some(prefix) = &args.prefix {
        NamingRule::Prefix(prefix.clone())
    } else if let Some(suffix) = &args.suffix {
        NamingRule::Suffix(suffix.clone())
    } else if let Some(pattern) = &args.pattern {
        NamingRule::Pattern(pattern.clone())
    } else {
        NamingRule::Original
    };
    ExportOptions {
        output_dir: args.output.clone(),
        format: args.format,
        resize: args.max_edge.map_or(ResizeRule::Original, ResizeRule::LongEdge),
        quality: args.quality,
        overwrite: args.overwrite,
        naming,
        create_subfolder: args.subfolder,
    }
}

fn templates(dir: &Path, action: TemplateAction) -> Result<()> {
    let mut store = TemplateStore::open(dir)?;
    for rejected in store.rejected() {
        println!("  ✗ {rejected}");
    }

    match action {
        TemplateAction::List => {
            for t in store.list() {
                let kind = if t.builtin { "built-in" } else { "user" };
                println!("  {:<24} {:<9} {}", t.name, kind, t.description);
            }
        }
        TemplateAction::Export { name, path } => {
            store.export(&name, &path)?;
            println!("Exported `{name}` to {}", path.display());
        }
        TemplateAction::Import { path } => {
            let template = store.import(&path)?;
            println!("Imported `{}`", template.name);
        }
        TemplateAction::Delete { name } => {
            store.delete(&name)?;
            println!("Deleted `{name}`");
        }
    }
    Ok(())
}
