mod base_system;
mod epub;
mod scrape;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

use base_system::config::{self, AppConfig};
use base_system::http::CachedClient;
use base_system::logging::{LogOptions, LogSystem};
use epub::{ContainerWriter, EpubWriter};
use scrape::assembler::BookAssembler;

/// Download serialized web fiction and bundle each work into an EPUB.
#[derive(Parser, Debug)]
#[command(name = "scribblehub-epub", version, about)]
struct Cli {
    /// Work URLs (series or chapter form). Falls back to the config file.
    urls: Vec<String>,

    /// Destination directory for generated EPUB files.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Config file path. Created with commented defaults if absent.
    #[arg(long, default_value = "config.yml")]
    config: PathBuf,

    /// Verbose console logging.
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = LogSystem::init(LogOptions {
        debug: cli.debug,
        use_color: true,
    })
    .context("failed to initialize logging")?;

    let config = config::load_or_create(&cli.config)
        .with_context(|| format!("failed to load config at {}", cli.config.display()))?;

    let urls = resolve_urls(&cli, &config)?;
    let out_dir = resolve_out_dir(&cli, &config)?;
    let transport = CachedClient::new(config.network.clone())?;
    let writer = EpubWriter::new();

    let mut failures = 0usize;
    for url in &urls {
        if let Err(err) = process_book(&transport, &writer, url, &out_dir) {
            error!("{url} failed: {err:#}");
            failures += 1;
        }
    }

    if failures == urls.len() {
        bail!("all {failures} book(s) failed");
    }
    if failures > 0 {
        info!("{} of {} book(s) finished", urls.len() - failures, urls.len());
    }
    Ok(())
}

fn resolve_urls(cli: &Cli, config: &AppConfig) -> Result<Vec<String>> {
    let urls = if cli.urls.is_empty() {
        config.books.urls.clone()
    } else {
        cli.urls.clone()
    };
    if urls.is_empty() {
        bail!(
            "no work URLs given; pass them as arguments or list them under books.urls in {}",
            cli.config.display()
        );
    }
    Ok(urls)
}

fn resolve_out_dir(cli: &Cli, config: &AppConfig) -> Result<PathBuf> {
    if let Some(path) = &cli.output {
        return Ok(path.clone());
    }
    if let Some(path) = &config.output.path {
        return Ok(PathBuf::from(path));
    }
    bail!(
        "no output directory given; pass -o or set output.path in {}",
        cli.config.display()
    );
}

fn process_book(
    transport: &CachedClient,
    writer: &EpubWriter,
    url: &str,
    out_dir: &Path,
) -> Result<()> {
    let mut assembler = BookAssembler::new(transport, url)?;
    assembler.load_metadata()?;

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} chapters {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let result = assembler.load_chapters(Some(&bar));
    bar.finish_and_clear();
    result?;

    let book = assembler.finalize()?;
    let path = writer.write(&book, out_dir)?;
    info!("'{}' written to {}", book.metadata.title, path.display());
    Ok(())
}
