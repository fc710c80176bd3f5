use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use offline_mirror::{
    AssetOutcome, CacheStore, CancelSignal, Cli, Command, MirrorConfig, MirrorEvent,
    MirrorRequest, MirrorResult, PageMirror,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_logging(&args)?;

    let mut config = MirrorConfig::load_or_default(args.config.as_deref())?;
    if let Some(dir) = &args.cache_dir {
        config.cache_root = dir.clone();
    }

    match args.command {
        Command::Mirror {
            url,
            name,
            concurrency,
            json,
        } => {
            if let Some(concurrency) = concurrency {
                config.max_concurrent_assets = usize::from(concurrency);
            }
            let request = MirrorRequest::new(&url, name.unwrap_or_else(|| url.clone()))?;
            run_mirror(config, request, json).await
        }
        Command::Status { url } => {
            let request = MirrorRequest::new(&url, url.clone())?;
            let store = CacheStore::new(&config.cache_root)?;
            match store.index_path(&request.source_url) {
                Some(path) => {
                    let size = store.size_of(&request.source_url)?;
                    println!("✅ Mirrored: {}", path.display().to_string().blue());
                    println!("📦 Size: {}", format_size(size));
                }
                None => println!("⏭️  Not mirrored: {}", url),
            }
            Ok(())
        }
        Command::Evict { url } => {
            let request = MirrorRequest::new(&url, url.clone())?;
            let store = CacheStore::new(&config.cache_root)?;
            store.evict(&request.source_url)?;
            println!("🗑️  Evicted mirror of {}", url.blue());
            Ok(())
        }
        Command::EvictAll { yes } => {
            if !yes {
                bail!("refusing to delete every mirror without --yes");
            }
            let store = CacheStore::new(&config.cache_root)?;
            store.evict_all()?;
            println!("🗑️  Cleared {}", store.root().display());
            Ok(())
        }
        Command::List { json } => {
            let store = CacheStore::new(&config.cache_root)?;
            let info = store.info()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                for entry in &info.entries {
                    println!("{:>10}  {}", format_size(entry.size), entry.path.display());
                }
                println!(
                    "📊 {} mirrors, {} total",
                    info.count,
                    format_size(info.total_size)
                );
            }
            Ok(())
        }
    }
}

fn init_logging(args: &Cli) -> Result<()> {
    let level = if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;
    Ok(())
}

async fn run_mirror(config: MirrorConfig, request: MirrorRequest, json: bool) -> Result<()> {
    println!("🚀 Mirroring: {}", request.source_url.as_str().blue());
    println!("📁 Cache root: {:?}", config.cache_root);

    let progress_bar = ProgressBar::new_spinner();
    progress_bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner} [{pos}/{len}] {msg}")
            .context("invalid progress template")?,
    );
    progress_bar.enable_steady_tick(Duration::from_millis(100));

    let bar = progress_bar.clone();
    let mirror = PageMirror::from_config(config)?.with_progress(move |event| match event {
        MirrorEvent::DocumentFetched { assets, .. } => {
            bar.set_length(*assets as u64);
            bar.set_message("Fetching assets");
        }
        MirrorEvent::AssetStarted { url } => bar.set_message(format!("Downloading: {url}")),
        MirrorEvent::AssetFinished { .. } => bar.inc(1),
        MirrorEvent::Finished { .. } => {}
    });

    let (cancel_handle, cancel) = CancelSignal::pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_handle.cancel();
        }
    });

    let result = mirror.mirror_with_cancel(&request, &cancel).await;
    progress_bar.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        report(&result);
    }

    match &result.error {
        Some(error) => bail!("{error}"),
        None => Ok(()),
    }
}

fn report(result: &MirrorResult) {
    for asset in &result.assets {
        if let AssetOutcome::Failed { error } = &asset.outcome {
            eprintln!(
                "⚠️  {} {}: {}",
                "Missing".yellow(),
                asset.reference.resolved_url,
                error
            );
        }
    }

    if let Some(path) = &result.html_path {
        println!("💾 Offline page: {}", path.display());
    }
    println!(
        "📊 Assets: {} available, {} failed",
        result.fetched_count(),
        result.failed_count()
    );

    if result.is_partial() {
        println!(
            "{}",
            "✅ Mirror completed; the offline copy may be missing some images, styles, or scripts."
                .yellow()
        );
    } else if result.success {
        println!("{}", "✅ Mirror completed successfully!".green());
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}
