//! imgto command line
//!
//! - `imgto optimize <files...> --out <dir>` runs the whole pipeline on local
//!   files and saves the results
//! - `imgto serve` runs the signing and archive endpoints

mod config;

use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use config::AppConfig;
use imgto_core::download::{sanitize_filename, DownloadSource};
use imgto_core::prelude::*;
use imgto_core::util::{format_bytes, ByteFormat};
use imgto_media::{CloudinaryClient, HttpFetcher};
use imgto_server::ServerState;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn cli() -> Command {
    Command::new("imgto")
        .version(imgto_core::VERSION)
        .about("Optimize images through a hosted media service")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML config file with [pipeline], [media] and [server] sections"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("optimize")
                .about("Upload files, wait for their variants and save them")
                .arg(
                    Arg::new("files")
                        .required(true)
                        .num_args(1..)
                        .value_parser(value_parser!(PathBuf))
                        .help("Images to optimize"),
                )
                .arg(
                    Arg::new("out")
                        .long("out")
                        .short('o')
                        .default_value(".")
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory results are saved into"),
                )
                .arg(
                    Arg::new("formats")
                        .long("formats")
                        .value_delimiter(',')
                        .value_parser(value_parser!(Format))
                        .help("Variants to save (optimized, avif, webp, jpg, jxl); default optimized"),
                )
                .arg(
                    Arg::new("zip")
                        .long("zip")
                        .action(ArgAction::SetTrue)
                        .help("Also save every optimized image in one archive"),
                )
                .arg(
                    Arg::new("concurrency")
                        .long("concurrency")
                        .value_parser(value_parser!(usize))
                        .help("Maximum concurrent uploads"),
                ),
        )
        .subcommand(
            Command::new("serve")
                .about("Run the signing and archive endpoints")
                .arg(
                    Arg::new("addr")
                        .long("addr")
                        .value_parser(value_parser!(SocketAddr))
                        .help("Address to listen on"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json"));

    let config = AppConfig::load(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;

    match matches.subcommand() {
        Some(("optimize", args)) => optimize(config, args).await,
        Some(("serve", args)) => serve(config, args).await,
        _ => bail!("unknown command"),
    }
}

async fn optimize(mut config: AppConfig, args: &ArgMatches) -> anyhow::Result<()> {
    if let Some(n) = args.get_one::<usize>("concurrency") {
        config.pipeline = config.pipeline.with_upload_concurrency(*n);
        config.pipeline.validate()?;
    }
    let out = args
        .get_one::<PathBuf>("out")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("."));
    tokio::fs::create_dir_all(&out)
        .await
        .with_context(|| format!("unable to create {}", out.display()))?;
    let formats: Vec<Format> = match args.get_many::<Format>("formats") {
        Some(formats) => formats.copied().collect(),
        None => vec![Format::Optimized],
    };

    let client = Arc::new(CloudinaryClient::new(config.media.clone())?);
    let session = Session::new(config.pipeline.clone(), client.clone(), client);

    let mut files = Vec::new();
    for path in args.get_many::<PathBuf>("files").into_iter().flatten() {
        let file = SourceFile::from_path(path)
            .await
            .with_context(|| format!("unable to read {}", path.display()))?;
        files.push(file);
    }
    session.add_files(files);

    let reporter = tokio::spawn(report_progress(session.subscribe()));
    let summary = session.process().await;
    reporter.abort();
    let summary = summary?;
    tracing::info!(
        finished = summary.finished,
        failed = summary.failed,
        "processing complete"
    );

    save_results(&session, &formats, &out).await;

    if args.get_flag("zip") && !session.archive_entries().is_empty() {
        let archive = session.archive().await?;
        let path = session
            .download(DownloadSource::Bytes(archive), &out, "imgto.zip")
            .await?;
        println!("archive: {}", path.display());
    }

    print_summary(&session.progress());
    Ok(())
}

async fn report_progress(mut rx: tokio::sync::watch::Receiver<imgto_core::Snapshot>) {
    let mut last = -1.0;
    while rx.changed().await.is_ok() {
        let progress = AggregateProgress::of(&*rx.borrow_and_update());
        if progress.percent != last {
            last = progress.percent;
            eprintln!(
                "[{:>5.1}%] {} {}/{}",
                progress.percent,
                progress.global_state,
                progress.done(),
                progress.total
            );
        }
    }
}

async fn save_results(session: &Session, formats: &[Format], out: &Path) {
    let bytes = ByteFormat::default().with_limit(1000).with_fixed(2);
    for record in session.snapshot().iter() {
        if record.state != RecordState::Finished {
            println!("{}: {}", record.name, record.errors.join("; "));
            continue;
        }
        for format in formats {
            match session.download_variant(&record.id, *format, out).await {
                Ok(path) => {
                    let wanted = sanitize_filename(&record.download_name(*format)).unwrap_or_default();
                    if path.file_name().and_then(|n| n.to_str()) != Some(wanted.as_str()) {
                        tracing::warn!(
                            name = %record.name,
                            path = %path.display(),
                            "{wanted} already exists, saved under a new name"
                        );
                    }
                    let size = tokio::fs::metadata(&path)
                        .await
                        .map(|m| m.len())
                        .unwrap_or_default();
                    println!(
                        "{}: {} -> {} ({})",
                        record.name,
                        format_bytes(record.original_size, &bytes),
                        format_bytes(size, &bytes),
                        path.display()
                    );
                }
                Err(e) => {
                    tracing::warn!(name = %record.name, %format, error = %e, "unable to save variant");
                }
            }
        }
    }
}

fn print_summary(progress: &AggregateProgress) {
    let bytes = ByteFormat::default().with_limit(1000).with_fixed(2);
    println!(
        "{} finished, {} failed, {} -> {}",
        progress.finished,
        progress.error,
        format_bytes(progress.original_bytes, &bytes),
        format_bytes(progress.optimized_bytes, &bytes)
    );
    if let Some(savings) = progress.savings_percent() {
        println!("saved {savings:.1}%");
    }
}

async fn serve(config: AppConfig, args: &ArgMatches) -> anyhow::Result<()> {
    let addr = args
        .get_one::<SocketAddr>("addr")
        .copied()
        .unwrap_or(config.server.addr);
    let fetcher = Arc::new(HttpFetcher::new(config.media.timeout())?);
    if config.media.api_secret.is_none() {
        tracing::warn!("CLOUDINARY_API_SECRET not set, /api/sign will fail");
    }
    let state = Arc::new(
        ServerState::new(config.media.api_secret.clone(), fetcher)
            .with_algorithm(config.media.signature_algorithm),
    );

    let (_, server) = imgto_server::bind(state, addr, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "unable to listen for shutdown signal");
        }
    })?;
    server.await;
    tracing::info!("server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn optimize_args_parse() {
        let matches = cli()
            .try_get_matches_from([
                "imgto", "optimize", "a.png", "b.jpg", "--out", "dist", "--formats", "avif,webp",
                "--zip", "--concurrency", "4",
            ])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        let files: Vec<&PathBuf> = args.get_many("files").unwrap().collect();
        assert_eq!(files.len(), 2);
        let formats: Vec<Format> = args.get_many::<Format>("formats").unwrap().copied().collect();
        assert_eq!(formats, vec![Format::Avif, Format::Webp]);
        assert!(args.get_flag("zip"));
        assert_eq!(args.get_one::<usize>("concurrency"), Some(&4));
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!(cli()
            .try_get_matches_from(["imgto", "optimize", "a.png", "--formats", "gif"])
            .is_err());
    }
}
