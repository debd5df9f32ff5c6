use std::process::ExitCode;

use anyhow::Context;
use larder_backup::build_info::BuildInfo;
use larder_backup::config::SyncConfig;
use larder_backup::sync::engine::{SyncEngine, SyncOptions, SyncOutcome};
use larder_backup::sync::paths::Layout;
use larder_core::LarderClient;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Sync,
    Help,
    Version,
    VersionFull,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Help;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "sync" => mode = CliMode::Sync,
            "--help" | "-h" => return Ok(CliMode::Help),
            "--version" | "-v" => return Ok(CliMode::Version),
            "--version-full" => return Ok(CliMode::VersionFull),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

fn print_usage() {
    println!("Usage: larder-backup [sync]");
    println!("  sync             Mirror recipe data from the Larder API to local disk");
    println!("  -v, --version    Print version and exit");
    println!("  --version-full   Print detailed version information and exit");
    println!();
    println!("Configuration is environment-driven (LARDER_*); see README.");
}

fn init_tracing() {
    let filter = std::env::var("LARDER_LOG").unwrap_or_else(|_| "info".to_string());
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

async fn run_sync() -> anyhow::Result<SyncOutcome> {
    let config = SyncConfig::from_env().context("failed to load configuration")?;
    tracing::info!(
        data_dir = %config.data_dir.display(),
        workers = config.workers,
        recipes = config.include_recipes,
        categories = config.include_categories,
        purge_after_secs = config.purge_after.map(|d| d.as_secs()),
        "starting sync run"
    );
    let client = match &config.base_url {
        Some(url) => LarderClient::with_base_url(url, &config.username, &config.password),
        None => LarderClient::new(&config.username, &config.password),
    }
    .context("failed to create Larder API client")?;
    let layout = Layout::from_env(&config.data_dir);
    let engine = SyncEngine::new(
        client,
        layout,
        SyncOptions {
            include_recipes: config.include_recipes,
            include_categories: config.include_categories,
            workers: config.workers,
            purge_after: config.purge_after,
        },
    );

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });
    }

    Ok(engine.run(token).await)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let build = BuildInfo::from_build_env();

    let mode = match parse_cli_mode(std::env::args()) {
        Ok(mode) => mode,
        Err(err) => {
            eprintln!("larder-backup: {err}");
            return ExitCode::from(1);
        }
    };

    match mode {
        CliMode::Help => {
            print_usage();
            ExitCode::SUCCESS
        }
        CliMode::Version => {
            println!("{}", build.short());
            ExitCode::SUCCESS
        }
        CliMode::VersionFull => {
            println!("{}", build.full());
            ExitCode::SUCCESS
        }
        CliMode::Sync => {
            init_tracing();
            match run_sync().await {
                Ok(SyncOutcome::Clean) => ExitCode::SUCCESS,
                // Distinct status so schedulers can tell partial syncs apart
                // from startup failures.
                Ok(SyncOutcome::CompletedWithErrors) => ExitCode::from(2),
                Err(err) => {
                    eprintln!("larder-backup: {err:#}");
                    ExitCode::from(1)
                }
            }
        }
    }
}
