mod cli;

use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tfrec_engine::{
    DownloadRequest, LocalDirectoryStore, Pipeline, PipelineError, PipelineStage, RunReport,
    StaticCredentials,
};
use tokio::io::AsyncReadExt;
use tracing::{Level, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::cli::Args;

const DEFAULT_LOG_FILTER: &str = "tfrec=info,tfrec_engine=info";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(&args);

    match run(args).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            error!("Application error: {e:#}");
            eprintln!("Error: {e:#}");
            process::exit(2);
        }
    }
}

/// Returns whether the recording succeeded; `Err` only for failures that
/// prevent producing a report at all.
async fn run(args: Args) -> Result<bool> {
    let report = execute(&args).await;
    let json = report.to_json().context("failed to serialize run report")?;
    println!("{json}");
    Ok(report.is_success())
}

/// Every failure, setup included, ends up in the returned report.
async fn execute(args: &Args) -> RunReport {
    let request = match load_request(args).await {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Could not read request");
            return RunReport::failure(PipelineStage::Init, &e);
        }
    };

    let pipeline = match Pipeline::new(
        args.pipeline_config(),
        Arc::new(StaticCredentials::new(&args.auth_token, &args.area_id)),
        Arc::new(LocalDirectoryStore::new(&args.output_dir)),
    ) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return RunReport::failure(PipelineStage::Init, &e);
        }
    };

    info!(
        station = %request.station_id,
        title = %request.title,
        workers = pipeline.config().pool.workers,
        "Starting recording"
    );
    pipeline.run(&request).await.report()
}

async fn load_request(args: &Args) -> Result<DownloadRequest, PipelineError> {
    let raw = match args.request.as_deref() {
        Some(path) if path.as_os_str() != "-" => tokio::fs::read_to_string(path).await?,
        _ => {
            let mut buffer = String::new();
            tokio::io::stdin().read_to_string(&mut buffer).await?;
            buffer
        }
    };
    let request = DownloadRequest::from_json(&raw)?;
    request.validate()?;
    Ok(request)
}

fn init_logging(args: &Args) {
    let filter = if args.quiet {
        EnvFilter::new("error")
    } else if args.verbose {
        EnvFilter::new("tfrec=debug,tfrec_engine=debug,process_utils=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
            .add_directive(Level::WARN.into())
    };

    // stdout carries the report, logs go to stderr.
    let registry = tracing_subscriber::registry().with(filter);
    if args.json_logs {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(args.verbose)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
