//! CLI entry point for the transfer tool.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use futures_util::future::join_all;
use tracing::{debug, info, warn};
use transfer_core::{
    BackoffRetrier, Credential, HttpTransport, Interceptor, RateLimiter, Request,
    RequestDescriptor, ResponseBody, ResumeData, Session, SessionConfig, UploadSource,
};
use url::Url;

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    if args.urls.is_empty() {
        info!("No URLs given. Example: transfer -o downloads https://example.com/file.pdf");
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("loading session config {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if args.no_auto_start {
        config.start_requests_immediately = false;
    }

    let retrier = BackoffRetrier::with_max_attempts(u32::from(args.max_retries));
    let mut interceptor = Interceptor::new().with_retrier(retrier);
    if args.rate_limit == 0 {
        debug!("rate limiting disabled");
    } else {
        debug!(rate_limit_ms = args.rate_limit, "rate limiting enabled");
        interceptor =
            interceptor.with_policy(RateLimiter::new(Duration::from_millis(args.rate_limit)));
    }

    let mut builder = Session::builder()
        .config(config)
        .transport(HttpTransport::new()?)
        .interceptor(interceptor);
    if let Some(user) = &args.user {
        builder = builder.credential(parse_credential(user)?);
    }
    let session = builder.build()?;

    let mut requests = Vec::with_capacity(args.urls.len());
    for url in &args.urls {
        let request = submit(&session, &args, url)?;
        if args.no_auto_start {
            request.resume();
        }
        requests.push((url, request));
    }

    let outcomes = join_all(requests.iter().map(|(_, request)| request.response())).await;

    let mut failed = 0usize;
    for ((url, _), outcome) in requests.iter().zip(outcomes) {
        match outcome {
            Ok(response) => {
                let body = match &response.output.body {
                    ResponseBody::Empty => "empty body".to_string(),
                    ResponseBody::Bytes(bytes) => format!("{} bytes", bytes.len()),
                    ResponseBody::File(path) => format!("saved to {}", path.display()),
                };
                info!(
                    url = %url,
                    status = response.output.status,
                    retries = response.retry_count,
                    "{body}"
                );
            }
            Err(error) => {
                failed += 1;
                warn!(url = %url, %error, "transfer failed");
            }
        }
    }

    info!(
        completed = requests.len() - failed,
        failed,
        total = requests.len(),
        "Transfers complete"
    );

    if failed > 0 {
        bail!("{failed} of {} transfers failed", requests.len());
    }
    Ok(())
}

fn submit(session: &Session, args: &Args, url: &str) -> Result<Request> {
    if let Some(source) = &args.upload {
        return Ok(session.upload(
            RequestDescriptor::put(url),
            UploadSource::File(source.clone()),
        ));
    }
    let Some(dir) = &args.output else {
        return Ok(session.request(RequestDescriptor::get(url)));
    };

    let destination = dir.join(file_name_for(url));
    if partial_file_len(&destination) > 0 {
        let resume = ResumeData::from_partial_file(url, &destination)
            .with_context(|| format!("reading partial file {}", destination.display()))?;
        info!(url, offset = resume.offset, "resuming download");
        return Ok(session.download_resuming(resume, destination));
    }
    Ok(session.download(RequestDescriptor::get(url), destination))
}

fn partial_file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map_or(0, |metadata| metadata.len())
}

/// Last non-empty path segment of `url`, or `index` when there is none.
fn file_name_for(url: &str) -> PathBuf {
    Url::parse(url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.rfind(|s| !s.is_empty()).map(str::to_owned))
        })
        .map_or_else(|| PathBuf::from("index"), PathBuf::from)
}

fn parse_credential(raw: &str) -> Result<Credential> {
    match raw.split_once(':') {
        Some((user, password)) if !user.is_empty() => Ok(Credential::new(user, password)),
        _ => bail!("credential must look like USER:PASSWORD"),
    }
}
