//! Stowage command line client
//!
//! Fetches a URL through the cache and writes its content to stdout.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use futures_util::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stowage::{
    ArtifactStore, CacheUrlOptions, ConnectMetadataClient, FileTokenSource, RetryPolicy,
    StaticTokenSource, StowageConfig, TokenSource, UrlCache,
};
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Fetch a URL through the stowage cache and write it to stdout
#[derive(Parser, Debug)]
#[command(name = "stowage")]
#[command(version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    config: PathBuf,

    /// Source URL to fetch
    url: String,

    /// Only accept cache entries younger than this many seconds
    #[arg(long, value_name = "SECS")]
    max_age: Option<u64>,

    /// Expected SHA-256 of the content (hex, optionally `sha256:` prefixed)
    #[arg(long)]
    digest: Option<String>,

    /// Retries for transient failures
    #[arg(long, default_value_t = 0)]
    retries: usize,

    /// Give up after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Bearer token, used when the config has no token_file
    #[arg(long, env = "STOWAGE_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

/// Oldest creation time accepted for a `--max-age` of `secs`
fn fresh_after(now: DateTime<Utc>, secs: u64) -> Result<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|age| now.checked_sub_signed(age))
        .with_context(|| format!("--max-age {} is out of range", secs))
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the content, logs go to stderr
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    info!("Loading configuration from: {}", args.config.display());
    let config = StowageConfig::from_file(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    info!("  - Endpoint: {}", config.endpoint);
    info!("  - Verbose transport: {}", config.verbose_transport);

    let tokens: Arc<dyn TokenSource> = match (&config.token_file, args.token) {
        (Some(path), _) => Arc::new(FileTokenSource::new(path)),
        (None, Some(token)) => Arc::new(StaticTokenSource::new(token)),
        (None, None) => bail!("no token_file configured; pass --token or set STOWAGE_TOKEN"),
    };

    let metadata = Arc::new(ConnectMetadataClient::new(&config, tokens)?);
    let store = ArtifactStore::new(metadata, &config)?;
    let cache = UrlCache::new(store, &config)?;

    let mut options = CacheUrlOptions::default().on_event(|event| info!("{}", event));
    if let Some(secs) = args.max_age {
        options = options.fresh_after(fresh_after(Utc::now(), secs)?);
    }
    if let Some(digest) = args.digest {
        options = options.expected_digest(digest);
    }
    if let Some(secs) = args.timeout {
        options = options.timeout(Duration::from_secs(secs));
    }

    let (mut stream, cache_info) = cache
        .cache_url_with_retry(&args.url, options, &RetryPolicy::new(args.retries))
        .await?;

    let mut stdout = tokio::io::stdout();
    while let Some(chunk) = stream.next().await {
        stdout.write_all(&chunk?).await?;
    }
    stdout.flush().await?;

    let stats = cache.metrics().get_stats();
    info!(
        "Done: path={}, cached_at={}, from_cache={}, origin_fetches={}",
        cache_info.path, cache_info.cached_at, cache_info.from_cache, stats.origin_fetches
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_positional_and_flags() {
        let parsed = Args::try_parse_from([
            "stowage",
            "stowage.yaml",
            "https://example.com/a",
            "--max-age",
            "3600",
            "--retries",
            "2",
        ])
        .unwrap();
        assert_eq!(parsed.config, PathBuf::from("stowage.yaml"));
        assert_eq!(parsed.url, "https://example.com/a");
        assert_eq!(parsed.max_age, Some(3600));
        assert_eq!(parsed.retries, 2);
        assert!(parsed.digest.is_none());
        assert!(parsed.timeout.is_none());
    }

    #[test]
    fn test_parse_rejects_missing_url() {
        assert!(Args::try_parse_from(["stowage", "stowage.yaml"]).is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_flag() {
        assert!(Args::try_parse_from(["stowage", "a", "b", "--bogus"]).is_err());
    }

    #[test]
    fn test_parse_token_flag() {
        let parsed =
            Args::try_parse_from(["stowage", "a", "b", "--token", "secret"]).unwrap();
        assert_eq!(parsed.token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_fresh_after_subtracts_max_age() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(
            fresh_after(now, 3600).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_fresh_after_rejects_huge_max_age() {
        let now = Utc::now();
        assert!(fresh_after(now, u64::MAX).is_err());
        assert!(fresh_after(now, i64::MAX as u64).is_err());
        assert!(fresh_after(now, 10_000_000_000_000_000).is_err());
    }
}
