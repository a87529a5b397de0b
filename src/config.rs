use crate::storage::s3::S3Settings;
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub s3: S3Settings,
    /// Lifetime of signed GET URLs handed out for downloads.
    pub download_url_ttl: Duration,
    /// Lifetime of signed part PUT URLs.
    pub upload_url_ttl: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Client portal upload and delivery API")]
pub struct Args {
    /// Host to bind to (overrides PORTAL_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PORTAL_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides PORTAL_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket holding uploads (overrides PORTAL_S3_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Storage region (overrides PORTAL_S3_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible providers (overrides PORTAL_S3_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::resolve(args, |key| env::var(key).ok())?, migrate))
    }

    /// Merge `args` over values looked up through `lookup`. CLI wins.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        let port = match args.port {
            Some(port) => port,
            None => parse_var(&lookup, "PORTAL_PORT")?.unwrap_or(3000),
        };

        let bucket = match args.bucket.or_else(|| lookup("PORTAL_S3_BUCKET")) {
            Some(bucket) if !bucket.trim().is_empty() => bucket,
            _ => bail!("PORTAL_S3_BUCKET (or --bucket) is required"),
        };

        let download_secs = parse_var(&lookup, "PORTAL_DOWNLOAD_URL_TTL_SECS")?.unwrap_or(900);
        let upload_secs = parse_var(&lookup, "PORTAL_UPLOAD_URL_TTL_SECS")?.unwrap_or(3600);

        Ok(Self {
            host: args.host.unwrap_or_else(|| env_or("PORTAL_HOST", "0.0.0.0")),
            port,
            database_url: args
                .database_url
                .unwrap_or_else(|| env_or("PORTAL_DATABASE_URL", "sqlite://./data/portal.db")),
            s3: S3Settings {
                bucket,
                region: args
                    .region
                    .unwrap_or_else(|| env_or("PORTAL_S3_REGION", "us-east-1")),
                endpoint_url: args
                    .endpoint
                    .or_else(|| lookup("PORTAL_S3_ENDPOINT"))
                    .filter(|e| !e.trim().is_empty()),
            },
            download_url_ttl: Duration::from_secs(download_secs),
            upload_url_ttl: Duration::from_secs(upload_secs),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(None),
    }
}
