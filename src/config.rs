use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub bucket: String,
    pub public_url_prefix: String,
    pub max_chunk_bytes: usize,
    pub max_connections: u32,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Resumable chunked upload service")]
pub struct Args {
    /// Host to bind to (overrides CHUNK_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CHUNK_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where chunks and artifacts are stored (overrides CHUNK_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides CHUNK_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket recorded on finished artifacts (overrides CHUNK_STORE_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Prefix of artifact access URLs (overrides CHUNK_STORE_PUBLIC_URL_PREFIX)
    #[arg(long)]
    pub public_url_prefix: Option<String>,

    /// Largest accepted request body in bytes (overrides CHUNK_STORE_MAX_CHUNK_BYTES)
    #[arg(long)]
    pub max_chunk_bytes: Option<usize>,

    /// SQLite pool size (overrides CHUNK_STORE_MAX_CONNECTIONS)
    #[arg(long)]
    pub max_connections: Option<u32>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// Fill every field from `args`, then the environment, then defaults.
    pub fn merge(args: Args) -> Result<Self> {
        Ok(Self {
            host: args
                .host
                .unwrap_or_else(|| env_or("CHUNK_STORE_HOST", "0.0.0.0")),
            port: match args.port {
                Some(port) => port,
                None => env_parse("CHUNK_STORE_PORT", 8080)?,
            },
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| env_or("CHUNK_STORE_STORAGE_DIR", "./data/blobs")),
            database_url: args.database_url.unwrap_or_else(|| {
                env_or(
                    "CHUNK_STORE_DATABASE_URL",
                    "sqlite://./data/meta/chunk_store.db",
                )
            }),
            bucket: args
                .bucket
                .unwrap_or_else(|| env_or("CHUNK_STORE_BUCKET", "default")),
            public_url_prefix: args
                .public_url_prefix
                .unwrap_or_else(|| env_or("CHUNK_STORE_PUBLIC_URL_PREFIX", "/files")),
            max_chunk_bytes: match args.max_chunk_bytes {
                Some(limit) => limit,
                None => env_parse("CHUNK_STORE_MAX_CHUNK_BYTES", 50 * 1024 * 1024)?,
            },
            max_connections: match args.max_connections {
                Some(limit) => limit,
                None => env_parse("CHUNK_STORE_MAX_CONNECTIONS", 10)?,
            },
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.into())
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
