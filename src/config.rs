use crate::services::blob_service::ServiceConfig;
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    pub public_url: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "File-backed container/blob store")]
pub struct Args {
    /// Host to bind to (overrides BLOB_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BLOB_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where containers and blobs are stored (overrides BLOB_STORE_DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Base URL used in blob URIs (overrides BLOB_STORE_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::merge(Args::parse(), |key| env::var(key))
    }

    /// Merge CLI args over values looked up through `var`.
    fn merge(
        args: Args,
        var: impl Fn(&str) -> Result<String, env::VarError>,
    ) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = var("BLOB_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match var("BLOB_STORE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing BLOB_STORE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 10000,
            Err(err) => return Err(err).context("reading BLOB_STORE_PORT"),
        };
        let env_data = var("BLOB_STORE_DATA_DIR").unwrap_or_else(|_| "./data/blobs".into());
        let env_public_url = var("BLOB_STORE_PUBLIC_URL").ok();

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            data_dir: args.data_dir.unwrap_or(env_data),
            public_url: args.public_url.or(env_public_url),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Explicit configuration for `BlobService`.
    ///
    /// Without a configured public URL, blob URIs use the bind address,
    /// with an unspecified host replaced by loopback.
    pub fn service_config(&self) -> ServiceConfig {
        let public_url = self.public_url.clone().unwrap_or_else(|| {
            let host = match self.host.as_str() {
                "0.0.0.0" | "::" => "127.0.0.1",
                other => other,
            };
            format!("http://{}:{}", host, self.port)
        });
        ServiceConfig {
            data_dir: PathBuf::from(&self.data_dir),
            public_url,
        }
    }
}
