use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: PathBuf,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(
    name = "simplepypi",
    author,
    version,
    about = "A really, really, simple HTTP PyPI-like server"
)]
pub struct Args {
    /// Host to bind to (overrides SIMPLEPYPI_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SIMPLEPYPI_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding one subdirectory per package (overrides SIMPLEPYPI_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Copy these distribution files into the storage directory and exit
    #[arg(long = "import", value_name = "FILE", num_args = 1..)]
    pub import: Vec<PathBuf>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the files to import.
    pub fn from_env_and_args() -> Result<(Self, Vec<PathBuf>)> {
        // Parse CLI once
        let args = Args::parse();
        let cfg = Self::merge(&args, |key| env::var(key))?;
        Ok((cfg, args.import))
    }

    /// Merge parsed arguments over environment values read through `lookup`.
    fn merge(
        args: &Args,
        lookup: impl Fn(&str) -> Result<String, env::VarError>,
    ) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = lookup("SIMPLEPYPI_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match lookup("SIMPLEPYPI_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing SIMPLEPYPI_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 8000,
            Err(err) => return Err(err).context("reading SIMPLEPYPI_PORT"),
        };
        let env_storage = lookup("SIMPLEPYPI_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./packages"));

        // --- Merge ---
        Ok(Self {
            host: args.host.clone().unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.clone().unwrap_or(env_storage),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
