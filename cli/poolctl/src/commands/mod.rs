//! CLI commands.

mod deploy;
mod status;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use warmpool_platform::{HttpPlatform, Platform, TemplateBundle, TemplateVersion};

/// poolctl - Deploy and inspect the warm pool.
#[derive(Debug, Parser)]
#[command(name = "poolctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Platform API key.
    #[arg(long, global = true, env = "PLATFORM_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Platform API base URL.
    #[arg(
        long,
        global = true,
        env = "PLATFORM_API_URL",
        default_value = "http://127.0.0.1:5000"
    )]
    api_url: String,

    /// Pool name.
    #[arg(long, global = true, env = "POOL_NAME", default_value = "editor")]
    pool: String,

    /// Template directory to deploy from.
    #[arg(long, global = true, env = "TEMPLATE_DIR")]
    template_dir: Option<PathBuf>,

    /// Template version tag; defaults to the content hash of the template.
    #[arg(long, global = true, env = "TEMPLATE_VERSION")]
    template_version: Option<String>,

    /// Log progress to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Deploy one instance into the pool.
    Deploy(deploy::DeployCommand),

    /// Show the pool against the local template.
    Status(status::StatusCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        if self.verbose {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .with_writer(std::io::stderr)
                .init();
        }

        let ctx = CommandContext {
            api_key: self.api_key,
            api_url: self.api_url,
            pool: self.pool,
            template_dir: self.template_dir,
            template_version: self.template_version,
        };

        match self.command {
            Commands::Deploy(cmd) => cmd.run(ctx).await,
            Commands::Status(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("poolctl {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
#[derive(Debug)]
pub struct CommandContext {
    pub api_key: Option<String>,
    pub api_url: String,
    pub pool: String,
    pub template_dir: Option<PathBuf>,
    pub template_version: Option<String>,
}

impl CommandContext {
    /// Get an authenticated platform client.
    pub fn platform(&self) -> Result<Arc<dyn Platform>> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            anyhow::anyhow!("No API key specified. Use --api-key or set PLATFORM_API_KEY.")
        })?;
        let client = HttpPlatform::new(&self.api_url, api_key)
            .context("failed to create platform client")?;
        Ok(Arc::new(client))
    }

    /// Load the template bundle.
    pub fn bundle(&self) -> Result<TemplateBundle> {
        let dir = self.template_dir.as_deref().ok_or_else(|| {
            anyhow::anyhow!("No template directory specified. Use --template-dir or set TEMPLATE_DIR.")
        })?;
        let version = self.template_version.clone().map(TemplateVersion::new);
        TemplateBundle::open(dir, version)
            .with_context(|| format!("failed to load template from {}", dir.display()))
    }
}
