//! Deploy command - add one instance to the pool by hand.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;
use warmpool_platform::Instance;
use warmpool_worker::pool::{DeploySettings, Deployer};

use crate::output::print_success;

use super::CommandContext;

/// Deploy one instance from the template.
#[derive(Debug, Args)]
pub struct DeployCommand {
    /// Leave the instance serving instead of scaling it to idle.
    #[arg(long)]
    keep_running: bool,

    /// Give up if the build has not finished after this many seconds.
    #[arg(
        long,
        env = "DEPLOY_TIMEOUT_SECS",
        default_value = "600",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    deploy_timeout_secs: u64,

    /// Seconds between build status checks.
    #[arg(
        long,
        env = "HEALTH_POLL_INTERVAL_SECS",
        default_value = "5",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    health_poll_interval_secs: u64,
}

impl DeployCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let platform = ctx.platform()?;
        let bundle = ctx.bundle()?;
        let settings = DeploySettings {
            health_poll_interval: Duration::from_secs(self.health_poll_interval_secs),
            deploy_timeout: Duration::from_secs(self.deploy_timeout_secs),
        };
        let deployer = Deployer::new(platform, Arc::new(bundle), ctx.pool, settings);

        // Ctrl+C abandons the deploy.
        let cancel = CancellationToken::new();
        let interrupt = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            }
        });

        let result = if self.keep_running {
            deployer.deploy_running(&cancel).await
        } else {
            deployer.deploy_and_idle(&cancel).await
        };
        interrupt.abort();

        let instance = result?;
        print_success(&format!("Deployed instance {}", instance.id));
        println!("{}", visit_line(&instance));
        Ok(())
    }
}

fn visit_line(instance: &Instance) -> String {
    match &instance.web_url {
        Some(url) => format!("Visit {url}"),
        None => format!("Visit instance {} (no URL assigned yet)", instance.id),
    }
}
