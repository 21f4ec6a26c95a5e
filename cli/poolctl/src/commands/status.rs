//! Status command - Show the pool classified against the local template.
//!
//! Status shows:
//! - Every pool instance, marked current or outdated
//! - The additions and removals the worker would plan next cycle

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use warmpool_platform::{Instance, TemplateVersion};
use warmpool_reconcile::{PoolLimits, PoolSnapshot, ReconcilePlan, DEFAULT_BATCH_SIZE, DEFAULT_POOL_SIZE};

use crate::output::{format_json, format_table, print_info, OutputFormat};

use super::CommandContext;

/// Status command - show the pool and the next plan.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Print JSON instead of a table.
    #[arg(long)]
    json: bool,

    /// Target pool size used for the plan.
    #[arg(long, env = "POOL_SIZE", default_value_t = DEFAULT_POOL_SIZE)]
    pool_size: usize,

    /// Per-cycle batch size used for the plan.
    #[arg(long, env = "BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,
}

impl StatusCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let platform = ctx.platform()?;
        let bundle = ctx.bundle()?;

        let instances = platform
            .list_instances(&ctx.pool)
            .await
            .with_context(|| format!("failed to list pool {}", ctx.pool))?;

        let limits = PoolLimits {
            pool_size: self.pool_size,
            batch_size: self.batch_size,
        };
        let report = PoolStatus::new(&ctx.pool, bundle.version(), instances, limits);

        match OutputFormat::from_json_flag(self.json) {
            OutputFormat::Json => println!("{}", format_json(&report)),
            OutputFormat::Table => print_table(&report),
        }
        Ok(())
    }
}

/// Pool status as printed by `--json`.
#[derive(Debug, Serialize)]
struct PoolStatus {
    pool: String,
    template_version: TemplateVersion,
    current: Vec<Instance>,
    outdated: Vec<Instance>,
    plan: ReconcilePlan,
}

impl PoolStatus {
    fn new(
        pool: &str,
        version: &TemplateVersion,
        instances: Vec<Instance>,
        limits: PoolLimits,
    ) -> Self {
        let snapshot = PoolSnapshot::classify(instances, version, |i| &i.template_version);
        let plan = ReconcilePlan::compute(&snapshot, limits);
        Self {
            pool: pool.to_string(),
            template_version: version.clone(),
            current: snapshot.current,
            outdated: snapshot.outdated,
            plan,
        }
    }

    fn rows(&self) -> Vec<InstanceRow> {
        let current = self.current.iter().map(|i| InstanceRow::new(i, "current"));
        let outdated = self.outdated.iter().map(|i| InstanceRow::new(i, "outdated"));
        current.chain(outdated).collect()
    }
}

/// One table row.
#[derive(Debug, Tabled)]
struct InstanceRow {
    #[tabled(rename = "ID")]
    id: String,

    #[tabled(rename = "Name")]
    name: String,

    #[tabled(rename = "State")]
    state: String,

    #[tabled(rename = "Template")]
    template: &'static str,

    #[tabled(rename = "Version")]
    version: String,

    #[tabled(rename = "URL")]
    url: String,
}

impl InstanceRow {
    fn new(instance: &Instance, template: &'static str) -> Self {
        Self {
            id: instance.id.to_string(),
            name: instance.name.clone(),
            state: instance.state.to_string(),
            template,
            version: instance.template_version.to_string(),
            url: instance.web_url.clone().unwrap_or_else(|| "-".to_string()),
        }
    }
}

fn print_table(report: &PoolStatus) {
    println!("{}", format_table(&report.rows()));
    print_info(&format!(
        "pool {}: {} current, {} outdated (template {})",
        report.pool,
        report.current.len(),
        report.outdated.len(),
        report.template_version
    ));
    if report.plan.is_noop() {
        print_info("next cycle: nothing to do");
    } else {
        print_info(&format!(
            "next cycle: deploy {}, remove {}",
            report.plan.additions, report.plan.removals
        ));
    }
}
