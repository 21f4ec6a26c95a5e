//! Error display for the CLI.

use colored::Colorize;
use warmpool_platform::{BundleError, PlatformError};
use warmpool_worker::pool::DeployError;

/// Hint printed under an error, taken from the first cause that has one.
fn hint_for(err: &anyhow::Error) -> Option<&'static str> {
    err.chain().find_map(hint_for_cause)
}

fn hint_for_cause(cause: &(dyn std::error::Error + 'static)) -> Option<&'static str> {
    if let Some(platform_err) = cause.downcast_ref::<PlatformError>() {
        return match platform_err {
            PlatformError::Unauthorized { .. } => Some("Check PLATFORM_API_KEY or pass --api-key."),
            PlatformError::Http(_) => Some("Check your network connection and PLATFORM_API_URL."),
            e if e.is_transient() => Some("The platform is unavailable; try again shortly."),
            _ => None,
        };
    }
    if cause.downcast_ref::<BundleError>().is_some() {
        return Some("Point --template-dir (or TEMPLATE_DIR) at the template directory.");
    }
    match cause.downcast_ref::<DeployError>()? {
        DeployError::Timeout { .. } => Some("Raise --deploy-timeout-secs if builds are slow."),
        DeployError::Cancelled => Some("The instance may still exist on the platform."),
        _ => None,
    }
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    if let Some(hint) = hint_for(err) {
        eprintln!("\n{} {}", "Hint:".yellow().bold(), hint.yellow());
    }
}
