//! rewind-hook - hook runner for host agent CLIs
//!
//! Reads one JSON payload from standard input, asks the decision engine
//! whether to snapshot, and acts. A hook must never disturb the host agent:
//! every failure is logged to stderr (and the log file) and the process
//! still exits 0. Stdout stays silent.

use rewind_core::hooks::{self, HookAction, HookPayload};
use std::io::Read;

fn main() {
    // Exit 0 no matter what; the host agent is watching.
    if let Err(e) = run() {
        eprintln!("rewind-hook: {:#}", e);
    }
}

fn run() -> anyhow::Result<()> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;

    let payload: HookPayload = match serde_json::from_str(&input) {
        Ok(payload) => payload,
        Err(e) => {
            // Garbage on stdin is the host's bug, not ours to escalate.
            eprintln!("rewind-hook: unreadable payload: {}", e);
            return Ok(());
        }
    };

    let project_root = hooks::resolve_project_root(&payload);
    let config = rewind_core::Config::load_for_project(&project_root);
    let _log_guard = rewind_core::logging::init(&config.logging).ok();

    match hooks::handle_hook(&payload) {
        Ok(HookAction::Created { checkpoint }) => {
            tracing::info!(%checkpoint, "Hook checkpoint created");
        }
        Ok(HookAction::Skipped { reason }) => {
            tracing::debug!(%reason, "Hook skipped");
        }
        Err(e) => {
            tracing::error!(error = %e, "Hook failed");
            eprintln!("rewind-hook: {}", e);
        }
    }
    Ok(())
}
