//! Hook script execution
//!
//! Operator-supplied shell scripts run best effort: every hook in a
//! batch is spawned without waiting for its siblings, the batch is
//! joined, and exit codes are summed. A nonzero sum is a warning, never
//! a failure. No timeout is enforced; a hung hook stalls only its own
//! batch's join.

use std::path::Path;

use futures::future::join_all;
use tokio::process::Command;
use tracing::{debug, error, warn};

/// Run one script through `/bin/sh`, returning its exit code.
///
/// Spawn failures count as exit code 1 so they show up in the batch sum.
pub async fn run_hook(script: &Path, arg: Option<&str>) -> i32 {
    let mut command = Command::new("/bin/sh");
    command.arg(script);
    if let Some(arg) = arg {
        command.arg(arg);
    }
    match command.status().await {
        Ok(status) => {
            let code = status.code().unwrap_or(1);
            if code > 0 {
                warn!(hook = %script.display(), code, "hook exited with nonzero code");
            } else {
                debug!(hook = %script.display(), code, "hook finished");
            }
            code
        }
        Err(e) => {
            warn!(hook = %script.display(), error = %e, "could not spawn hook");
            1
        }
    }
}

/// Run every `*.sh` in `dir` in parallel and sum the exit codes.
pub async fn run_hook_dir(dir: &Path) -> i32 {
    let pattern = dir.join("*.sh").to_string_lossy().into_owned();
    let scripts: Vec<_> = match glob::glob(&pattern) {
        Ok(paths) => paths.filter_map(Result::ok).collect(),
        Err(e) => {
            error!(dir = %dir.display(), error = %e, "could not enumerate hooks");
            return 0;
        }
    };
    if scripts.is_empty() {
        debug!(dir = %dir.display(), "no hooks installed");
        return 0;
    }

    let runs = scripts.iter().map(|script| run_hook(script, None));
    let sum: i32 = join_all(runs).await.into_iter().sum();
    if sum > 0 {
        warn!(dir = %dir.display(), sum, "some hooks did not run successfully");
    } else {
        debug!(dir = %dir.display(), count = scripts.len(), "all hooks finished");
    }
    sum
}
