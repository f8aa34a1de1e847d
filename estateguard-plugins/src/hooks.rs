//! Lifecycle hook scripts.
//!
//! Manifests may attach scripts to lifecycle transitions. Scripts run from
//! the plugin directory with a hard timeout; a non-zero exit, a spawn
//! failure or a timeout all count as hook failure and drive the plugin to
//! `Failed`.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::PluginError;

pub async fn run_hook(
    plugin_id: &str,
    hook: &str,
    script: &str,
    plugin_dir: &Path,
    timeout: Duration,
) -> Result<(), PluginError> {
    let path = plugin_dir.join(script);
    debug!(plugin = plugin_id, hook, script = %path.display(), "running lifecycle hook");

    let output = Command::new(&path)
        .current_dir(plugin_dir)
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, output).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            return Err(PluginError::HookFailed {
                id: plugin_id.to_string(),
                hook: hook.to_string(),
                reason: format!("failed to run `{}`: {err}", path.display()),
            });
        }
        Err(_) => {
            return Err(PluginError::HookFailed {
                id: plugin_id.to_string(),
                hook: hook.to_string(),
                reason: format!("timed out after {}s", timeout.as_secs()),
            });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        return Err(PluginError::HookFailed {
            id: plugin_id.to_string(),
            hook: hook.to_string(),
            reason: format!(
                "exited with {}{}{}",
                output.status,
                if stderr.is_empty() { "" } else { ": " },
                stderr
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
    }

    #[tokio::test]
    async fn successful_hook_passes() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "ok.sh", "#!/bin/sh\nexit 0\n");
        run_hook(
            "plugin-processing-x",
            "on_enable",
            "ok.sh",
            dir.path(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn nonzero_exit_fails_the_hook() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "bad.sh", "#!/bin/sh\necho boom >&2\nexit 3\n");
        let err = run_hook(
            "plugin-processing-x",
            "on_enable",
            "bad.sh",
            dir.path(),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PluginError::HookFailed { ref reason, .. } if reason.contains("boom")));
    }

    #[tokio::test]
    async fn hook_timeout_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "slow.sh", "#!/bin/sh\nsleep 30\n");
        let err = run_hook(
            "plugin-processing-x",
            "on_enable",
            "slow.sh",
            dir.path(),
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PluginError::HookFailed { ref reason, .. } if reason.contains("timed out")));
    }

    #[tokio::test]
    async fn missing_script_fails_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_hook(
            "plugin-processing-x",
            "on_load",
            "ghost.sh",
            dir.path(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PluginError::HookFailed { .. }));
    }
}
