//! Optional post-step that enables root SSH login inside a new container.
//!
//! Runs `pct exec` on the hypervisor host, so it only works when the
//! provisioner itself runs on a Proxmox node.

use std::process::Stdio;

use tokio::process::Command;

use crate::error::ProvisionError;

const PERMIT_ROOT_LOGIN: &str = "echo 'PermitRootLogin yes' >> /etc/ssh/sshd_config";

/// Executes the root-SSH commands through `pct`.
#[derive(Debug, Clone)]
pub struct RootSshEnabler {
    program: String,
}

impl Default for RootSshEnabler {
    fn default() -> Self {
        Self {
            program: "pct".to_string(),
        }
    }
}

impl RootSshEnabler {
    /// Use a different executable in place of `pct`.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Append `PermitRootLogin yes` to sshd_config and restart sshd.
    pub async fn enable(&self, vmid: i64) -> Result<(), ProvisionError> {
        let vmid_arg = vmid.to_string();

        self.exec(vmid, &[&vmid_arg, "--", "sh", "-c", PERMIT_ROOT_LOGIN])
            .await?;
        self.exec(vmid, &[&vmid_arg, "--", "systemctl", "restart", "ssh"])
            .await?;

        tracing::info!(vmid, "Enabled root SSH login");
        Ok(())
    }

    async fn exec(&self, vmid: i64, args: &[&str]) -> Result<(), ProvisionError> {
        tracing::debug!(vmid, "Running {} exec {}", self.program, args.join(" "));

        let output = Command::new(&self.program)
            .arg("exec")
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProvisionError::PostStep {
                vmid,
                reason: format!("failed to spawn {}: {}", self.program, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProvisionError::PostStep {
                vmid,
                reason: format!("{} exited with {}: {}", self.program, output.status, stderr.trim()),
            });
        }

        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn succeeds_when_commands_succeed() {
        let enabler = RootSshEnabler::with_program("true");
        enabler.enable(100).await.unwrap();
    }

    #[tokio::test]
    async fn reports_failing_command() {
        let enabler = RootSshEnabler::with_program("false");
        let err = enabler.enable(100).await.unwrap_err();
        assert!(matches!(err, ProvisionError::PostStep { vmid: 100, .. }));
    }

    #[tokio::test]
    async fn reports_missing_program() {
        let enabler = RootSshEnabler::with_program("/nonexistent/pct");
        let err = enabler.enable(101).await.unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
