//! Bounded polling of asynchronous Proxmox tasks.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::ProvisioningConfig;
use crate::error::ProxmoxError;
use crate::proxmox::HypervisorApi;
use crate::proxmox::types::TaskStatus;

/// Polls a task until it stops, fails or runs out of time.
#[derive(Debug, Clone, Copy)]
pub struct TaskWaiter {
    poll_interval: Duration,
    timeout: Duration,
}

impl TaskWaiter {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    pub fn from_config(config: &ProvisioningConfig) -> Self {
        Self::new(config.poll_interval, config.task_timeout)
    }

    /// Wait for `upid` to reach `stopped`.
    ///
    /// Sleeps one interval before every poll, including the first. A status
    /// other than `running` or `stopped` fails immediately. Transport errors
    /// are returned as-is.
    pub async fn wait(&self, api: &dyn HypervisorApi, upid: &str) -> Result<(), ProxmoxError> {
        let started = Instant::now();
        let mut polls = 0u32;

        loop {
            tokio::time::sleep(self.poll_interval).await;
            polls += 1;

            match api.task_status(upid).await? {
                TaskStatus::Stopped { exit_status } => {
                    match exit_status.as_deref() {
                        Some("OK") | None => {
                            tracing::debug!("Task {} stopped after {} poll(s)", upid, polls)
                        }
                        Some(other) => tracing::warn!(
                            "Task {} stopped with exit status '{}'; treating as complete",
                            upid,
                            other
                        ),
                    }
                    return Ok(());
                }
                TaskStatus::Running => {
                    let waited = started.elapsed();
                    if waited >= self.timeout {
                        return Err(ProxmoxError::TaskTimeout {
                            upid: upid.to_string(),
                            waited,
                        });
                    }
                }
                TaskStatus::Other(status) => {
                    return Err(ProxmoxError::TaskFailed {
                        upid: upid.to_string(),
                        status,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::proxmox::CreateContainerRequest;

    /// Replays a fixed sequence of statuses, repeating the last one.
    struct ScriptedTask {
        statuses: Mutex<VecDeque<TaskStatus>>,
        polls: Mutex<u32>,
    }

    impl ScriptedTask {
        fn new(statuses: Vec<TaskStatus>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                polls: Mutex::new(0),
            }
        }

        fn polls(&self) -> u32 {
            *self.polls.lock().unwrap()
        }
    }

    #[async_trait]
    impl HypervisorApi for ScriptedTask {
        async fn create_container(
            &self,
            _request: &CreateContainerRequest,
        ) -> Result<String, ProxmoxError> {
            unreachable!("not used by the waiter")
        }

        async fn task_status(&self, _upid: &str) -> Result<TaskStatus, ProxmoxError> {
            *self.polls.lock().unwrap() += 1;
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.len() > 1 {
                Ok(statuses.pop_front().unwrap())
            } else {
                Ok(statuses.front().cloned().unwrap())
            }
        }
    }

    fn stopped() -> TaskStatus {
        TaskStatus::Stopped {
            exit_status: Some("OK".to_string()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_once_task_stops() {
        let api = ScriptedTask::new(vec![TaskStatus::Running, TaskStatus::Running, stopped()]);
        let waiter = TaskWaiter::new(Duration::from_secs(1), Duration::from_secs(60));

        let started = Instant::now();
        waiter.wait(&api, "UPID:pve:1").await.unwrap();

        assert_eq!(api.polls(), 3);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_status_fails() {
        let api = ScriptedTask::new(vec![TaskStatus::Other("error".to_string())]);
        let waiter = TaskWaiter::new(Duration::from_secs(1), Duration::from_secs(60));

        let err = waiter.wait(&api, "UPID:pve:2").await.unwrap_err();
        assert!(matches!(err, ProxmoxError::TaskFailed { ref status, .. } if status == "error"));
    }

    #[tokio::test(start_paused = true)]
    async fn never_finishing_task_times_out() {
        let api = ScriptedTask::new(vec![TaskStatus::Running]);
        let waiter = TaskWaiter::new(Duration::from_secs(1), Duration::from_secs(10));

        let err = waiter.wait(&api, "UPID:pve:3").await.unwrap_err();
        match err {
            ProxmoxError::TaskTimeout { waited, .. } => {
                assert!(waited >= Duration::from_secs(10));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(api.polls(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_with_error_exit_status_still_completes() {
        let api = ScriptedTask::new(vec![TaskStatus::Stopped {
            exit_status: Some("command 'lxc-start' failed".to_string()),
        }]);
        let waiter = TaskWaiter::new(Duration::from_millis(100), Duration::from_secs(5));

        assert!(waiter.wait(&api, "UPID:pve:4").await.is_ok());
    }
}
