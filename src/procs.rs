use crate::Result;
use miette::IntoDiagnostic;
use once_cell::sync::Lazy;
use std::sync::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, UpdateKind};

/// Snapshot of the OS process table, used to find a child's descendants and
/// to force-kill processes that are not our direct children.
pub struct Procs {
    system: Mutex<sysinfo::System>,
}

pub static PROCS: Lazy<Procs> = Lazy::new(Procs::new);

impl Default for Procs {
    fn default() -> Self {
        Self::new()
    }
}

impl Procs {
    pub fn new() -> Self {
        let procs = Self {
            system: Mutex::new(sysinfo::System::new()),
        };
        procs.refresh_processes();
        procs
    }

    fn lock_system(&self) -> std::sync::MutexGuard<'_, sysinfo::System> {
        self.system.lock().unwrap_or_else(|poisoned| {
            warn!("System mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Zombies count as gone: they hold no resources we care about.
    pub fn is_running(&self, pid: u32) -> bool {
        self.lock_system()
            .process(Pid::from_u32(pid))
            .is_some_and(|p| p.status() != ProcessStatus::Zombie)
    }

    pub fn command_line(&self, pid: u32) -> Option<String> {
        self.lock_system().process(Pid::from_u32(pid)).map(|p| {
            p.cmd()
                .iter()
                .map(|arg| arg.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        })
    }

    /// Every descendant of `pid`, at any depth, as of the last refresh.
    pub fn all_children(&self, pid: u32) -> Vec<u32> {
        let system = self.lock_system();
        let root = Pid::from_u32(pid);
        let mut children = vec![];
        for (child_pid, process) in system.processes() {
            let mut process = process;
            while let Some(parent) = process.parent() {
                if parent == root {
                    children.push(child_pid.as_u32());
                    break;
                }
                match system.process(parent) {
                    Some(p) => process = p,
                    None => break,
                }
            }
        }
        children
    }

    /// Force-kills `pid` on a blocking worker. Returns false if it was already gone.
    pub async fn kill_async(&self, pid: u32) -> Result<bool> {
        tokio::task::spawn_blocking(move || PROCS.kill(pid))
            .await
            .into_diagnostic()
    }

    fn kill(&self, pid: u32) -> bool {
        self.refresh_pids(&[pid]);
        match self.lock_system().process(Pid::from_u32(pid)) {
            Some(process) => {
                debug!("force killing process {pid}");
                process.kill()
            }
            None => false,
        }
    }

    pub fn refresh_processes(&self) {
        self.lock_system().refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::OnlyIfNotSet),
        );
    }

    pub fn refresh_pids(&self, pids: &[u32]) {
        let pids: Vec<Pid> = pids.iter().copied().map(Pid::from_u32).collect();
        self.lock_system().refresh_processes_specifics(
            ProcessesToUpdate::Some(&pids),
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::OnlyIfNotSet),
        );
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_children_finds_background_jobs() {
        let mut parent = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("sleep 30 & sleep 30 & wait")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let pid = parent.id().unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let procs = Procs::new();
        let children = procs.all_children(pid);
        assert_eq!(children.len(), 2, "children: {children:?}");
        assert!(procs.command_line(children[0]).unwrap().contains("sleep"));

        for child in children {
            assert!(PROCS.kill_async(child).await.unwrap());
        }
        parent.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_kill_missing_pid_returns_false() {
        // pid_max on linux is at most 2^22
        assert!(!PROCS.kill_async(4_194_304 + 17).await.unwrap());
    }
}
