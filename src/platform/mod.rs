//! OS-specific behaviour behind one interface.
//!
//! Two things differ between platforms: how child output is captured (live
//! pipes vs. temp files) and how orphaned composer processes left behind by a
//! previous run are found. Both strategies compile everywhere so their pure
//! parts can be tested on any host; [`native`] picks the one to use.

mod posix;
mod windows;

pub use posix::PosixStrategy;
pub use windows::WindowsStrategy;

use crate::procs::PROCS;
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::time;

/// How a child's stdout/stderr are captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumIs)]
#[strum(serialize_all = "snake_case")]
pub enum OutputMode {
    /// Anonymous pipes, readable while the child runs.
    Pipes,
    /// Private temp files, only read once the child is gone.
    TempFiles,
}

#[async_trait]
pub trait PlatformStrategy: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn output_mode(&self) -> OutputMode;

    /// Asks the child to exit. Escalation to a hard kill is the caller's job.
    fn request_stop(&self, child: &mut Child) -> std::io::Result<()>;

    /// Pids of processes that look like composer instances serving `port`.
    async fn find_on_port(&self, port: u16) -> Result<Vec<u32>, String>;

    /// Force-kills untracked processes serving `port`.
    ///
    /// Returns whether anything was killed. Any failure, including running
    /// past `timeout`, counts as nothing reaped.
    async fn reap_on_port(&self, port: u16, tracked: &HashSet<u32>, timeout: Duration) -> bool {
        match time::timeout(timeout, self.reap(port, tracked)).await {
            Ok(Ok(killed)) => killed,
            Ok(Err(e)) => {
                debug!("orphan reaper ({}) failed on port {port}: {e}", self.name());
                false
            }
            Err(_) => {
                warn!("orphan reaper timed out after {timeout:?} on port {port}");
                false
            }
        }
    }

    async fn reap(&self, port: u16, tracked: &HashSet<u32>) -> Result<bool, String> {
        let own_pid = std::process::id();
        let mut killed = false;
        for pid in self.find_on_port(port).await? {
            if pid == own_pid || tracked.contains(&pid) {
                trace!("not reaping tracked pid {pid} on port {port}");
                continue;
            }
            info!("killing orphaned composer process {pid} on port {port}");
            match PROCS.kill_async(pid).await {
                Ok(true) => killed = true,
                Ok(false) => debug!("orphan {pid} exited before it could be killed"),
                Err(e) => warn!("failed to kill orphan {pid}: {e}"),
            }
        }
        Ok(killed)
    }
}

/// The strategy for the platform we are running on.
pub fn native(marker: &str) -> Arc<dyn PlatformStrategy> {
    if cfg!(windows) {
        Arc::new(WindowsStrategy::new(marker))
    } else {
        Arc::new(PosixStrategy)
    }
}
