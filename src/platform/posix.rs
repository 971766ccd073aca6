use super::{OutputMode, PlatformStrategy};
use async_trait::async_trait;
use tokio::process::Child;

/// Unix-like hosts: live pipes, orphans found by their listening socket.
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixStrategy;

#[async_trait]
impl PlatformStrategy for PosixStrategy {
    fn name(&self) -> &'static str {
        "posix"
    }

    fn output_mode(&self) -> OutputMode {
        OutputMode::Pipes
    }

    #[cfg(unix)]
    fn request_stop(&self, child: &mut Child) -> std::io::Result<()> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = child.id() else {
            // already reaped
            return Ok(());
        };
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(std::io::Error::from)
    }

    #[cfg(not(unix))]
    fn request_stop(&self, child: &mut Child) -> std::io::Result<()> {
        child.start_kill()
    }

    async fn find_on_port(&self, port: u16) -> Result<Vec<u32>, String> {
        tokio::task::spawn_blocking(move || -> Result<Vec<u32>, String> {
            let listeners = listeners::get_all().map_err(|e| e.to_string())?;
            let mut pids: Vec<u32> = listeners
                .into_iter()
                .filter(|l| l.protocol == listeners::Protocol::TCP && l.socket.port() == port)
                .map(|l| l.process.pid)
                .collect();
            pids.sort_unstable();
            pids.dedup();
            Ok(pids)
        })
        .await
        .map_err(|e| e.to_string())?
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_request_stop_sends_sigterm() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        PosixStrategy.request_stop(&mut child).unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(status.signal(), Some(nix::libc::SIGTERM));
    }

    #[tokio::test]
    async fn test_find_on_port_sees_listener() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let pids = PosixStrategy.find_on_port(port).await.unwrap();
        assert_eq!(pids, vec![std::process::id()]);

        drop(listener);
        assert!(PosixStrategy.find_on_port(port).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_request_stop_after_exit_is_ok() {
        let mut child = tokio::process::Command::new("true").spawn().unwrap();
        child.wait().await.unwrap();
        assert!(PosixStrategy.request_stop(&mut child).is_ok());
    }
}
