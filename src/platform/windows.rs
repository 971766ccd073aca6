use super::{OutputMode, PlatformStrategy};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Windows hosts: temp-file output, orphans found through PowerShell.
///
/// Pipes are avoided because a child that fills an undrained pipe blocks, and
/// there is no cheap non-blocking peek on an anonymous pipe handle.
#[derive(Debug, Clone)]
pub struct WindowsStrategy {
    /// Command-line substring identifying composer processes
    marker: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProcessEntry {
    #[serde(rename = "ProcessId")]
    pub pid: u32,
    #[serde(rename = "CommandLine", default)]
    pub command_line: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(ProcessEntry),
    Many(Vec<ProcessEntry>),
}

impl WindowsStrategy {
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.to_string(),
        }
    }

    fn query_script(&self, port: u16) -> String {
        let marker = self.marker.replace('\'', "''");
        format!(
            "Get-CimInstance Win32_Process | \
             Where-Object {{ $_.CommandLine -like '*{marker}*' -and $_.CommandLine -like '*{port}*' }} | \
             Select-Object ProcessId,CommandLine | ConvertTo-Json -Compress"
        )
    }
}

/// Parses `ConvertTo-Json` output, which is a bare object for one match and an
/// array for several.
pub fn parse_process_list(json: &str) -> Result<Vec<ProcessEntry>, serde_json::Error> {
    let json = json.trim();
    if json.is_empty() {
        return Ok(vec![]);
    }
    Ok(match serde_json::from_str::<OneOrMany>(json)? {
        OneOrMany::One(entry) => vec![entry],
        OneOrMany::Many(entries) => entries,
    })
}

/// Entries whose command line names both `marker` and `port`, minus tracked pids.
pub fn select_orphans(
    entries: &[ProcessEntry],
    marker: &str,
    port: u16,
    tracked: &HashSet<u32>,
) -> Vec<u32> {
    let port = port.to_string();
    entries
        .iter()
        .filter(|e| !tracked.contains(&e.pid))
        .filter(|e| {
            e.command_line
                .as_deref()
                .is_some_and(|cmd| cmd.contains(marker) && cmd.contains(&port))
        })
        .map(|e| e.pid)
        .collect()
}

#[async_trait]
impl PlatformStrategy for WindowsStrategy {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn output_mode(&self) -> OutputMode {
        OutputMode::TempFiles
    }

    fn request_stop(&self, child: &mut Child) -> std::io::Result<()> {
        // TerminateProcess is the only stop available without a console
        child.start_kill()
    }

    async fn find_on_port(&self, port: u16) -> Result<Vec<u32>, String> {
        let output = Command::new("powershell")
            .args(["-NoProfile", "-NonInteractive", "-Command"])
            .arg(self.query_script(port))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("failed to run powershell: {e}"))?;
        if !output.status.success() {
            return Err(format!(
                "powershell exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let entries = parse_process_list(&stdout).map_err(|e| e.to_string())?;
        trace!("powershell matched {} process(es) on port {port}", entries.len());
        Ok(select_orphans(&entries, &self.marker, port, &HashSet::new()))
    }
}
