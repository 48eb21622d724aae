// External tool resolver and runner for ffmpeg/convert/rclone/exiftool/icloudpd
//
// Resolution order:
// 1) Environment variable override (MEDIAFLOW_FFMPEG_PATH, etc.)
// 2) Binary next to the executable (or in its bin/ subdirectory)
// 3) PATH fallback

use std::env;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::constants::STAGE_POLL_INTERVAL_MS;

/// Get the directory containing the current executable
fn exe_dir() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
}

/// Resolve an external tool path.
fn resolve_tool(env_key: &str, default_name: &str) -> PathBuf {
    if let Ok(v) = env::var(env_key) {
        let p = PathBuf::from(&v);
        if p.exists() {
            return p;
        }
    }

    let mut filename = default_name.to_string();
    if cfg!(windows) && !filename.to_lowercase().ends_with(".exe") {
        filename.push_str(".exe");
    }

    if let Some(dir) = exe_dir() {
        let candidate = dir.join(&filename);
        if candidate.exists() {
            return candidate;
        }

        let bin_candidate = dir.join("bin").join(&filename);
        if bin_candidate.exists() {
            return bin_candidate;
        }
    }

    PathBuf::from(default_name)
}

pub fn ffmpeg_path() -> PathBuf {
    resolve_tool("MEDIAFLOW_FFMPEG_PATH", "ffmpeg")
}

/// ImageMagick
pub fn convert_path() -> PathBuf {
    resolve_tool("MEDIAFLOW_CONVERT_PATH", "convert")
}

pub fn rclone_path() -> PathBuf {
    resolve_tool("MEDIAFLOW_RCLONE_PATH", "rclone")
}

pub fn exiftool_path() -> PathBuf {
    resolve_tool("MEDIAFLOW_EXIFTOOL_PATH", "exiftool")
}

pub fn icloudpd_path() -> PathBuf {
    resolve_tool("MEDIAFLOW_ICLOUDPD_PATH", "icloudpd")
}

/// Check if a tool is available at the resolved path
pub fn is_tool_available(tool: &str) -> bool {
    let (path, version_arg) = match tool {
        "ffmpeg" => (ffmpeg_path(), "-version"),
        "convert" => (convert_path(), "-version"),
        "rclone" => (rclone_path(), "version"),
        "exiftool" => (exiftool_path(), "-ver"),
        "icloudpd" => (icloudpd_path(), "--version"),
        _ => return false,
    };

    if path.is_absolute() && path.exists() {
        return true;
    }

    Command::new(&path)
        .arg(version_arg)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// One external prerequisite and whether it was found.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Prerequisite {
    pub name: &'static str,
    pub command: &'static str,
    pub installed: bool,
    pub path: String,
    pub help_text: &'static str,
}

const PREREQUISITES: [(&str, &str, &str); 5] = [
    ("rclone", "rclone", "Install rclone, then run 'rclone config' to add the cloud remote."),
    ("ffmpeg", "ffmpeg", "Install ffmpeg from your package manager."),
    ("ImageMagick (convert)", "convert", "Install imagemagick from your package manager."),
    ("ExifTool", "exiftool", "Install exiftool (libimage-exiftool-perl on Debian)."),
    ("iCloudPD", "icloudpd", "Run 'pip install icloudpd'."),
];

/// Report every external tool the pipeline can use.
pub fn check_tools() -> Vec<Prerequisite> {
    PREREQUISITES
        .iter()
        .map(|(name, command, help_text)| {
            let path = match *command {
                "ffmpeg" => ffmpeg_path(),
                "convert" => convert_path(),
                "rclone" => rclone_path(),
                "exiftool" => exiftool_path(),
                _ => icloudpd_path(),
            };
            Prerequisite {
                name,
                command,
                installed: is_tool_available(command),
                path: path.to_string_lossy().to_string(),
                help_text,
            }
        })
        .collect()
}

/// Captured result of a finished external command.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stderr: String,
}

/// Why a command did not produce a `ToolOutput`.
#[derive(Debug)]
pub enum ToolError {
    Spawn(std::io::Error),
    Wait(std::io::Error),
    TimedOut(Duration),
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolError::Spawn(e) => write!(f, "failed to start: {}", e),
            ToolError::Wait(e) => write!(f, "process error: {}", e),
            ToolError::TimedOut(d) => write!(f, "timed out after {}s", d.as_secs()),
        }
    }
}

/// Run a command to completion, killing it if `timeout` elapses first.
/// Stdout is discarded; stderr is captured for error messages.
pub fn run_with_timeout(cmd: &mut Command, timeout: Option<Duration>) -> Result<ToolOutput, ToolError> {
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(ToolError::Spawn)?;

    // Drain stderr on its own thread so a chatty tool cannot fill the pipe and stall.
    let stderr_reader = child.stderr.take().map(|mut stderr| {
        std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf);
            buf
        })
    });

    let status = match timeout {
        None => child.wait().map_err(ToolError::Wait)?,
        Some(limit) => {
            let started = Instant::now();
            loop {
                if let Some(status) = child.try_wait().map_err(ToolError::Wait)? {
                    break status;
                }
                if started.elapsed() >= limit {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ToolError::TimedOut(limit));
                }
                std::thread::sleep(Duration::from_millis(STAGE_POLL_INTERVAL_MS));
            }
        }
    };

    let stderr = stderr_reader
        .and_then(|h| h.join().ok())
        .unwrap_or_default();

    Ok(ToolOutput { status, stderr })
}

/// Last non-empty stderr line, for compact error logs.
pub fn last_stderr_line(stderr: &str) -> &str {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_tool_fallback() {
        let path = resolve_tool("MEDIAFLOW_TEST_NONEXISTENT", "testcmd");
        assert_eq!(path, PathBuf::from("testcmd"));
    }

    #[test]
    fn test_env_override() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let temp_file = temp_dir.path().join("mediaflow_test_tool");
        std::fs::write(&temp_file, "test").unwrap();

        std::env::set_var("MEDIAFLOW_TEST_TOOL", temp_file.to_str().unwrap());
        let path = resolve_tool("MEDIAFLOW_TEST_TOOL", "default");
        assert_eq!(path, temp_file);

        std::env::remove_var("MEDIAFLOW_TEST_TOOL");
    }

    #[test]
    fn test_unknown_tool_is_unavailable() {
        assert!(!is_tool_available("definitely-not-a-tool"));
    }

    #[test]
    fn test_check_tools_lists_all_prerequisites() {
        let tools = check_tools();
        let commands: Vec<&str> = tools.iter().map(|t| t.command).collect();
        assert_eq!(commands, vec!["rclone", "ffmpeg", "convert", "exiftool", "icloudpd"]);
    }

    #[test]
    fn test_last_stderr_line() {
        assert_eq!(last_stderr_line("warn\nerror: boom\n\n"), "error: boom");
        assert_eq!(last_stderr_line(""), "");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_timeout_kills_slow_command() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let result = run_with_timeout(&mut cmd, Some(Duration::from_millis(300)));
        assert!(matches!(result, Err(ToolError::TimedOut(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_timeout_captures_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo oops >&2; exit 3"]);
        let output = run_with_timeout(&mut cmd, None).unwrap();
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(last_stderr_line(&output.stderr), "oops");
    }
}
