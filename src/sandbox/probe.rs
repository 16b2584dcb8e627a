//! External process probes used to verify sandbox binaries

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use crate::core::{PolicyError, PolicyResult};

/// Result of running a probe command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProbeOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ProbeOutput {
    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Locates and runs external binaries
#[async_trait]
pub trait CommandProbe: Send + Sync {
    /// Find `binary` on the executable search path
    fn resolve(&self, binary: &str) -> Option<PathBuf>;

    /// Run `program args...`, killing it after `limit`
    async fn run(&self, program: &Path, args: &[&str], limit: Duration) -> PolicyResult<ProbeOutput>;
}

/// Probe backed by the real `PATH` and `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

#[async_trait]
impl CommandProbe for SystemProbe {
    fn resolve(&self, binary: &str) -> Option<PathBuf> {
        if binary.contains(std::path::MAIN_SEPARATOR) {
            let path = PathBuf::from(binary);
            return path.is_file().then_some(path);
        }

        let path_var = std::env::var_os("PATH")?;
        std::env::split_paths(&path_var)
            .map(|dir| dir.join(binary))
            .find(|candidate| candidate.is_file())
    }

    async fn run(&self, program: &Path, args: &[&str], limit: Duration) -> PolicyResult<ProbeOutput> {
        tracing::debug!("[SystemProbe] Running {} {:?}", program.display(), args);

        let output_future = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match timeout(limit, output_future).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(PolicyError::sandbox(format!(
                    "failed to run {}: {}",
                    program.display(),
                    e
                )))
            }
            Err(_) => {
                return Err(PolicyError::sandbox(format!(
                    "{} did not respond within {:?}",
                    program.display(),
                    limit
                )))
            }
        };

        Ok(ProbeOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_missing_binary() {
        assert!(SystemProbe.resolve("definitely-not-a-real-binary-7f3a").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tool");
        std::fs::write(&file, "").unwrap();

        assert_eq!(SystemProbe.resolve(file.to_str().unwrap()), Some(file.clone()));
        assert!(SystemProbe.resolve(dir.path().join("nope").to_str().unwrap()).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_output() {
        let sh = SystemProbe.resolve("sh").expect("sh on PATH");
        let output = SystemProbe
            .run(&sh, &["-c", "echo runsc version 1"], Duration::from_secs(5))
            .await
            .unwrap();

        assert!(output.success);
        assert!(output.combined().contains("runsc"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_is_bounded() {
        let sh = SystemProbe.resolve("sh").expect("sh on PATH");
        let err = SystemProbe
            .run(&sh, &["-c", "sleep 5"], Duration::from_millis(50))
            .await
            .unwrap_err();

        assert!(matches!(err, PolicyError::Sandbox(_)));
    }
}
