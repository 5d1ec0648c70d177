use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::ValidationConfig;
use crate::error::{FinderError, Result};

/// One proposed file replacement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEdit {
    pub path: String,
    pub content: String,
}

/// Outcome of one validation command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub command: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Combined stdout and stderr, capped
    pub output: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub outcomes: Vec<CommandOutcome>,
}

impl ValidationReport {
    pub fn has_errors(&self) -> bool {
        self.outcomes.iter().any(|o| !o.success)
    }

    pub fn first_failure(&self) -> Option<&CommandOutcome> {
        self.outcomes.iter().find(|o| !o.success)
    }
}

/// Prior state of one swapped file
struct Backup {
    path: PathBuf,
    original: Option<Vec<u8>>,
}

/// Proposed content materialized on disk; the workspace is restored on drop.
pub struct WorkspaceSwap {
    backups: Vec<Backup>,
    created_dirs: Vec<PathBuf>,
    restored: bool,
}

impl WorkspaceSwap {
    /// Back up and overwrite every edited file. On a failed write the files
    /// already swapped are restored before the error is returned.
    pub fn apply(root: &Path, edits: &[FileEdit]) -> Result<Self> {
        let mut swap = Self {
            backups: Vec::new(),
            created_dirs: Vec::new(),
            restored: false,
        };

        for edit in edits {
            let path = resolve_inside(root, &edit.path)?;
            if !swap.backups.iter().any(|b| b.path == path) {
                let original = match std::fs::read(&path) {
                    Ok(bytes) => Some(bytes),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                    Err(e) => return Err(e.into()),
                };
                swap.backups.push(Backup {
                    path: path.clone(),
                    original,
                });
            }
            if let Some(parent) = path.parent() {
                swap.create_parents(parent)?;
            }
            std::fs::write(&path, &edit.content)?;
        }

        debug!("Swapped {} file(s) into the workspace", swap.backups.len());
        Ok(swap)
    }

    fn create_parents(&mut self, dir: &Path) -> Result<()> {
        let mut missing = Vec::new();
        let mut current = Some(dir);
        while let Some(d) = current {
            if d.exists() {
                break;
            }
            missing.push(d.to_path_buf());
            current = d.parent();
        }
        if missing.is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(dir)?;
        // deepest first, so removal can walk the list in order
        self.created_dirs.extend(missing);
        Ok(())
    }

    /// Put every touched file back the way it was
    pub fn restore(mut self) {
        self.restore_all();
    }

    fn restore_all(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;

        for backup in self.backups.iter().rev() {
            let result = match &backup.original {
                Some(bytes) => std::fs::write(&backup.path, bytes),
                None => match std::fs::remove_file(&backup.path) {
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    other => other,
                },
            };
            if let Err(e) = result {
                warn!("Failed to restore {}: {}", backup.path.display(), e);
            }
        }
        for dir in &self.created_dirs {
            // only empty directories; anything else was not ours alone
            let _ = std::fs::remove_dir(dir);
        }
    }
}

impl Drop for WorkspaceSwap {
    fn drop(&mut self) {
        self.restore_all();
    }
}

/// Join a workspace-relative path, refusing anything that leaves the root
pub fn resolve_inside(root: &Path, relative: &str) -> Result<PathBuf> {
    let normalized = relative.trim().replace('\\', "/");
    let candidate = Path::new(&normalized);
    if normalized.is_empty() || candidate.is_absolute() {
        return Err(FinderError::Validation(format!(
            "Path must be relative to the workspace: {}",
            relative
        )));
    }
    let mut clean = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => {
                return Err(FinderError::Validation(format!(
                    "Path escapes the workspace: {}",
                    relative
                )))
            }
        }
    }
    Ok(root.join(clean))
}

/// Temporarily applies edits, runs checks and restores the workspace
pub struct ValidationRunner {
    timeout: Duration,
    max_output_bytes: usize,
}

impl ValidationRunner {
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.command_timeout_secs),
            max_output_bytes: config.max_output_bytes,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validate `edits` by running `commands` against them on disk.
    ///
    /// Commands run in order and stop at the first failure. Whatever happens,
    /// every touched file is byte-identical to its prior state on return.
    pub async fn validate(
        &self,
        root: &Path,
        edits: &[FileEdit],
        commands: &[String],
    ) -> Result<ValidationReport> {
        let swap = WorkspaceSwap::apply(root, edits)?;

        let mut report = ValidationReport::default();
        for command in commands.iter().filter(|c| !c.trim().is_empty()) {
            let outcome = self.run_command(root, command).await;
            let failed = !outcome.success;
            if failed {
                info!("❌ Validation failed: {} ({}ms)", command, outcome.duration_ms);
            } else {
                info!("✅ Validation passed: {} ({}ms)", command, outcome.duration_ms);
            }
            report.outcomes.push(outcome);
            if failed {
                break;
            }
        }

        swap.restore();
        Ok(report)
    }

    async fn run_command(&self, root: &Path, command: &str) -> CommandOutcome {
        let started = Instant::now();
        let mut outcome = CommandOutcome {
            command: command.to_string(),
            success: false,
            exit_code: None,
            timed_out: false,
            output: String::new(),
            duration_ms: 0,
        };

        let child = shell(command)
            .current_dir(root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                outcome.output = format!("Failed to start command: {}", e);
                outcome.duration_ms = started.elapsed().as_millis() as u64;
                return outcome;
            }
        };

        // taken before waiting; tokio forgets the pid once the child is reaped
        let group = child.id();
        let limit = self.max_output_bytes;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let finished = tokio::time::timeout(self.timeout, async {
            tokio::join!(read_capped(stdout, limit), read_capped(stderr, limit), child.wait())
        })
        .await;

        // background jobs of the command must not outlive the swap
        kill_process_group(&mut child, group);

        match finished {
            Ok((Ok(stdout), Ok(stderr), Ok(status))) => {
                let mut combined = String::from_utf8_lossy(&stdout.bytes).into_owned();
                let stderr_text = String::from_utf8_lossy(&stderr.bytes);
                if !stderr_text.is_empty() {
                    if !combined.is_empty() && !combined.ends_with('\n') {
                        combined.push('\n');
                    }
                    combined.push_str(&stderr_text);
                }
                let truncated = stdout.truncated || stderr.truncated;
                outcome.output = if truncated && combined.len() <= limit {
                    format!("{}{}", combined, OUTPUT_TRUNCATED)
                } else {
                    cap_bytes(&combined, limit)
                };
                outcome.success = status.success();
                outcome.exit_code = status.code();
            }
            Ok((stdout, stderr, status)) => {
                let error = stdout.err().or(stderr.err()).or(status.err());
                outcome.output = match error {
                    Some(e) => format!("Command failed to run: {}", e),
                    None => "Command failed to run".to_string(),
                };
            }
            Err(_) => {
                outcome.timed_out = true;
                outcome.output = format!("Command timed out after {}s", self.timeout.as_secs_f32());
            }
        }

        outcome.duration_ms = started.elapsed().as_millis() as u64;
        outcome
    }
}

/// Output of one stream, at most the configured number of bytes
struct CapturedStream {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Drain `stream` to the end while keeping at most `limit` bytes in memory
async fn read_capped<R: AsyncRead + Unpin>(stream: Option<R>, limit: usize) -> std::io::Result<CapturedStream> {
    let mut captured = CapturedStream {
        bytes: Vec::new(),
        truncated: false,
    };
    let Some(mut stream) = stream else {
        return Ok(captured);
    };

    let mut chunk = [0u8; 8192];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(captured);
        }
        let room = limit.saturating_sub(captured.bytes.len());
        if n > room {
            captured.truncated = true;
        }
        captured.bytes.extend_from_slice(&chunk[..n.min(room)]);
    }
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    // own process group, so the whole tree can be killed at once
    cmd.arg("-c").arg(command).process_group(0);
    cmd
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child, group: Option<u32>) {
    if let Some(pgid) = group {
        // ESRCH just means every member already exited
        unsafe {
            let _ = libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
        }
    }
    let _ = child.start_kill();
}

#[cfg(windows)]
fn kill_process_group(child: &mut Child, _group: Option<u32>) {
    let _ = child.start_kill();
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

const OUTPUT_TRUNCATED: &str = "\n…[output truncated]";

/// Keep at most `limit` bytes, cut on a char boundary
pub fn cap_bytes(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &text[..end], OUTPUT_TRUNCATED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn edit(path: &str, content: &str) -> FileEdit {
        FileEdit {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    fn runner() -> ValidationRunner {
        ValidationRunner::new(&ValidationConfig::default())
    }

    #[test]
    fn test_resolve_inside_rejects_escapes() {
        let root = Path::new("/work");
        assert_eq!(resolve_inside(root, "./src/a.ts").unwrap(), PathBuf::from("/work/src/a.ts"));
        assert!(resolve_inside(root, "../etc/passwd").is_err());
        assert!(resolve_inside(root, "/etc/passwd").is_err());
        assert!(resolve_inside(root, "").is_err());
    }

    #[test]
    fn test_swap_restores_on_drop() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.ts"), "old").unwrap();
        {
            let _swap = WorkspaceSwap::apply(
                dir.path(),
                &[edit("a.ts", "new"), edit("nested/deep/b.ts", "fresh"), edit("a.ts", "newer")],
            )
            .unwrap();
            assert_eq!(std::fs::read_to_string(dir.path().join("a.ts")).unwrap(), "newer");
            assert!(dir.path().join("nested/deep/b.ts").exists());
        }
        assert_eq!(std::fs::read_to_string(dir.path().join("a.ts")).unwrap(), "old");
        assert!(!dir.path().join("nested").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_commands_see_proposed_content() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.ts"), "old").unwrap();

        let report = runner()
            .validate(
                dir.path(),
                &[edit("src/a.ts", "new")],
                &["test \"$(cat src/a.ts)\" = new".to_string()],
            )
            .await
            .unwrap();
        assert!(!report.has_errors());
        assert_eq!(std::fs::read_to_string(dir.path().join("src/a.ts")).unwrap(), "old");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_restores_and_stops() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.ts"), "old").unwrap();

        let report = runner()
            .validate(
                dir.path(),
                &[edit("a.ts", "broken"), edit("lib/new.ts", "x")],
                &[
                    "echo 'a.ts(1,1): error TS1005' >&2; exit 3".to_string(),
                    "touch ran-second".to_string(),
                ],
            )
            .await
            .unwrap();

        assert!(report.has_errors());
        assert_eq!(report.outcomes.len(), 1);
        let failure = report.first_failure().unwrap();
        assert_eq!(failure.exit_code, Some(3));
        assert!(failure.output.contains("error TS1005"));
        assert!(!dir.path().join("ran-second").exists());
        assert_eq!(std::fs::read_to_string(dir.path().join("a.ts")).unwrap(), "old");
        assert!(!dir.path().join("lib").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_and_missing_command() {
        let dir = TempDir::new().unwrap();
        let report = runner()
            .with_timeout(Duration::from_millis(200))
            .validate(dir.path(), &[edit("a.ts", "x")], &["sleep 5".to_string()])
            .await
            .unwrap();
        assert!(report.outcomes[0].timed_out);
        assert!(!dir.path().join("a.ts").exists());

        let report = runner()
            .validate(dir.path(), &[], &["definitely-not-a-real-command-xyz".to_string()])
            .await
            .unwrap();
        assert!(report.has_errors());
        assert_eq!(report.outcomes[0].exit_code, Some(127));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runaway_output_is_bounded() {
        let dir = TempDir::new().unwrap();
        let config = ValidationConfig {
            max_output_bytes: 1024,
            ..ValidationConfig::default()
        };
        let report = ValidationRunner::new(&config)
            .validate(dir.path(), &[], &["yes | head -c 10000000; echo done >&2".to_string()])
            .await
            .unwrap();

        let outcome = &report.outcomes[0];
        assert!(outcome.success, "{:?}", outcome.output);
        assert!(outcome.output.len() <= 1024 + OUTPUT_TRUNCATED.len());
        assert!(outcome.output.starts_with("y\ny\n"));
        assert!(outcome.output.ends_with("[output truncated]"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_background_jobs() {
        let dir = TempDir::new().unwrap();
        let report = runner()
            .with_timeout(Duration::from_millis(300))
            .validate(
                dir.path(),
                &[],
                &["(sleep 1; echo late > late.txt) & wait".to_string()],
            )
            .await
            .unwrap();
        assert!(report.outcomes[0].timed_out);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dir.path().join("late.txt").exists());
    }

    #[test]
    fn test_cap_bytes_respects_char_boundary() {
        let text = "ééééé";
        let capped = cap_bytes(text, 3);
        assert!(capped.starts_with('é'));
        assert!(capped.ends_with("[output truncated]"));
    }
}
