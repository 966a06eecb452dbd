//! Runs a task's resolved command and captures what it printed.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tracing::{debug, warn};
use treadle_types::ResolvedCommand;

const SHEBANG: &str = "#!/bin/sh\n";
const BUSY_RETRIES: u32 = 5;

/// Captured result of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Stdout followed by stderr, trailing whitespace removed.
    pub output: String,
    /// Set when the command could not start or exited unsuccessfully.
    pub error: Option<String>,
}

impl CommandOutput {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            error: Some(error.into()),
        }
    }
}

/// Executes inline commands directly and script bodies from a temp file.
pub struct CommandRunner {
    script_dir: PathBuf,
}

impl CommandRunner {
    pub fn new(script_dir: impl Into<PathBuf>) -> Self {
        Self {
            script_dir: script_dir.into(),
        }
    }

    /// Run `command` with `env` added to the inherited environment.
    ///
    /// Scripts are written to `<script_dir>/<script_name>.sh`, marked
    /// executable, run without arguments and removed afterwards. A body
    /// without a `#!` line is run by `/bin/sh`.
    pub async fn run(
        &self,
        command: ResolvedCommand<'_>,
        env: &[(String, String)],
        script_name: &str,
    ) -> CommandOutput {
        match command {
            ResolvedCommand::Inline(inline) => {
                let mut cmd = tokio::process::Command::new(&inline.command);
                cmd.args(&inline.args);
                execute(cmd, env).await
            }
            ResolvedCommand::Script(body) => {
                let path = self.script_dir.join(format!("{script_name}.sh"));
                if let Err(e) = write_script(&path, body).await {
                    return CommandOutput::failed(format!(
                        "failed to write script {}: {e}",
                        path.display()
                    ));
                }
                let output = execute(tokio::process::Command::new(&path), env).await;
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Failed to remove script file");
                }
                output
            }
        }
    }
}

async fn write_script(path: &Path, body: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let contents = if body.starts_with("#!") {
        body.to_string()
    } else {
        format!("{SHEBANG}{body}")
    };
    tokio::fs::write(path, contents).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    }
    Ok(())
}

async fn execute(mut cmd: tokio::process::Command, env: &[(String, String)]) -> CommandOutput {
    cmd.envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // A freshly written script can still be held open by a concurrent fork.
    let mut attempt = 0;
    let output = loop {
        match cmd.output().await {
            Err(e)
                if e.kind() == std::io::ErrorKind::ExecutableFileBusy && attempt < BUSY_RETRIES =>
            {
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(20 * u64::from(attempt))).await;
            }
            Err(e) => return CommandOutput::failed(format!("failed to start command: {e}")),
            Ok(output) => break output,
        }
    };

    let mut captured = String::from_utf8_lossy(&output.stdout).into_owned();
    captured.push_str(&String::from_utf8_lossy(&output.stderr));
    let captured = captured.trim_end().to_string();

    let error = (!output.status.success()).then(|| output.status.to_string());
    debug!(status = %output.status, bytes = captured.len(), "Command finished");
    CommandOutput {
        output: captured,
        error,
    }
}
