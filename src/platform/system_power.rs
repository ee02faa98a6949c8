use std::process::Command;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

/// Runs one shell command line and reports what happened.
pub type CommandRunner = Arc<dyn Fn(&str) -> Result<CommandOutput> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone)]
pub struct CommandExecution {
    pub label: &'static str,
    pub command: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

pub fn default_runner() -> CommandRunner {
    Arc::new(run_shell)
}

fn run_shell(command: &str) -> Result<CommandOutput> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .with_context(|| format!("failed to spawn shell for command: {command}"))?;

    Ok(CommandOutput {
        success: output.status.success(),
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Runs `command` to completion. Failures are logged and reported, never raised.
pub fn execute(runner: &CommandRunner, label: &'static str, command: &str) -> CommandExecution {
    info!(label, command, "running system command");
    let execution = match runner(command) {
        Ok(output) => CommandExecution {
            label,
            command: command.to_string(),
            success: output.success,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        },
        Err(err) => CommandExecution {
            label,
            command: command.to_string(),
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: format!("{err:#}"),
        },
    };

    if execution.success {
        info!(label, command, "system command finished");
    } else {
        let exit = execution
            .exit_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "signal".to_string());
        warn!(
            label,
            command,
            exit_code = exit,
            stderr = execution.stderr.trim(),
            "system command failed"
        );
    }
    execution
}
