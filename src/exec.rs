//! External command execution
//!
//! Every collaborator that drives a host tool (`ip`, `ovs-vsctl`,
//! `iptables`) goes through a [`CommandRunner`] so the argument lists can be
//! checked without touching the host.

use crate::error::{Error, Result};
use std::process::Command;
use tracing::debug;

/// Captured result of a finished command
#[derive(Debug, Clone, Default)]
pub struct Output {
    /// Whether the command exited with status 0
    pub success: bool,
    pub stderr: String,
}

/// Runs a program with arguments and captures its output
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[String]) -> Result<Output>;
}

/// Runs commands on the host with `std::process::Command`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<Output> {
        debug!(program, args = %args.join(" "), "running command");

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::CommandFailed {
                command: program.to_string(),
                message: format!("failed to spawn: {}", e),
            })?;

        Ok(Output {
            success: output.status.success(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run a command and fail unless it exits successfully
pub fn run_checked(runner: &dyn CommandRunner, program: &str, args: &[String]) -> Result<Output> {
    let output = runner.run(program, args)?;

    if !output.success {
        return Err(Error::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            message: output.stderr.trim().to_string(),
        });
    }

    Ok(output)
}

