/*!

The process boundary. Every wrapper in this crate builds a [`Cmd`] and hands it to an injected
[`CommandRunner`], which makes it possible to test argument building and output parsing without
the external tools being installed.

!*/

use crate::error::{self, Result};
use async_trait::async_trait;
use log::{debug, trace};
use snafu::{ensure, ResultExt};
use std::fmt::{Debug, Display, Formatter};

/// An external command: a program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
}

impl Cmd {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }
}

impl Display for Cmd {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// The captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Converts a non-zero exit code into [`Error::CommandFailed`](crate::Error::CommandFailed).
    pub fn check(self, cmd: &Cmd) -> Result<CommandOutput> {
        ensure!(
            self.success(),
            error::CommandFailedSnafu {
                command: cmd.to_string(),
                code: self.code,
                stdout: self.stdout,
                stderr: self.stderr,
            }
        );
        Ok(self)
    }
}

/// Runs external commands to completion.
#[async_trait]
pub trait CommandRunner: Debug + Send + Sync {
    /// Run `cmd` and capture its output, whatever the exit code.
    async fn output(&self, cmd: &Cmd) -> Result<CommandOutput>;

    /// Run `cmd` and return its `stdout`, or an error if the exit code was not zero.
    async fn run(&self, cmd: &Cmd) -> Result<String> {
        Ok(self.output(cmd).await?.check(cmd)?.stdout)
    }
}

/// The [`CommandRunner`] that spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn output(&self, cmd: &Cmd) -> Result<CommandOutput> {
        debug!("Running '{}'", cmd);
        let output = tokio::process::Command::new(cmd.program())
            .args(cmd.get_args())
            .output()
            .await
            .context(error::SpawnSnafu {
                program: cmd.program(),
            })?;
        let output = CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        trace!(
            "'{}' exited with {}\nstdout:\n{}\nstderr:\n{}",
            cmd,
            output.code,
            output.stdout,
            output.stderr
        );
        Ok(output)
    }
}
