//! CUPS status queries
//!
//! Wraps the `lpstat` client behind the `QueueQuery` trait:
//! - printer status (`lpstat -h <server> -p <queue>`)
//! - active jobs (`lpstat -h <server> -o <queue>`)
//! - non-zero exit treated as failure; the child is killed if the call is dropped

use crate::error::QueryError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Source of raw queue status lines for one server/queue pair.
#[async_trait]
pub trait QueueQuery: Send + Sync {
    /// Printer status lines, scanned for the unreachable sentinel.
    async fn printer_status(&self, server: &str, queue: &str) -> Result<Vec<String>, QueryError>;

    /// One line per active job.
    async fn queue_jobs(&self, server: &str, queue: &str) -> Result<Vec<String>, QueryError>;
}

/// `QueueQuery` backed by the CUPS `lpstat` binary.
#[derive(Debug, Clone)]
pub struct LpstatQuery {
    program: String,
}

impl Default for LpstatQuery {
    fn default() -> Self {
        Self {
            program: "lpstat".to_string(),
        }
    }
}

impl LpstatQuery {
    /// Use a different executable, e.g. a wrapper script.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<String>, QueryError> {
        let command = format!("{} {}", self.program, args.join(" "));
        debug!("Executing: {}", command);

        let output = AsyncCommand::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| QueryError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(QueryError::Status {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(split_lines(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl QueueQuery for LpstatQuery {
    async fn printer_status(&self, server: &str, queue: &str) -> Result<Vec<String>, QueryError> {
        self.run(&["-h", server, "-p", queue]).await
    }

    async fn queue_jobs(&self, server: &str, queue: &str) -> Result<Vec<String>, QueryError> {
        let jobs = self.run(&["-h", server, "-o", queue]).await?;
        debug!("print jobs: {:?}", jobs);
        Ok(jobs)
    }
}

fn split_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}
