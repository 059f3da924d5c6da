/*!
Scripted lpstat stand-in

Each server/queue pair follows a script of probe outcomes; the last step
repeats forever. Unscripted queues answer "idle, no jobs".
*/

use async_trait::async_trait;
use franklin_monitor::error::QueryError;
use franklin_monitor::probe::PRINTER_UNREACHABLE;
use franklin_monitor::query::QueueQuery;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStep {
    Jobs(usize),
    Unreachable,
    /// lpstat itself fails (connection refused, non-zero exit).
    Fail,
}

/// Status and job queries keep separate cursors, so the order in which a
/// probe issues them does not matter.
#[derive(Default)]
struct QueueScript {
    steps: Vec<ScriptStep>,
    status_calls: usize,
    job_calls: usize,
}

impl QueueScript {
    fn step_at(&self, call: usize) -> ScriptStep {
        match self.steps.len() {
            0 => ScriptStep::Jobs(0),
            n => self.steps[call.min(n - 1)],
        }
    }
}

#[derive(Default)]
pub struct ScriptedQuery {
    scripts: Mutex<HashMap<(String, String), QueueScript>>,
}

impl ScriptedQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, server: &str, queue: &str, steps: impl IntoIterator<Item = ScriptStep>) -> &Self {
        self.scripts.lock().unwrap().insert(
            (server.to_string(), queue.to_string()),
            QueueScript {
                steps: steps.into_iter().collect(),
                ..Default::default()
            },
        );
        self
    }

    /// Number of completed probes (status + jobs pairs) against a queue.
    pub fn probe_count(&self, server: &str, queue: &str) -> usize {
        self.scripts
            .lock()
            .unwrap()
            .get(&(server.to_string(), queue.to_string()))
            .map(|s| s.job_calls)
            .unwrap_or(0)
    }

    fn failure(server: &str, queue: &str) -> QueryError {
        QueryError::Status {
            command: format!("lpstat -h {server} -p {queue}"),
            code: Some(1),
            stderr: "lpstat: Unable to connect to server: Connection refused".to_string(),
        }
    }
}

#[async_trait]
impl QueueQuery for ScriptedQuery {
    async fn printer_status(&self, server: &str, queue: &str) -> Result<Vec<String>, QueryError> {
        let step = {
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.entry((server.to_string(), queue.to_string())).or_default();
            let step = script.step_at(script.status_calls);
            script.status_calls += 1;
            step
        };
        match step {
            ScriptStep::Unreachable => Ok(vec![
                format!("printer {queue} is idle.  enabled since Mon 01 Jan 2024"),
                format!("\t{PRINTER_UNREACHABLE}"),
            ]),
            ScriptStep::Fail => Err(Self::failure(server, queue)),
            ScriptStep::Jobs(0) => Ok(vec![format!("printer {queue} is idle.  enabled since Mon 01 Jan 2024")]),
            ScriptStep::Jobs(_) => Ok(vec![format!("printer {queue} now printing {queue}-1.")]),
        }
    }

    async fn queue_jobs(&self, server: &str, queue: &str) -> Result<Vec<String>, QueryError> {
        let step = {
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.entry((server.to_string(), queue.to_string())).or_default();
            let step = script.step_at(script.job_calls);
            script.job_calls += 1;
            step
        };
        match step {
            ScriptStep::Fail => Err(Self::failure(server, queue)),
            ScriptStep::Jobs(n) => Ok((1..=n).map(|i| format!("{queue}-{i} alice 1024 Mon 01 Jan 2024")).collect()),
            ScriptStep::Unreachable => Ok(vec![]),
        }
    }
}
