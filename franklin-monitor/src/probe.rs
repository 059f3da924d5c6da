//! One status check against one queue

use crate::error::QueryError;
use crate::query::QueueQuery;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Printed by CUPS when a queue's printer cannot be contacted.
pub const PRINTER_UNREACHABLE: &str = "The printer is unreachable at this time.";

#[derive(Debug)]
pub enum ProbeResult {
    Reachable { job_count: usize },
    /// The server reported the printer unreachable.
    Unreachable,
    /// The query itself failed; says nothing about the printer.
    QueryFailed { cause: QueryError },
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeResult::Reachable { job_count } => write!(f, "reachable with {job_count} job(s)"),
            ProbeResult::Unreachable => f.write_str("unreachable"),
            ProbeResult::QueryFailed { cause } => write!(f, "query failed: {cause}"),
        }
    }
}

/// True when any line, trimmed, is exactly the unreachable sentinel.
pub fn reports_unreachable(lines: &[String]) -> bool {
    lines.iter().any(|line| {
        debug!("Checking {}", line.trim());
        line.trim() == PRINTER_UNREACHABLE
    })
}

/// Query printer status and job list for `queue` on `server`.
///
/// Both queries are issued every cycle.
pub async fn probe(query: &dyn QueueQuery, server: &str, queue: &str) -> ProbeResult {
    debug!("Checking {} on {}...", queue, server);
    let (status, jobs) = tokio::join!(query.printer_status(server, queue), query.queue_jobs(server, queue));

    let status = match status {
        Ok(lines) => lines,
        Err(cause) => return ProbeResult::QueryFailed { cause },
    };
    if reports_unreachable(&status) {
        warn!(server, queue, "Found '{}'", PRINTER_UNREACHABLE);
        return ProbeResult::Unreachable;
    }

    match jobs {
        Ok(lines) => {
            info!(server, queue, "Found {} jobs in queue", lines.len());
            ProbeResult::Reachable { job_count: lines.len() }
        }
        Err(cause) => ProbeResult::QueryFailed { cause },
    }
}

/// `probe`, bounded by `limit`; expiry counts as a failed query.
pub async fn probe_within(query: &dyn QueueQuery, server: &str, queue: &str, limit: Duration) -> ProbeResult {
    match tokio::time::timeout(limit, probe(query, server, queue)).await {
        Ok(result) => result,
        Err(_) => ProbeResult::QueryFailed {
            cause: QueryError::Timeout {
                server: server.to_string(),
                queue: queue.to_string(),
                secs: limit.as_secs(),
            },
        },
    }
}
