//! Run summaries reconstructed from log events.
//!
//! Runs are never stored. A run is the set of `run_event` logs sharing a
//! `body.runId`; action, model and evaluator logs carrying the same run id
//! contribute to its counters. Grouping spans heterogeneous rows, so paging
//! happens here after grouping rather than in SQL.

use std::collections::HashMap;

use serde_json::Value;
use uuid::Uuid;

use crate::schema::log::RUN_EVENT;
use crate::types::{Log, Metadata, RunCounts, RunStatus, RunSummary, RunSummaryPage};

/// Log type for executed actions
pub const ACTION_LOG: &str = "action";
/// Log type for evaluator invocations
pub const EVALUATOR_LOG: &str = "evaluator";
/// Prefix of model call log types (`useModel:TEXT_LARGE` etc.)
pub const MODEL_LOG_PREFIX: &str = "useModel:";

/// Filters and paging for run summaries
#[derive(Clone, Debug, Default)]
pub struct RunQuery {
    /// Only runs in this room
    pub room_id: Option<Uuid>,
    /// Only runs with this derived status
    pub status: Option<RunStatus>,
    /// Only runs started at or after (ms)
    pub from: Option<i64>,
    /// Only runs started at or before (ms)
    pub to: Option<i64>,
    /// Page size
    pub limit: Option<usize>,
    /// Runs to skip
    pub offset: usize,
}

/// Run id carried in a log body
pub fn run_id_of(body: &Value) -> Option<&str> {
    body.get("runId").and_then(Value::as_str)
}

fn uuid_field(body: &Value, key: &str) -> Option<Uuid> {
    body.get(key)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn time_field(body: &Value, key: &str) -> Option<i64> {
    body.get(key).and_then(Value::as_i64)
}

/// Whether an activity log of any type records a failure
fn reports_failure(body: &Value) -> bool {
    let unsuccessful = body
        .get("result")
        .and_then(|r| r.get("success"))
        .and_then(Value::as_bool)
        == Some(false);
    let has_error = body.get("error").is_some_and(|e| !e.is_null());
    unsuccessful || has_error
}

#[derive(Default)]
struct RunBuilder {
    started_at: Option<i64>,
    terminal: Option<(i64, RunStatus)>,
    message_id: Option<Uuid>,
    room_id: Option<Uuid>,
    entity_id: Option<Uuid>,
    metadata: Metadata,
    counts: RunCounts,
}

impl RunBuilder {
    fn apply_event(&mut self, log: &Log) {
        let body = &log.body;
        let Some(status) = body
            .get("status")
            .and_then(Value::as_str)
            .and_then(RunStatus::parse)
        else {
            return;
        };

        self.message_id = self.message_id.or_else(|| uuid_field(body, "messageId"));
        self.room_id = self
            .room_id
            .or_else(|| uuid_field(body, "roomId"))
            .or(log.room_id);
        self.entity_id = self.entity_id.or_else(|| uuid_field(body, "entityId"));

        if status.is_terminal() {
            let at = time_field(body, "endTime").unwrap_or(log.created_at);
            if self.terminal.map_or(true, |(latest, _)| at >= latest) {
                self.terminal = Some((at, status));
            }
        } else {
            let at = time_field(body, "startTime").unwrap_or(log.created_at);
            if self.started_at.map_or(true, |earliest| at < earliest) {
                self.started_at = Some(at);
                if let Some(Value::Object(metadata)) = body.get("metadata") {
                    self.metadata = metadata.clone();
                }
            }
        }
    }

    fn apply_activity(&mut self, log: &Log) {
        let kind = log.log_type.as_str();
        if kind == ACTION_LOG {
            self.counts.actions += 1;
        } else if kind == EVALUATOR_LOG {
            self.counts.evaluators += 1;
        } else if kind.starts_with(MODEL_LOG_PREFIX) {
            self.counts.model_calls += 1;
        }
        if reports_failure(&log.body) {
            self.counts.errors += 1;
        }
    }

    fn finish(self, run_id: String) -> RunSummary {
        let (ended_at, status) = match self.terminal {
            Some((at, status)) => (Some(at), status),
            None => (None, RunStatus::Started),
        };
        let duration_ms = match (self.started_at, ended_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        };
        RunSummary {
            run_id,
            status,
            started_at: self.started_at,
            ended_at,
            duration_ms,
            message_id: self.message_id,
            room_id: self.room_id,
            entity_id: self.entity_id,
            metadata: self.metadata,
            counts: self.counts,
        }
    }
}

/// Group `logs` into run summaries, filter, sort newest first and page.
///
/// Activity logs whose run id has no `run_event` row are ignored.
pub fn summarize_runs(logs: &[Log], query: &RunQuery) -> RunSummaryPage {
    let mut runs: HashMap<String, RunBuilder> = HashMap::new();

    for log in logs.iter().filter(|l| l.log_type == RUN_EVENT) {
        if let Some(run_id) = run_id_of(&log.body) {
            runs.entry(run_id.to_string()).or_default().apply_event(log);
        }
    }

    for log in logs.iter().filter(|l| l.log_type != RUN_EVENT) {
        if let Some(builder) = run_id_of(&log.body).and_then(|id| runs.get_mut(id)) {
            builder.apply_activity(log);
        }
    }

    let mut summaries: Vec<RunSummary> = runs
        .into_iter()
        .map(|(run_id, builder)| builder.finish(run_id))
        .filter(|run| query.status.map_or(true, |s| run.status == s))
        .filter(|run| query.room_id.map_or(true, |r| run.room_id == Some(r)))
        .filter(|run| match (query.from, run.started_at) {
            (Some(from), Some(at)) => at >= from,
            (Some(_), None) => false,
            (None, _) => true,
        })
        .filter(|run| match (query.to, run.started_at) {
            (Some(to), Some(at)) => at <= to,
            (Some(_), None) => false,
            (None, _) => true,
        })
        .collect();

    summaries.sort_by(|a, b| {
        let key = |r: &RunSummary| r.started_at.or(r.ended_at).unwrap_or(i64::MIN);
        key(b).cmp(&key(a)).then_with(|| a.run_id.cmp(&b.run_id))
    });

    let total = summaries.len();
    let page: Vec<RunSummary> = summaries
        .into_iter()
        .skip(query.offset)
        .take(query.limit.unwrap_or(usize::MAX))
        .collect();
    let has_more = query.offset + page.len() < total;

    RunSummaryPage {
        runs: page,
        total,
        has_more,
    }
}
