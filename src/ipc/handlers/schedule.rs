use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{
    conflicts_with, event_json, filter_in_range, parse_ts, visible_events_starting_at_or_after,
    visible_events_starting_before, DEFAULT_SLOT_MINUTES,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn get_required_time(params: &serde_json::Value, key: &str) -> Result<DateTime<Utc>, HandlerErr> {
    let raw = get_required_str(params, key)?;
    parse_ts(&raw).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: format!("{} must be an RFC 3339 timestamp", key),
        details: None,
    })
}

fn handle_check_conflicts(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "conflicts": [], "hasConflict": false }));
    };
    let user_id = match get_required_str(&req.params, "userId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let start = match get_required_time(&req.params, "startTime") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    // A proposal without an end occupies the same default slot as a
    // stored open-ended event.
    let end = match req.params.get("endTime").and_then(|v| v.as_str()) {
        Some(raw) => match parse_ts(raw) {
            Some(v) => v,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "endTime must be an RFC 3339 timestamp",
                    None,
                )
            }
        },
        None => start + Duration::minutes(DEFAULT_SLOT_MINUTES),
    };
    let exclude_id = req
        .params
        .get("excludeEventId")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    // One inequality goes to the store; the opposite bound is part of
    // the in-memory overlap check.
    let candidates = match visible_events_starting_before(conn, &user_id, end) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let conflicts: Vec<_> = conflicts_with(&candidates, start, end)
        .into_iter()
        .filter(|ev| ev.id != exclude_id)
        .map(event_json)
        .collect();

    ok(
        &req.id,
        json!({ "hasConflict": !conflicts.is_empty(), "conflicts": conflicts }),
    )
}

fn handle_events_in_range(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "events": [] }));
    };
    let user_id = match get_required_str(&req.params, "userId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let start = match get_required_time(&req.params, "startTime") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let end = match get_required_time(&req.params, "endTime") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // The store applies the lower bound; the upper bound is filtered
    // here, both bounds inclusive.
    let candidates = match visible_events_starting_at_or_after(conn, &user_id, start) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let events: Vec<_> = filter_in_range(&candidates, start, end)
        .into_iter()
        .map(event_json)
        .collect();

    ok(&req.id, json!({ "events": events }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.checkConflicts" => Some(handle_check_conflicts(state, req)),
        "schedule.eventsInRange" => Some(handle_events_in_range(state, req)),
        _ => None,
    }
}
