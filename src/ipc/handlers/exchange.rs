use crate::ics::export_calendar;
use crate::import::{
    parse_roster_csv, parse_roster_json, run_import, ImportPolicy, ParsedRoster, RowWarning,
    SqliteDirectory,
};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule::visible_events;
use rusqlite::OptionalExtension;
use serde_json::json;
use std::path::Path;
use std::time::Duration;

fn get_required_str(
    req: &Request,
    key: &str,
) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn handle_export_ics(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user_id = match get_required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out_path = match get_required_str(req, "outPath") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let events = match visible_events(conn, &user_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let text = export_calendar(&events);

    let out = Path::new(&out_path);
    if let Some(parent) = out.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            );
        }
    }
    if let Err(e) = std::fs::write(out, text) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": out_path })),
        );
    }

    ok(
        &req.id,
        json!({ "ok": true, "eventsExported": events.len(), "path": out_path }),
    )
}

fn read_roster_input(req: &Request) -> Result<(String, ParsedRoster), serde_json::Value> {
    let in_path = get_required_str(req, "inPath")?;
    let format = req
        .params
        .get("format")
        .and_then(|v| v.as_str())
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_else(|| {
            if in_path.to_ascii_lowercase().ends_with(".json") {
                "json".to_string()
            } else {
                "csv".to_string()
            }
        });
    let text = match std::fs::read_to_string(&in_path) {
        Ok(t) => t,
        Err(e) => {
            return Err(err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": in_path })),
            ))
        }
    };
    let parsed = match format.as_str() {
        "csv" => parse_roster_csv(&text),
        "json" => parse_roster_json(&text),
        other => {
            return Err(err(
                &req.id,
                "bad_params",
                format!("unknown format: {}", other),
                None,
            ))
        }
    };
    Ok((in_path, parsed))
}

fn warning_json(w: &RowWarning) -> serde_json::Value {
    json!({ "line": w.line, "code": w.code, "message": w.message })
}

fn handle_preview_roster(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (in_path, parsed) = match read_roster_input(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut warnings: Vec<_> = parsed.warnings.iter().map(warning_json).collect();
    let mut ready = 0usize;
    let mut duplicates = 0usize;
    let mut preview_rows = Vec::new();
    for row in &parsed.rows {
        let taken = conn
            .query_row(
                "SELECT 1 FROM users WHERE username = ?",
                [&row.account.username],
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .ok()
            .flatten()
            .is_some();
        let status = if taken {
            duplicates += 1;
            warnings.push(json!({
                "line": row.line_no,
                "code": "duplicate_username",
                "message": "username already exists in the roster"
            }));
            "duplicate_username"
        } else {
            ready += 1;
            "ready"
        };
        if preview_rows.len() < 250 {
            preview_rows.push(json!({
                "line": row.line_no,
                "username": row.account.username,
                "displayName": row.account.display_name,
                "role": row.account.role,
                "status": status
            }));
        }
    }

    ok(
        &req.id,
        json!({
            "ok": true,
            "path": in_path,
            "rowsTotal": parsed.rows_total,
            "rowsParsed": parsed.rows.len(),
            "rowsReady": ready,
            "rowsDuplicate": duplicates,
            "warningsCount": warnings.len(),
            "warnings": warnings,
            "previewRows": preview_rows
        }),
    )
}

fn handle_apply_roster(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (in_path, parsed) = match read_roster_input(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let defaults = ImportPolicy::default();
    let policy = ImportPolicy {
        batch_size: req
            .params
            .get("batchSize")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(defaults.batch_size),
        max_attempts: req
            .params
            .get("maxAttempts")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(defaults.max_attempts),
        retry_delay: req
            .params
            .get("retryDelayMs")
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_delay),
        batch_delay: req
            .params
            .get("batchDelayMs")
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis)
            .unwrap_or(defaults.batch_delay),
    };

    tracing::info!(
        path = %in_path,
        rows = parsed.rows.len(),
        batch_size = policy.batch_size,
        "roster import"
    );
    let mut directory = SqliteDirectory::new(conn);
    let report = run_import(&mut directory, &parsed.rows, &policy);

    let outcomes: Vec<_> = report
        .outcomes
        .iter()
        .map(|o| {
            json!({
                "line": o.line,
                "username": o.username,
                "userId": o.user_id,
                "attempts": o.attempts,
                "error": o.error
            })
        })
        .collect();
    let warnings: Vec<_> = parsed.warnings.iter().map(warning_json).collect();

    ok(
        &req.id,
        json!({
            "ok": true,
            "path": in_path,
            "rowsTotal": parsed.rows_total,
            "rowsParsed": parsed.rows.len(),
            "batches": report.batches,
            "created": report.created,
            "failed": report.failed,
            "warningsCount": warnings.len(),
            "warnings": warnings,
            "outcomes": outcomes
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exchange.exportIcs" => Some(handle_export_ics(state, req)),
        "exchange.previewRoster" => Some(handle_preview_roster(state, req)),
        "exchange.applyRoster" => Some(handle_apply_roster(state, req)),
        _ => None,
    }
}
