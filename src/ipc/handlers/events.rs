use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{
    event_json, fmt_ts, load_event, parse_ts, visible_events, CalendarEvent, EventType, Recurrence,
};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

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

fn get_opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn get_str_list(params: &serde_json::Value, key: &str) -> Option<Vec<String>> {
    params.get(key).and_then(|v| v.as_array()).map(|items| {
        items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.to_string())
            .collect()
    })
}

fn get_time(params: &serde_json::Value, key: &str) -> Result<Option<DateTime<Utc>>, HandlerErr> {
    let Some(raw) = params.get(key).and_then(|v| v.as_str()) else {
        return Ok(None);
    };
    match parse_ts(raw) {
        Some(dt) => Ok(Some(dt)),
        None => Err(HandlerErr {
            code: "bad_params",
            message: format!("{} must be an RFC 3339 timestamp", key),
            details: None,
        }),
    }
}

fn get_required_time(params: &serde_json::Value, key: &str) -> Result<DateTime<Utc>, HandlerErr> {
    get_time(params, key)?.ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: format!("missing {}", key),
        details: None,
    })
}

fn insert_event(conn: &Connection, ev: &CalendarEvent) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO events(id, title, description, event_type, start_time, end_time, all_day,
                            location, created_by, creator_name, class_id, assignment_id,
                            participant_ids, participant_emails, color, recurrence,
                            recurrence_end, has_reminder, reminder_minutes, metadata,
                            created_at, updated_at, active)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                ?18, ?19, ?20, ?21, ?22, ?23)",
        rusqlite::params![
            ev.id,
            ev.title,
            ev.description,
            ev.event_type.as_str(),
            fmt_ts(ev.start_time),
            ev.end_time.map(fmt_ts),
            ev.all_day as i64,
            ev.location,
            ev.created_by,
            ev.creator_name,
            ev.class_id,
            ev.assignment_id,
            serde_json::to_string(&ev.participant_ids).unwrap_or_else(|_| "[]".to_string()),
            serde_json::to_string(&ev.participant_emails).unwrap_or_else(|_| "[]".to_string()),
            ev.color,
            ev.recurrence.as_str(),
            ev.recurrence_end.map(fmt_ts),
            ev.has_reminder as i64,
            ev.reminder_minutes,
            if ev.metadata.is_null() {
                None
            } else {
                Some(ev.metadata.to_string())
            },
            fmt_ts(ev.created_at),
            ev.updated_at.map(fmt_ts),
            ev.active as i64,
        ],
    )?;
    Ok(())
}

fn handle_events_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let title = match get_required_str(&req.params, "title") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let start_time = match get_required_time(&req.params, "startTime") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let created_by = match get_required_str(&req.params, "createdBy") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let end_time = match get_time(&req.params, "endTime") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let recurrence_end = match get_time(&req.params, "recurrenceEnd") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    // End-before-start is stored as given; no interval validation is
    // applied here.

    let ev = CalendarEvent {
        id: Uuid::new_v4().to_string(),
        title,
        description: get_opt_str(&req.params, "description"),
        event_type: EventType::parse(
            req.params.get("type").and_then(|v| v.as_str()).unwrap_or(""),
        ),
        start_time,
        end_time,
        all_day: req
            .params
            .get("allDay")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        location: get_opt_str(&req.params, "location"),
        creator_name: get_opt_str(&req.params, "creatorName").unwrap_or_else(|| created_by.clone()),
        created_by,
        class_id: get_opt_str(&req.params, "classId"),
        assignment_id: get_opt_str(&req.params, "assignmentId"),
        participant_ids: get_str_list(&req.params, "participantIds").unwrap_or_default(),
        participant_emails: get_str_list(&req.params, "participantEmails").unwrap_or_default(),
        color: get_opt_str(&req.params, "color").unwrap_or_else(|| "#2196F3".to_string()),
        recurrence: Recurrence::parse(
            req.params
                .get("recurrence")
                .and_then(|v| v.as_str())
                .unwrap_or(""),
        ),
        recurrence_end,
        has_reminder: req
            .params
            .get("hasReminder")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        reminder_minutes: req
            .params
            .get("reminderMinutes")
            .and_then(|v| v.as_i64())
            .unwrap_or(15),
        metadata: req
            .params
            .get("metadata")
            .cloned()
            .unwrap_or(serde_json::Value::Null),
        created_at: Utc::now(),
        updated_at: None,
        active: true,
    };

    if let Err(e) = insert_event(conn, &ev) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "events" })),
        );
    }
    ok(&req.id, json!({ "event": event_json(&ev) }))
}

fn handle_events_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let event_id = match get_required_str(&req.params, "eventId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match load_event(conn, &event_id) {
        Ok(Some(ev)) => ok(&req.id, json!({ "event": event_json(&ev) })),
        Ok(None) => err(&req.id, "not_found", "event not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_events_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let event_id = match get_required_str(&req.params, "eventId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let mut ev = match load_event(conn, &event_id) {
        Ok(Some(ev)) => ev,
        Ok(None) => return err(&req.id, "not_found", "event not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let patch = req.params.get("patch").cloned().unwrap_or(json!({}));
    if let Some(v) = get_opt_str(&patch, "title") {
        ev.title = v;
    }
    if patch.get("description").is_some() {
        ev.description = get_opt_str(&patch, "description");
    }
    if let Some(v) = patch.get("type").and_then(|v| v.as_str()) {
        ev.event_type = EventType::parse(v);
    }
    match get_time(&patch, "startTime") {
        Ok(Some(v)) => ev.start_time = v,
        Ok(None) => {}
        Err(e) => return e.response(&req.id),
    }
    if patch.get("endTime").is_some() {
        // An explicit null clears the end time back to the default slot.
        match get_time(&patch, "endTime") {
            Ok(v) => ev.end_time = v,
            Err(e) => return e.response(&req.id),
        }
    }
    if let Some(v) = patch.get("allDay").and_then(|v| v.as_bool()) {
        ev.all_day = v;
    }
    if patch.get("location").is_some() {
        ev.location = get_opt_str(&patch, "location");
    }
    if let Some(v) = get_str_list(&patch, "participantIds") {
        ev.participant_ids = v;
    }
    if let Some(v) = get_str_list(&patch, "participantEmails") {
        ev.participant_emails = v;
    }
    if let Some(v) = get_opt_str(&patch, "color") {
        ev.color = v;
    }
    if let Some(v) = patch.get("recurrence").and_then(|v| v.as_str()) {
        ev.recurrence = Recurrence::parse(v);
    }
    if patch.get("recurrenceEnd").is_some() {
        match get_time(&patch, "recurrenceEnd") {
            Ok(v) => ev.recurrence_end = v,
            Err(e) => return e.response(&req.id),
        }
    }
    if let Some(v) = patch.get("hasReminder").and_then(|v| v.as_bool()) {
        ev.has_reminder = v;
    }
    if let Some(v) = patch.get("reminderMinutes").and_then(|v| v.as_i64()) {
        ev.reminder_minutes = v;
    }
    if let Some(v) = patch.get("metadata") {
        ev.metadata = v.clone();
    }
    if let Some(v) = patch.get("active").and_then(|v| v.as_bool()) {
        ev.active = v;
    }
    ev.updated_at = Some(Utc::now());

    let updated = conn.execute(
        "UPDATE events SET title = ?1, description = ?2, event_type = ?3, start_time = ?4,
                end_time = ?5, all_day = ?6, location = ?7, participant_ids = ?8,
                participant_emails = ?9, color = ?10, recurrence = ?11, recurrence_end = ?12,
                has_reminder = ?13, reminder_minutes = ?14, metadata = ?15, updated_at = ?16,
                active = ?17
         WHERE id = ?18",
        rusqlite::params![
            ev.title,
            ev.description,
            ev.event_type.as_str(),
            fmt_ts(ev.start_time),
            ev.end_time.map(fmt_ts),
            ev.all_day as i64,
            ev.location,
            serde_json::to_string(&ev.participant_ids).unwrap_or_else(|_| "[]".to_string()),
            serde_json::to_string(&ev.participant_emails).unwrap_or_else(|_| "[]".to_string()),
            ev.color,
            ev.recurrence.as_str(),
            ev.recurrence_end.map(fmt_ts),
            ev.has_reminder as i64,
            ev.reminder_minutes,
            if ev.metadata.is_null() {
                None
            } else {
                Some(ev.metadata.to_string())
            },
            ev.updated_at.map(fmt_ts),
            ev.active as i64,
            event_id,
        ],
    );
    if let Err(e) = updated {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "event": event_json(&ev) }))
}

fn handle_events_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let event_id = match get_required_str(&req.params, "eventId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match load_event(conn, &event_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "event not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // Hard delete; there is no soft-delete lifecycle for events.
    if let Err(e) = conn.execute("DELETE FROM events WHERE id = ?", [&event_id]) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "eventId": event_id, "deleted": true }))
}

fn handle_events_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "events": [] }));
    };
    let user_id = match get_required_str(&req.params, "userId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match visible_events(conn, &user_id) {
        Ok(events) => {
            let out: Vec<_> = events.iter().map(event_json).collect();
            ok(&req.id, json!({ "events": out }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "events.create" => Some(handle_events_create(state, req)),
        "events.get" => Some(handle_events_get(state, req)),
        "events.update" => Some(handle_events_update(state, req)),
        "events.delete" => Some(handle_events_delete(state, req)),
        "events.list" => Some(handle_events_list(state, req)),
        _ => None,
    }
}
