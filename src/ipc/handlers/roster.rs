use crate::import::{hash_password, Directory, DirectoryError, NewAccount, SqliteDirectory};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule::fmt_ts;
use rusqlite::{Connection, OptionalExtension};
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

fn user_exists(conn: &Connection, user_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM users WHERE id = ?", [user_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn user_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let class_ids_raw: String = row.get(6)?;
    let class_ids: Vec<String> = serde_json::from_str(&class_ids_raw).unwrap_or_default();
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "username": row.get::<_, String>(1)?,
        "displayName": row.get::<_, String>(2)?,
        "role": row.get::<_, String>(3)?,
        "gradeLevel": row.get::<_, Option<String>>(4)?,
        "parentEmail": row.get::<_, Option<String>>(5)?,
        "classIds": class_ids,
        "active": row.get::<_, i64>(7)? != 0,
        "createdAt": row.get::<_, String>(8)?,
        "updatedAt": row.get::<_, Option<String>>(9)?,
    }))
}

const USER_COLUMNS: &str = "id, username, display_name, role, grade_level, parent_email, \
     class_ids, active, created_at, updated_at";

fn handle_roster_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "users": [] }));
    };

    let sql = format!("SELECT {} FROM users ORDER BY username", USER_COLUMNS);
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], user_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_roster_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let username = match get_required_str(&req.params, "username") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let display_name = get_opt_str(&req.params, "displayName")
        .unwrap_or_else(|| username.split('@').next().unwrap_or(&username).to_string());
    let account = NewAccount {
        username,
        display_name,
        role: get_opt_str(&req.params, "role").unwrap_or_else(|| "student".to_string()),
        grade_level: get_opt_str(&req.params, "gradeLevel"),
        parent_email: get_opt_str(&req.params, "parentEmail"),
        class_ids: get_str_list(&req.params, "classIds").unwrap_or_default(),
        initial_password: get_opt_str(&req.params, "password"),
    };

    // Single creates go through the same directory boundary the bulk
    // importer uses.
    let mut directory = SqliteDirectory::new(conn);
    match directory.create_account(&account) {
        Ok(user_id) => ok(
            &req.id,
            json!({ "userId": user_id, "username": account.username }),
        ),
        Err(DirectoryError::AlreadyExists(u)) => err(
            &req.id,
            "already_exists",
            format!("username already exists: {}", u),
            None,
        ),
        Err(DirectoryError::Rejected(m)) => err(&req.id, "bad_params", m, None),
        Err(DirectoryError::Unavailable(m)) => err(&req.id, "db_insert_failed", m, None),
    }
}

fn handle_roster_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user_id = match get_required_str(&req.params, "userId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match user_exists(conn, &user_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "user not found", None),
        Err(e) => return e.response(&req.id),
    }

    let patch = req.params.get("patch").cloned().unwrap_or(json!({}));
    let mut updated = 0usize;

    if let Some(v) = get_opt_str(&patch, "displayName") {
        if let Err(e) = conn.execute(
            "UPDATE users SET display_name = ? WHERE id = ?",
            (&v, &user_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
        updated += 1;
    }
    if patch.get("gradeLevel").is_some() {
        let v = get_opt_str(&patch, "gradeLevel");
        if let Err(e) = conn.execute(
            "UPDATE users SET grade_level = ? WHERE id = ?",
            (&v, &user_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
        updated += 1;
    }
    if patch.get("parentEmail").is_some() {
        let v = get_opt_str(&patch, "parentEmail");
        if let Err(e) = conn.execute(
            "UPDATE users SET parent_email = ? WHERE id = ?",
            (&v, &user_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
        updated += 1;
    }
    if let Some(class_ids) = get_str_list(&patch, "classIds") {
        let raw = serde_json::to_string(&class_ids).unwrap_or_else(|_| "[]".to_string());
        if let Err(e) = conn.execute(
            "UPDATE users SET class_ids = ? WHERE id = ?",
            (&raw, &user_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
        updated += 1;
    }
    if let Some(active) = patch.get("active").and_then(|v| v.as_bool()) {
        if let Err(e) = conn.execute(
            "UPDATE users SET active = ? WHERE id = ?",
            (active as i64, &user_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
        updated += 1;
    }

    if updated > 0 {
        let now = fmt_ts(chrono::Utc::now());
        if let Err(e) = conn.execute(
            "UPDATE users SET updated_at = ? WHERE id = ?",
            (&now, &user_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "userId": user_id, "updatedFields": updated }))
}

fn handle_roster_set_role(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user_id = match get_required_str(&req.params, "userId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let role = match get_required_str(&req.params, "role") {
        Ok(v) => v.to_ascii_lowercase(),
        Err(e) => return e.response(&req.id),
    };
    if !matches!(role.as_str(), "student" | "teacher" | "admin") {
        return err(
            &req.id,
            "bad_params",
            "role must be student, teacher or admin",
            None,
        );
    }
    match user_exists(conn, &user_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "user not found", None),
        Err(e) => return e.response(&req.id),
    }

    let now = fmt_ts(chrono::Utc::now());
    if let Err(e) = conn.execute(
        "UPDATE users SET role = ?, updated_at = ? WHERE id = ?",
        (&role, &now, &user_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "userId": user_id, "role": role }))
}

fn handle_roster_reset_password(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user_id = match get_required_str(&req.params, "userId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let password = match get_required_str(&req.params, "password") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match user_exists(conn, &user_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "user not found", None),
        Err(e) => return e.response(&req.id),
    }

    let now = fmt_ts(chrono::Utc::now());
    if let Err(e) = conn.execute(
        "UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?",
        (hash_password(&password), &now, &user_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "userId": user_id }))
}

fn handle_roster_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user_id = match get_required_str(&req.params, "userId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match user_exists(conn, &user_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "user not found", None),
        Err(e) => return e.response(&req.id),
    }

    if let Err(e) = conn.execute("DELETE FROM users WHERE id = ?", [&user_id]) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "userId": user_id, "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.list" => Some(handle_roster_list(state, req)),
        "roster.create" => Some(handle_roster_create(state, req)),
        "roster.update" => Some(handle_roster_update(state, req)),
        "roster.setRole" => Some(handle_roster_set_role(state, req)),
        "roster.resetPassword" => Some(handle_roster_reset_password(state, req)),
        "roster.delete" => Some(handle_roster_delete(state, req)),
        _ => None,
    }
}
