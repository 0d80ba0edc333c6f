use std::time::Duration;

use rusqlite::Connection;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::schedule::fmt_ts;

pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Outcome of one account-creation call against the directory boundary.
/// Only `Unavailable` is worth retrying; rejections are final.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("username already exists: {0}")]
    AlreadyExists(String),
    #[error("account rejected: {0}")]
    Rejected(String),
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

impl DirectoryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DirectoryError::Unavailable(_))
    }
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub grade_level: Option<String>,
    pub parent_email: Option<String>,
    pub class_ids: Vec<String>,
    pub initial_password: Option<String>,
}

/// Account-creation boundary. The shipped implementation writes to the
/// workspace roster; tests substitute mocks.
pub trait Directory {
    fn create_account(&mut self, account: &NewAccount) -> Result<String, DirectoryError>;
}

#[derive(Debug, Clone)]
pub struct RosterRow {
    pub line_no: usize,
    pub account: NewAccount,
}

#[derive(Debug, Clone)]
pub struct RowWarning {
    pub line: usize,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ParsedRoster {
    pub rows: Vec<RosterRow>,
    pub warnings: Vec<RowWarning>,
    pub rows_total: usize,
}

fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' {
            if in_quotes && i + 1 < chars.len() && chars[i + 1] == '"' {
                buf.push('"');
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if ch == ',' && !in_quotes {
            out.push(buf);
            buf = String::new();
            i += 1;
            continue;
        }
        buf.push(ch);
        i += 1;
    }
    out.push(buf);
    out
}

fn header_index(headers: &[String], names: &[&str]) -> Option<usize> {
    headers.iter().position(|h| {
        let h = h.trim().to_ascii_lowercase().replace('_', "");
        names.iter().any(|n| h == *n)
    })
}

fn split_class_ids(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn opt_field(fields: &[String], idx: Option<usize>) -> Option<String> {
    idx.and_then(|i| fields.get(i))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Flat tabular roster format. First line is the header; recognized
/// columns are username/email, displayName, role, gradeLevel,
/// parentEmail, classIds, password. Bad rows are reported and skipped.
pub fn parse_roster_csv(text: &str) -> ParsedRoster {
    let mut parsed = ParsedRoster::default();

    let mut lines = text.lines().enumerate();
    let headers: Vec<String> = loop {
        match lines.next() {
            Some((_, raw)) if raw.trim().is_empty() => continue,
            Some((_, raw)) => break parse_csv_record(raw.trim()),
            None => return parsed,
        }
    };
    let username_idx = header_index(&headers, &["username", "email"]);
    let display_idx = header_index(&headers, &["displayname"]);
    let role_idx = header_index(&headers, &["role"]);
    let grade_idx = header_index(&headers, &["gradelevel"]);
    let parent_idx = header_index(&headers, &["parentemail"]);
    let class_idx = header_index(&headers, &["classids"]);
    let password_idx = header_index(&headers, &["password"]);

    let Some(username_idx) = username_idx else {
        parsed.warnings.push(RowWarning {
            line: 1,
            code: "bad_header",
            message: "header must include a username or email column".to_string(),
        });
        return parsed;
    };

    for (line_no, raw_line) in lines {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        parsed.rows_total += 1;
        let fields = parse_csv_record(line);
        let username = match opt_field(&fields, Some(username_idx)) {
            Some(v) => v,
            None => {
                parsed.warnings.push(RowWarning {
                    line: line_no + 1,
                    code: "missing_username",
                    message: "username must not be empty".to_string(),
                });
                continue;
            }
        };
        // Display name falls back to the local part of an email-style
        // username.
        let display_name = opt_field(&fields, display_idx)
            .unwrap_or_else(|| username.split('@').next().unwrap_or(&username).to_string());
        let account = NewAccount {
            username,
            display_name,
            role: opt_field(&fields, role_idx).unwrap_or_else(|| "student".to_string()),
            grade_level: opt_field(&fields, grade_idx),
            parent_email: opt_field(&fields, parent_idx),
            class_ids: opt_field(&fields, class_idx)
                .map(|raw| split_class_ids(&raw))
                .unwrap_or_default(),
            initial_password: opt_field(&fields, password_idx),
        };
        parsed.rows.push(RosterRow {
            line_no: line_no + 1,
            account,
        });
    }

    parsed
}

/// JSON variant: an array of objects with the same field names as the
/// CSV header.
pub fn parse_roster_json(text: &str) -> ParsedRoster {
    let mut parsed = ParsedRoster::default();
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            parsed.warnings.push(RowWarning {
                line: 0,
                code: "bad_json",
                message: e.to_string(),
            });
            return parsed;
        }
    };
    let Some(items) = value.as_array() else {
        parsed.warnings.push(RowWarning {
            line: 0,
            code: "bad_json",
            message: "expected a JSON array of account objects".to_string(),
        });
        return parsed;
    };

    for (idx, item) in items.iter().enumerate() {
        parsed.rows_total += 1;
        let Some(obj) = item.as_object() else {
            parsed.warnings.push(RowWarning {
                line: idx + 1,
                code: "bad_row",
                message: "array element is not an object".to_string(),
            });
            continue;
        };
        let str_field = |keys: &[&str]| -> Option<String> {
            keys.iter()
                .find_map(|k| obj.get(*k))
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let Some(username) = str_field(&["username", "email"]) else {
            parsed.warnings.push(RowWarning {
                line: idx + 1,
                code: "missing_username",
                message: "username must not be empty".to_string(),
            });
            continue;
        };
        let class_ids = match obj.get("classIds") {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect(),
            Some(serde_json::Value::String(raw)) => split_class_ids(raw),
            _ => Vec::new(),
        };
        let display_name = str_field(&["displayName"])
            .unwrap_or_else(|| username.split('@').next().unwrap_or(&username).to_string());
        parsed.rows.push(RosterRow {
            line_no: idx + 1,
            account: NewAccount {
                username,
                display_name,
                role: str_field(&["role"]).unwrap_or_else(|| "student".to_string()),
                grade_level: str_field(&["gradeLevel"]),
                parent_email: str_field(&["parentEmail"]),
                class_ids,
                initial_password: str_field(&["password"]),
            },
        });
    }

    parsed
}

#[derive(Debug, Clone)]
pub struct ImportPolicy {
    pub batch_size: usize,
    pub max_attempts: u32,
    /// Base backoff; attempt N sleeps N * retry_delay before retrying.
    pub retry_delay: Duration,
    pub batch_delay: Duration,
}

impl Default for ImportPolicy {
    fn default() -> Self {
        ImportPolicy {
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(250),
            batch_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RowOutcome {
    pub line: usize,
    pub username: String,
    pub user_id: Option<String>,
    pub attempts: u32,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub batches: usize,
    pub created: usize,
    pub failed: usize,
    pub outcomes: Vec<RowOutcome>,
}

/// Sequential batch loop. Each row independently succeeds or fails;
/// failures never abort the batch. Retries apply only to transient
/// directory errors, with linearly increasing backoff.
pub fn run_import(
    directory: &mut dyn Directory,
    rows: &[RosterRow],
    policy: &ImportPolicy,
) -> ImportReport {
    let mut report = ImportReport::default();
    let batch_size = policy.batch_size.max(1);

    for (batch_idx, batch) in rows.chunks(batch_size).enumerate() {
        if batch_idx > 0 && !policy.batch_delay.is_zero() {
            std::thread::sleep(policy.batch_delay);
        }
        report.batches += 1;
        tracing::debug!(batch = batch_idx + 1, rows = batch.len(), "import batch");

        for row in batch {
            let mut attempts = 0u32;
            let result = loop {
                attempts += 1;
                match directory.create_account(&row.account) {
                    Ok(id) => break Ok(id),
                    Err(e) if e.is_retryable() && attempts < policy.max_attempts => {
                        if !policy.retry_delay.is_zero() {
                            std::thread::sleep(policy.retry_delay * attempts);
                        }
                    }
                    Err(e) => break Err(e),
                }
            };
            match result {
                Ok(id) => {
                    report.created += 1;
                    report.outcomes.push(RowOutcome {
                        line: row.line_no,
                        username: row.account.username.clone(),
                        user_id: Some(id),
                        attempts,
                        error: None,
                    });
                }
                Err(e) => {
                    report.failed += 1;
                    report.outcomes.push(RowOutcome {
                        line: row.line_no,
                        username: row.account.username.clone(),
                        user_id: None,
                        attempts,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
    }

    report
}

pub fn hash_password(password: &str) -> String {
    Sha256::digest(password.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Roster-backed directory: accounts land in the workspace `users`
/// table, with duplicate usernames surfacing through the UNIQUE
/// constraint.
pub struct SqliteDirectory<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteDirectory<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        SqliteDirectory { conn }
    }
}

impl Directory for SqliteDirectory<'_> {
    fn create_account(&mut self, account: &NewAccount) -> Result<String, DirectoryError> {
        if account.username.trim().is_empty() {
            return Err(DirectoryError::Rejected(
                "username must not be empty".to_string(),
            ));
        }
        let user_id = Uuid::new_v4().to_string();
        let class_ids = serde_json::to_string(&account.class_ids)
            .map_err(|e| DirectoryError::Rejected(e.to_string()))?;
        let password_hash = account.initial_password.as_deref().map(hash_password);
        let now = fmt_ts(chrono::Utc::now());

        let inserted = self.conn.execute(
            "INSERT INTO users(id, username, display_name, role, grade_level, parent_email,
                               class_ids, password_hash, active, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
            (
                &user_id,
                &account.username,
                &account.display_name,
                &account.role,
                &account.grade_level,
                &account.parent_email,
                &class_ids,
                &password_hash,
                &now,
            ),
        );
        match inserted {
            Ok(_) => Ok(user_id),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(DirectoryError::AlreadyExists(account.username.clone()))
            }
            Err(e) => Err(DirectoryError::Unavailable(e.to_string())),
        }
    }
}
