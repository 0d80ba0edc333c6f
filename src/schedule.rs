use chrono::{DateTime, Datelike, Duration, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;

/// Events saved without an explicit end occupy a fixed one-hour slot
/// for overlap comparisons and for export.
pub const DEFAULT_SLOT_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Class,
    Assignment,
    Meeting,
    Exam,
    Personal,
    School,
    Other,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Class => "class",
            EventType::Assignment => "assignment",
            EventType::Meeting => "meeting",
            EventType::Exam => "exam",
            EventType::Personal => "personal",
            EventType::School => "school",
            EventType::Other => "other",
        }
    }

    /// Unknown values fall through to `Other` rather than failing the row.
    pub fn parse(s: &str) -> EventType {
        match s.trim().to_ascii_lowercase().as_str() {
            "class" => EventType::Class,
            "assignment" => EventType::Assignment,
            "meeting" => EventType::Meeting,
            "exam" => EventType::Exam,
            "personal" => EventType::Personal,
            "school" => EventType::School,
            _ => EventType::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    None,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Custom,
}

impl Recurrence {
    pub fn as_str(self) -> &'static str {
        match self {
            Recurrence::None => "none",
            Recurrence::Daily => "daily",
            Recurrence::Weekly => "weekly",
            Recurrence::Monthly => "monthly",
            Recurrence::Yearly => "yearly",
            Recurrence::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Recurrence {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Recurrence::Daily,
            "weekly" => Recurrence::Weekly,
            "monthly" => Recurrence::Monthly,
            "yearly" => Recurrence::Yearly,
            "custom" => Recurrence::Custom,
            _ => Recurrence::None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub event_type: EventType,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub location: Option<String>,
    pub created_by: String,
    pub creator_name: String,
    pub class_id: Option<String>,
    pub assignment_id: Option<String>,
    pub participant_ids: Vec<String>,
    pub participant_emails: Vec<String>,
    pub color: String,
    pub recurrence: Recurrence,
    pub recurrence_end: Option<DateTime<Utc>>,
    pub has_reminder: bool,
    pub reminder_minutes: i64,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub active: bool,
}

/// Timestamps are stored as RFC 3339 UTC with second precision
/// (`2026-09-01T10:00:00Z`). Uniform formatting keeps the TEXT column
/// orderable with plain string comparison.
pub fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn effective_end(ev: &CalendarEvent) -> DateTime<Utc> {
    ev.end_time
        .unwrap_or(ev.start_time + Duration::minutes(DEFAULT_SLOT_MINUTES))
}

/// Half-open interval overlap: [a_start, a_end) vs [b_start, b_end).
pub fn overlaps(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// Every event in `events` whose occupied slot overlaps [start, end).
pub fn conflicts_with<'a>(
    events: &'a [CalendarEvent],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<&'a CalendarEvent> {
    events
        .iter()
        .filter(|ev| overlaps(ev.start_time, effective_end(ev), start, end))
        .collect()
}

/// Events whose start falls within [start, end], both bounds inclusive.
pub fn filter_in_range<'a>(
    events: &'a [CalendarEvent],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<&'a CalendarEvent> {
    events
        .iter()
        .filter(|ev| ev.start_time >= start && ev.start_time <= end)
        .collect()
}

/// UI-facing repeat description, e.g. "Weekly on Monday".
pub fn recurrence_description(rec: Recurrence, start: DateTime<Utc>) -> String {
    match rec {
        Recurrence::None => "Does not repeat".to_string(),
        Recurrence::Daily => "Daily".to_string(),
        Recurrence::Weekly => format!("Weekly on {}", start.format("%A")),
        Recurrence::Monthly => format!("Monthly on day {}", start.day()),
        Recurrence::Yearly => format!("Yearly on {}", start.format("%b %-d")),
        Recurrence::Custom => "Custom".to_string(),
    }
}

/// iCalendar RRULE frequency token. `Custom` has no token of its own;
/// the export path substitutes DAILY.
pub fn rrule_frequency(rec: Recurrence) -> Option<&'static str> {
    match rec {
        Recurrence::None | Recurrence::Custom => None,
        Recurrence::Daily => Some("DAILY"),
        Recurrence::Weekly => Some("WEEKLY"),
        Recurrence::Monthly => Some("MONTHLY"),
        Recurrence::Yearly => Some("YEARLY"),
    }
}

/// Wire shape shared by every handler that returns events. The repeat
/// description rides along so the UI never re-derives it.
pub fn event_json(ev: &CalendarEvent) -> Value {
    serde_json::json!({
        "id": ev.id,
        "title": ev.title,
        "description": ev.description,
        "type": ev.event_type.as_str(),
        "startTime": fmt_ts(ev.start_time),
        "endTime": ev.end_time.map(fmt_ts),
        "allDay": ev.all_day,
        "location": ev.location,
        "createdBy": ev.created_by,
        "creatorName": ev.creator_name,
        "classId": ev.class_id,
        "assignmentId": ev.assignment_id,
        "participantIds": ev.participant_ids,
        "participantEmails": ev.participant_emails,
        "color": ev.color,
        "recurrence": ev.recurrence.as_str(),
        "recurrenceDescription": recurrence_description(ev.recurrence, ev.start_time),
        "recurrenceEnd": ev.recurrence_end.map(fmt_ts),
        "hasReminder": ev.has_reminder,
        "reminderMinutes": ev.reminder_minutes,
        "metadata": ev.metadata,
        "createdAt": fmt_ts(ev.created_at),
        "updatedAt": ev.updated_at.map(fmt_ts),
        "active": ev.active,
    })
}

const EVENT_COLUMNS: &str = "id, title, description, event_type, start_time, end_time, all_day, \
     location, created_by, creator_name, class_id, assignment_id, participant_ids, \
     participant_emails, color, recurrence, recurrence_end, has_reminder, reminder_minutes, \
     metadata, created_at, updated_at, active";

fn parse_id_list(raw: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(raw).unwrap_or_default()
}

fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CalendarEvent> {
    let start_raw: String = row.get(4)?;
    let end_raw: Option<String> = row.get(5)?;
    let ids_raw: String = row.get(12)?;
    let emails_raw: String = row.get(13)?;
    let rec_raw: String = row.get(15)?;
    let rec_end_raw: Option<String> = row.get(16)?;
    let metadata_raw: Option<String> = row.get(19)?;
    let created_raw: String = row.get(20)?;
    let updated_raw: Option<String> = row.get(21)?;
    let type_raw: String = row.get(3)?;

    Ok(CalendarEvent {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        event_type: EventType::parse(&type_raw),
        start_time: parse_ts(&start_raw).unwrap_or_default(),
        end_time: end_raw.as_deref().and_then(parse_ts),
        all_day: row.get::<_, i64>(6)? != 0,
        location: row.get(7)?,
        created_by: row.get(8)?,
        creator_name: row.get(9)?,
        class_id: row.get(10)?,
        assignment_id: row.get(11)?,
        participant_ids: parse_id_list(&ids_raw),
        participant_emails: parse_id_list(&emails_raw),
        color: row.get(14)?,
        recurrence: Recurrence::parse(&rec_raw),
        recurrence_end: rec_end_raw.as_deref().and_then(parse_ts),
        has_reminder: row.get::<_, i64>(17)? != 0,
        reminder_minutes: row.get(18)?,
        metadata: metadata_raw
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or(Value::Null),
        created_at: parse_ts(&created_raw).unwrap_or_default(),
        updated_at: updated_raw.as_deref().and_then(parse_ts),
        active: row.get::<_, i64>(22)? != 0,
    })
}

pub fn load_event(conn: &Connection, event_id: &str) -> rusqlite::Result<Option<CalendarEvent>> {
    conn.query_row(
        &format!("SELECT {} FROM events WHERE id = ?", EVENT_COLUMNS),
        [event_id],
        event_from_row,
    )
    .optional()
}

// An event is visible to its creator and to every listed participant.
const VISIBLE_PREDICATE: &str = "(created_by = ?1 OR EXISTS (
         SELECT 1 FROM json_each(events.participant_ids) WHERE json_each.value = ?1
       ))";

/// All active events visible to `user_id`, ordered by start.
pub fn visible_events(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<CalendarEvent>> {
    let sql = format!(
        "SELECT {} FROM events WHERE active = 1 AND {} ORDER BY start_time",
        EVENT_COLUMNS, VISIBLE_PREDICATE
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([user_id], event_from_row)?;
    rows.collect()
}

/// Candidate fetch for conflict checks. Only the upper bound is pushed
/// into the store; the caller re-checks the opposite bound in memory.
pub fn visible_events_starting_before(
    conn: &Connection,
    user_id: &str,
    bound: DateTime<Utc>,
) -> rusqlite::Result<Vec<CalendarEvent>> {
    let sql = format!(
        "SELECT {} FROM events
         WHERE active = 1 AND start_time < ?2 AND {}
         ORDER BY start_time",
        EVENT_COLUMNS, VISIBLE_PREDICATE
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map((user_id, fmt_ts(bound)), event_from_row)?;
    rows.collect()
}

/// Candidate fetch for range queries. Only the lower bound is pushed
/// into the store; the caller filters the upper bound in memory.
pub fn visible_events_starting_at_or_after(
    conn: &Connection,
    user_id: &str,
    bound: DateTime<Utc>,
) -> rusqlite::Result<Vec<CalendarEvent>> {
    let sql = format!(
        "SELECT {} FROM events
         WHERE active = 1 AND start_time >= ?2 AND {}
         ORDER BY start_time",
        EVENT_COLUMNS, VISIBLE_PREDICATE
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map((user_id, fmt_ts(bound)), event_from_row)?;
    rows.collect()
}
