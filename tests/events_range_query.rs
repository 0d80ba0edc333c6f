mod test_support;

use serde_json::json;
use test_support::{request_ok, spawn_sidecar, temp_dir};

#[test]
fn range_query_is_inclusive_on_both_bounds() {
    let workspace = temp_dir("homeroom-range");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let starts = [
        ("Before", "2026-09-06T23:00:00Z"),
        ("AtLower", "2026-09-07T00:00:00Z"),
        ("Middle", "2026-09-07T12:00:00Z"),
        ("AtUpper", "2026-09-07T23:00:00Z"),
        ("After", "2026-09-08T08:00:00Z"),
    ];
    for (i, (title, start)) in starts.iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "events.create",
            json!({
                "title": title,
                "startTime": start,
                "createdBy": "teacher-1"
            }),
        );
    }

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "q1",
        "schedule.eventsInRange",
        json!({
            "userId": "teacher-1",
            "startTime": "2026-09-07T00:00:00Z",
            "endTime": "2026-09-07T23:00:00Z"
        }),
    );
    let events = result
        .get("events")
        .and_then(|v| v.as_array())
        .expect("events array");
    let titles: Vec<&str> = events
        .iter()
        .filter_map(|e| e.get("title").and_then(|v| v.as_str()))
        .collect();
    // Ordered by start; both range edges included.
    assert_eq!(titles, vec!["AtLower", "Middle", "AtUpper"]);

    // A range before any event start is empty.
    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "q2",
        "schedule.eventsInRange",
        json!({
            "userId": "teacher-1",
            "startTime": "2026-08-01T00:00:00Z",
            "endTime": "2026-08-31T23:59:59Z"
        }),
    );
    assert_eq!(
        empty.get("events").and_then(|v| v.as_array()).map(|v| v.len()),
        Some(0)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn range_query_only_returns_the_callers_events() {
    let workspace = temp_dir("homeroom-range-visibility");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "events.create",
        json!({
            "title": "Mine",
            "startTime": "2026-09-07T09:00:00Z",
            "createdBy": "teacher-1"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "events.create",
        json!({
            "title": "Shared",
            "startTime": "2026-09-07T10:00:00Z",
            "createdBy": "teacher-2",
            "participantIds": ["teacher-1"]
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "events.create",
        json!({
            "title": "Theirs",
            "startTime": "2026-09-07T11:00:00Z",
            "createdBy": "teacher-2"
        }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "q",
        "schedule.eventsInRange",
        json!({
            "userId": "teacher-1",
            "startTime": "2026-09-07T00:00:00Z",
            "endTime": "2026-09-07T23:59:59Z"
        }),
    );
    let titles: Vec<&str> = result
        .get("events")
        .and_then(|v| v.as_array())
        .expect("events array")
        .iter()
        .filter_map(|e| e.get("title").and_then(|v| v.as_str()))
        .collect();
    // Creator-owned and participant-shared events only.
    assert_eq!(titles, vec!["Mine", "Shared"]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
