mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request_ok, spawn_sidecar, temp_dir};

fn create_event(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    params: serde_json::Value,
) -> String {
    let created = request_ok(stdin, reader, id, "events.create", params);
    created
        .get("event")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .expect("event id")
        .to_string()
}

fn conflict_count(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    params: serde_json::Value,
) -> usize {
    let result = request_ok(stdin, reader, id, "schedule.checkConflicts", params);
    result
        .get("conflicts")
        .and_then(|v| v.as_array())
        .map(|v| v.len())
        .unwrap_or(0)
}

#[test]
fn conflict_detection_uses_half_open_intervals() {
    let workspace = temp_dir("homeroom-conflicts");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let _busy = create_event(
        &mut stdin,
        &mut reader,
        "2",
        json!({
            "title": "Period 2 Math",
            "type": "class",
            "startTime": "2026-09-07T10:00:00Z",
            "endTime": "2026-09-07T11:00:00Z",
            "createdBy": "teacher-1"
        }),
    );

    // Overlapping proposal conflicts.
    assert_eq!(
        conflict_count(
            &mut stdin,
            &mut reader,
            "3",
            json!({
                "userId": "teacher-1",
                "startTime": "2026-09-07T10:30:00Z",
                "endTime": "2026-09-07T11:30:00Z"
            }),
        ),
        1
    );

    // Back-to-back proposal starting exactly at the end does not.
    assert_eq!(
        conflict_count(
            &mut stdin,
            &mut reader,
            "4",
            json!({
                "userId": "teacher-1",
                "startTime": "2026-09-07T11:00:00Z",
                "endTime": "2026-09-07T12:00:00Z"
            }),
        ),
        0
    );

    // Another user with no membership sees no conflict.
    assert_eq!(
        conflict_count(
            &mut stdin,
            &mut reader,
            "5",
            json!({
                "userId": "teacher-2",
                "startTime": "2026-09-07T10:30:00Z",
                "endTime": "2026-09-07T11:30:00Z"
            }),
        ),
        0
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn open_ended_event_occupies_default_hour_slot() {
    let workspace = temp_dir("homeroom-conflicts-slot");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let _open_ended = create_event(
        &mut stdin,
        &mut reader,
        "2",
        json!({
            "title": "Office Hours",
            "type": "meeting",
            "startTime": "2026-09-07T14:00:00Z",
            "createdBy": "teacher-1"
        }),
    );

    // Inside the implied [14:00, 15:00) slot.
    assert_eq!(
        conflict_count(
            &mut stdin,
            &mut reader,
            "3",
            json!({
                "userId": "teacher-1",
                "startTime": "2026-09-07T14:30:00Z",
                "endTime": "2026-09-07T15:30:00Z"
            }),
        ),
        1
    );

    // Starting at the implied end is clear.
    assert_eq!(
        conflict_count(
            &mut stdin,
            &mut reader,
            "4",
            json!({
                "userId": "teacher-1",
                "startTime": "2026-09-07T15:00:00Z",
                "endTime": "2026-09-07T16:00:00Z"
            }),
        ),
        0
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn participants_see_conflicts_and_edits_exclude_self() {
    let workspace = temp_dir("homeroom-conflicts-participants");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let event_id = create_event(
        &mut stdin,
        &mut reader,
        "2",
        json!({
            "title": "Science Fair Prep",
            "type": "school",
            "startTime": "2026-09-08T09:00:00Z",
            "endTime": "2026-09-08T10:00:00Z",
            "createdBy": "teacher-1",
            "participantIds": ["student-7", "student-8"]
        }),
    );

    // A listed participant shares the busy slot.
    assert_eq!(
        conflict_count(
            &mut stdin,
            &mut reader,
            "3",
            json!({
                "userId": "student-7",
                "startTime": "2026-09-08T09:30:00Z",
                "endTime": "2026-09-08T10:30:00Z"
            }),
        ),
        1
    );

    // Rescheduling the event itself ignores its own slot.
    assert_eq!(
        conflict_count(
            &mut stdin,
            &mut reader,
            "4",
            json!({
                "userId": "teacher-1",
                "startTime": "2026-09-08T09:30:00Z",
                "endTime": "2026-09-08T10:30:00Z",
                "excludeEventId": event_id
            }),
        ),
        0
    );

    // Deleting the event clears the slot for everyone.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "events.delete",
        json!({ "eventId": event_id }),
    );
    assert_eq!(
        conflict_count(
            &mut stdin,
            &mut reader,
            "6",
            json!({
                "userId": "student-7",
                "startTime": "2026-09-08T09:30:00Z",
                "endTime": "2026-09-08T10:30:00Z"
            }),
        ),
        0
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
