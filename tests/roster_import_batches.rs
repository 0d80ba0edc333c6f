mod test_support;

use serde_json::json;
use std::fmt::Write as _;
use test_support::{request_ok, spawn_sidecar, temp_dir};

#[test]
fn five_hundred_one_rows_import_in_two_batches() {
    let workspace = temp_dir("homeroom-import");
    let roster_in = workspace.join("students.csv");

    let mut csv = String::from("username,displayName,gradeLevel,parentEmail,classIds\n");
    for i in 0..501 {
        writeln!(
            csv,
            "student{i}@school.org,Student {i},7,parent{i}@home.org,c-7a",
        )
        .expect("build csv");
    }
    std::fs::write(&roster_in, csv).expect("write roster csv");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // Occupy one username ahead of the import.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.create",
        json!({ "username": "student250@school.org", "displayName": "Early Bird" }),
    );

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "exchange.previewRoster",
        json!({ "inPath": roster_in.to_string_lossy() }),
    );
    assert_eq!(preview.get("rowsParsed").and_then(|v| v.as_u64()), Some(501));
    assert_eq!(preview.get("rowsReady").and_then(|v| v.as_u64()), Some(500));
    assert_eq!(
        preview.get("rowsDuplicate").and_then(|v| v.as_u64()),
        Some(1)
    );

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "exchange.applyRoster",
        json!({
            "inPath": roster_in.to_string_lossy(),
            "batchDelayMs": 0,
            "retryDelayMs": 0
        }),
    );
    assert_eq!(applied.get("batches").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(applied.get("created").and_then(|v| v.as_u64()), Some(500));
    assert_eq!(applied.get("failed").and_then(|v| v.as_u64()), Some(1));

    let outcomes = applied
        .get("outcomes")
        .and_then(|v| v.as_array())
        .expect("outcomes");
    assert_eq!(outcomes.len(), 501);

    let duplicate = outcomes
        .iter()
        .find(|o| o["username"] == "student250@school.org")
        .expect("duplicate outcome");
    // Permanent rejection: one attempt, recorded error.
    assert_eq!(duplicate["attempts"].as_u64(), Some(1));
    assert!(duplicate["error"]
        .as_str()
        .unwrap_or("")
        .contains("already exists"));

    // The row right after the duplicate was still created.
    let next = outcomes
        .iter()
        .find(|o| o["username"] == "student251@school.org")
        .expect("next outcome");
    assert!(next["userId"].as_str().is_some());
    assert!(next["error"].is_null());

    let roster = request_ok(&mut stdin, &mut reader, "5", "roster.list", json!({}));
    let users = roster.get("users").and_then(|v| v.as_array()).expect("users");
    // 500 imported plus the pre-existing account.
    assert_eq!(users.len(), 501);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn json_roster_import_creates_accounts() {
    let workspace = temp_dir("homeroom-import-json");
    let roster_in = workspace.join("students.json");
    std::fs::write(
        &roster_in,
        r#"[
            {"username": "amy@school.org", "displayName": "Amy Pond", "classIds": ["c-1"]},
            {"email": "rory@school.org", "role": "teacher"},
            {"displayName": "No Username"}
        ]"#,
    )
    .expect("write roster json");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "exchange.applyRoster",
        json!({
            "inPath": roster_in.to_string_lossy(),
            "batchDelayMs": 0,
            "retryDelayMs": 0
        }),
    );
    assert_eq!(applied.get("rowsTotal").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(applied.get("created").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(applied.get("failed").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(
        applied.get("warningsCount").and_then(|v| v.as_u64()),
        Some(1)
    );

    let roster = request_ok(&mut stdin, &mut reader, "3", "roster.list", json!({}));
    let users = roster.get("users").and_then(|v| v.as_array()).expect("users");
    assert_eq!(users.len(), 2);
    let rory = users
        .iter()
        .find(|u| u["username"] == "rory@school.org")
        .expect("rory");
    assert_eq!(rory["displayName"].as_str(), Some("rory"));
    assert_eq!(rory["role"].as_str(), Some("teacher"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
