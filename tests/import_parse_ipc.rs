use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn fixture_path(rel: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(rel)
}

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rosterd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rosterd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn seed_reference_data(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> String {
    let sport = request_ok(
        stdin,
        reader,
        "sport",
        "sports.create",
        json!({ "name": "Running", "startDate": "2026-10-01" }),
    );
    let sport_id = sport
        .get("sportId")
        .and_then(|v| v.as_str())
        .expect("sportId")
        .to_string();
    for (i, name) in ["5K", "10K"].iter().enumerate() {
        request_ok(
            stdin,
            reader,
            &format!("dist{}", i),
            "distances.create",
            json!({ "sportId": sport_id, "name": name }),
        );
    }
    for (i, (label, max_age)) in [("Under 12", 12), ("Under 17", 17), ("Under 21", 21)]
        .iter()
        .enumerate()
    {
        request_ok(
            stdin,
            reader,
            &format!("cat{}", i),
            "ageCategories.create",
            json!({ "label": label, "maxAge": max_age }),
        );
    }
    sport_id
}

#[test]
fn three_row_csv_yields_one_valid_row_and_two_errors() {
    let workspace = temp_dir("rosterd-parse");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_reference_data(&mut stdin, &mut reader);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "parse",
        "students.importParse",
        json!({ "path": fixture_path("fixtures/import/students_basic.csv").to_string_lossy() }),
    );

    assert_eq!(result.get("totalRows").and_then(|v| v.as_u64()), Some(3));

    let valid = result
        .get("validRows")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("validRows");
    assert_eq!(valid.len(), 1);
    assert_eq!(valid[0].get("uid").and_then(|v| v.as_str()), Some("NID-100"));
    assert_eq!(valid[0].get("rowNumber").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(
        valid[0].get("formattedDob").and_then(|v| v.as_str()),
        Some("14-Sep-2008")
    );

    let errors = result
        .get("errors")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("errors");
    assert_eq!(errors.len(), 2);

    let row3 = errors
        .iter()
        .find(|e| e.get("row").and_then(|v| v.as_u64()) == Some(3))
        .expect("row 3 error");
    assert_eq!(
        row3.get("error").and_then(|v| v.as_str()),
        Some("Gender is required")
    );
    // Error entries carry the mapped fields for client-side fixing.
    assert_eq!(row3.get("name").and_then(|v| v.as_str()), Some("Ben Otieno"));

    let row4 = errors
        .iter()
        .find(|e| e.get("row").and_then(|v| v.as_u64()) == Some(4))
        .expect("row 4 error");
    assert_eq!(
        row4.get("error").and_then(|v| v.as_str()),
        Some("Sport not found: Quidditch")
    );
}

#[test]
fn variant_headers_and_instruction_row_parse_cleanly() {
    let workspace = temp_dir("rosterd-parse-variants");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_reference_data(&mut stdin, &mut reader);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "parse",
        "students.importParse",
        json!({ "path": fixture_path("fixtures/import/students_variants.csv").to_string_lossy() }),
    );

    // The decorated instruction row is skipped outright, not errored.
    assert_eq!(result.get("totalRows").and_then(|v| v.as_u64()), Some(1));
    let valid = result
        .get("validRows")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("validRows");
    assert_eq!(valid.len(), 1);

    let dana = &valid[0];
    assert_eq!(dana.get("uid").and_then(|v| v.as_str()), Some("NID-200"));
    // Excel serial 36783 normalizes like any other accepted notation.
    assert_eq!(
        dana.get("formattedDob").and_then(|v| v.as_str()),
        Some("14-Sep-2000")
    );
    assert_eq!(dana.get("bloodGroup").and_then(|v| v.as_str()), Some("A+"));
    assert_eq!(dana.get("gender").and_then(|v| v.as_str()), Some("female"));
    assert_eq!(
        dana.get("relationship").and_then(|v| v.as_str()),
        Some("mother")
    );
}

#[test]
fn missing_file_parses_to_an_empty_batch() {
    let workspace = temp_dir("rosterd-parse-missing");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "parse",
        "students.importParse",
        json!({ "path": workspace.join("does-not-exist.csv").to_string_lossy() }),
    );
    assert_eq!(result.get("totalRows").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(
        result
            .get("validRows")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
}
