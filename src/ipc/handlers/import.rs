use crate::commit::{self, PreparedRow};
use crate::decode;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::mapping::{Mapper, StudentRowInput};
use crate::resolve::Resolver;
use crate::validate::{self, DobParse};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashSet;
use std::path::PathBuf;

/// A considered row that was rejected, with everything the client needs to
/// show and fix it.
struct FailedRow {
    input: StudentRowInput,
    errors: Vec<String>,
}

fn read_inputs_from_file(path: &PathBuf) -> Vec<StudentRowInput> {
    let mapper = Mapper::new();
    decode::decode_rows(path)
        .iter()
        .filter_map(|raw| mapper.map_row(raw))
        .collect()
}

/// Validate, resolve and duplicate-check a batch. Rows fail independently;
/// Err is reserved for store failures, which abort the whole request since
/// no per-row blame exists.
fn prepare_batch(
    conn: &Connection,
    inputs: Vec<StudentRowInput>,
) -> anyhow::Result<(Vec<PreparedRow>, Vec<FailedRow>)> {
    let mut resolver = Resolver::new(conn);
    let mut seen_uids: HashSet<String> = HashSet::new();
    let mut prepared: Vec<PreparedRow> = Vec::new();
    let mut failed: Vec<FailedRow> = Vec::new();

    for mut input in inputs {
        let outcome = validate::validate_row(&input);
        let mut errors = outcome.errors;
        input.formatted_dob = outcome.formatted_dob;

        let mut refs = None;
        if errors.is_empty() {
            // No validation errors implies the dob parsed; formatted_dob is
            // canonical and round-trips.
            let formatted = input.formatted_dob.clone().unwrap_or_default();
            match validate::parse_dob(&formatted) {
                DobParse::Valid(date) => {
                    let resolution = resolver.resolve_row(&input, date)?;
                    errors.extend(resolution.errors);
                    refs = resolution.refs;
                }
                _ => errors.push(validate::ERR_DOB_INVALID.to_string()),
            }
        }

        let uid = input.uid.trim().to_string();
        if errors.is_empty() && !uid.is_empty() {
            if seen_uids.contains(&uid) {
                errors.push(format!("Duplicate UID within file: {}", uid));
            } else if commit::uid_exists(conn, &uid)? {
                errors.push(format!("UID already exists: {}", uid));
            }
        }
        if !uid.is_empty() {
            // First bearer claims the uid for the rest of the batch,
            // whether or not it was itself accepted.
            seen_uids.insert(uid);
        }

        match (refs, errors.is_empty()) {
            (Some(refs), true) => {
                let formatted_dob = input.formatted_dob.clone().unwrap_or_default();
                prepared.push(PreparedRow {
                    input,
                    formatted_dob,
                    refs,
                });
            }
            _ => failed.push(FailedRow { input, errors }),
        }
    }

    Ok((prepared, failed))
}

fn failed_row_json(f: &FailedRow) -> serde_json::Value {
    // The error entry carries the mapped fields so the client can render
    // and re-submit just the failed rows.
    let mut obj = serde_json::to_value(&f.input).unwrap_or_else(|_| json!({}));
    if let Some(map) = obj.as_object_mut() {
        map.insert("row".to_string(), json!(f.input.row_number));
        map.insert("error".to_string(), json!(f.errors.join("; ")));
    }
    obj
}

fn handle_import_parse(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(path) = req.params.get("path").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    let inputs = read_inputs_from_file(&PathBuf::from(path));
    let (prepared, failed) = match prepare_batch(conn, inputs) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let valid_rows: Vec<serde_json::Value> = prepared
        .iter()
        .map(|p| serde_json::to_value(&p.input).unwrap_or_else(|_| json!({})))
        .collect();
    let errors: Vec<serde_json::Value> = failed.iter().map(failed_row_json).collect();

    ok(
        &req.id,
        json!({
            "validRows": valid_rows,
            "errors": errors,
            "totalRows": prepared.len() + failed.len(),
        }),
    )
}

fn handle_import_commit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(account_id) = req.params.get("accountId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.accountId", None);
    };

    let actor = match commit::load_actor(conn, account_id) {
        Ok(Some(a)) => a,
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                format!("unknown accountId: {}", account_id),
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // A previously previewed (and possibly user-edited) JSON array skips
    // re-decoding but not re-validation or the authoritative uid check.
    let inputs: Vec<StudentRowInput> = if let Some(rows) = req.params.get("rows") {
        match serde_json::from_value(rows.clone()) {
            Ok(v) => v,
            Err(e) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("bad params.rows: {}", e),
                    None,
                )
            }
        }
    } else if let Some(path) = req.params.get("path").and_then(|v| v.as_str()) {
        read_inputs_from_file(&PathBuf::from(path))
    } else {
        return err(&req.id, "bad_params", "missing params.path or params.rows", None);
    };

    let (prepared, failed) = match prepare_batch(conn, inputs) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let outcome = match commit::commit_rows(conn, &actor, &prepared) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_write_failed", e.to_string(), None),
    };

    let mut errors: Vec<serde_json::Value> = failed
        .iter()
        .map(|f| json!({ "row": f.input.row_number, "error": f.errors.join("; ") }))
        .collect();
    errors.extend(
        outcome
            .errors
            .iter()
            .map(|e| json!({ "row": e.row, "error": e.error })),
    );
    errors.sort_by_key(|e| e.get("row").and_then(|v| v.as_u64()).unwrap_or(0));

    ok(
        &req.id,
        json!({
            "successCount": outcome.success_count,
            "errors": errors,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.importParse" => Some(handle_import_parse(state, req)),
        "students.importCommit" => Some(handle_import_commit(state, req)),
        _ => None,
    }
}
