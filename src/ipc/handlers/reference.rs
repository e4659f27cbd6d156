use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
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

fn db_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn sport_exists(conn: &Connection, sport_id: &str) -> Result<bool, HandlerErr> {
    use rusqlite::OptionalExtension;
    conn.query_row("SELECT 1 FROM sports WHERE id = ?", [sport_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

fn handle_accounts_create(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let account_type = get_required_str(&req.params, "accountType")?;
    if account_type != "parent" && account_type != "school" {
        return Err(HandlerErr {
            code: "bad_params",
            message: "accountType must be parent or school".to_string(),
            details: None,
        });
    }
    let name = get_required_str(&req.params, "name")?;
    let email = get_required_str(&req.params, "email")?;
    let phone = req
        .params
        .get("phoneNumber")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let country_code = req
        .params
        .get("countryCode")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO accounts(id, account_type, name, email, phone_number, country_code)
         VALUES(?, ?, ?, ?, ?, ?)",
        rusqlite::params![&id, &account_type, &name, &email, phone, country_code],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "accounts" })),
    })?;
    Ok(json!({ "accountId": id }))
}

fn handle_sports_create(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(&req.params, "name")?;
    let start_date = req
        .params
        .get("startDate")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    if let Some(s) = &start_date {
        if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_err() {
            return Err(HandlerErr {
                code: "bad_params",
                message: "startDate must be YYYY-MM-DD".to_string(),
                details: None,
            });
        }
    }
    let hidden = req
        .params
        .get("hidden")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sports(id, name, start_date, hidden) VALUES(?, ?, ?, ?)",
        rusqlite::params![&id, &name, &start_date, hidden as i64],
    )
    .map_err(db_err)?;
    Ok(json!({ "sportId": id }))
}

fn handle_sports_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name, start_date, hidden FROM sports ORDER BY name")
        .map_err(db_err)?;
    let sports = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "startDate": r.get::<_, Option<String>>(2)?,
                "hidden": r.get::<_, i64>(3)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!({ "sports": sports }))
}

fn handle_child_create(
    conn: &Connection,
    req: &Request,
    table: &str,
    id_key: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let sport_id = get_required_str(&req.params, "sportId")?;
    let name = get_required_str(&req.params, "name")?;
    if !sport_exists(conn, &sport_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: format!("unknown sportId: {}", sport_id),
            details: None,
        });
    }
    let id = Uuid::new_v4().to_string();
    let sql = format!("INSERT INTO {}(id, sport_id, name) VALUES(?, ?, ?)", table);
    conn.execute(&sql, rusqlite::params![&id, &sport_id, &name])
        .map_err(db_err)?;
    Ok(json!({ id_key: id }))
}

fn handle_age_categories_create(
    conn: &Connection,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let label = get_required_str(&req.params, "label")?;
    let max_age = req.params.get("maxAge").and_then(|v| v.as_i64());
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO age_categories(id, label, max_age) VALUES(?, ?, ?)",
        rusqlite::params![&id, &label, &max_age],
    )
    .map_err(db_err)?;
    Ok(json!({ "ageCategoryId": id }))
}

fn handle_age_categories_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, label, max_age FROM age_categories ORDER BY label")
        .map_err(db_err)?;
    let categories = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "label": r.get::<_, String>(1)?,
                "maxAge": r.get::<_, Option<i64>>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!({ "ageCategories": categories }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let dispatch = matches!(
        req.method.as_str(),
        "accounts.create"
            | "sports.create"
            | "sports.list"
            | "distances.create"
            | "sportSubTypes.create"
            | "ageCategories.create"
            | "ageCategories.list"
    );
    if !dispatch {
        return None;
    }

    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };

    let result = match req.method.as_str() {
        "accounts.create" => handle_accounts_create(conn, req),
        "sports.create" => handle_sports_create(conn, req),
        "sports.list" => handle_sports_list(conn),
        "distances.create" => handle_child_create(conn, req, "distances", "distanceId"),
        "sportSubTypes.create" => {
            handle_child_create(conn, req, "sport_sub_types", "sportSubTypeId")
        }
        "ageCategories.create" => handle_age_categories_create(conn, req),
        "ageCategories.list" => handle_age_categories_list(conn),
        _ => return None,
    };

    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
