use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.uid, s.name, s.dob, s.gender, s.blood_group,
                s.sport_id, s.distance_id, s.sport_sub_type_id, s.age_category_id
         FROM students s
         ORDER BY s.rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "uid": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "dob": r.get::<_, String>(3)?,
                "gender": r.get::<_, String>(4)?,
                "bloodGroup": r.get::<_, String>(5)?,
                "sportId": r.get::<_, String>(6)?,
                "distanceId": r.get::<_, Option<String>>(7)?,
                "sportSubTypeId": r.get::<_, Option<String>>(8)?,
                "ageCategoryId": r.get::<_, Option<String>>(9)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        _ => None,
    }
}
