use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    is_unique_violation, non_empty_text, optional_bool, optional_str, page_slice, parse_date,
    patch_field, patch_required, required_str, today, Filter, ListQuery, Patch, Update,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "male" => Some(Self::Male),
            "female" => Some(Self::Female),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "other",
        }
    }
}

fn parse_gender(v: &serde_json::Value) -> Result<Gender, String> {
    let s = v
        .as_str()
        .ok_or_else(|| "gender must be string".to_string())?;
    Gender::parse(s.trim()).ok_or_else(|| "gender must be one of: male, female, other".into())
}

fn parse_birth_date(v: &serde_json::Value) -> Result<String, String> {
    let s = v
        .as_str()
        .ok_or_else(|| "dateOfBirth must be string".to_string())?;
    let d = parse_date(s.trim(), "dateOfBirth")?;
    if d > today() {
        return Err("dateOfBirth must not be in the future".into());
    }
    Ok(d.format("%Y-%m-%d").to_string())
}

const STUDENT_COLUMNS: &str = "s.id, s.class_id, c.name, s.student_code, s.full_name,
    s.gender, s.date_of_birth, s.active, s.created_at, s.updated_at,
    (SELECT COUNT(*) FROM violations v WHERE v.student_id = s.id) AS violation_count,
    (SELECT COALESCE(SUM(v.points), 0) FROM violations v WHERE v.student_id = s.id) AS total_points";

const STUDENT_FROM: &str = "FROM students s JOIN classes c ON c.id = s.class_id";

fn student_json(row: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let class_id: String = row.get(1)?;
    let class_name: String = row.get(2)?;
    let student_code: String = row.get(3)?;
    let full_name: String = row.get(4)?;
    let gender: Option<String> = row.get(5)?;
    let date_of_birth: Option<String> = row.get(6)?;
    let active: i64 = row.get(7)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    let violation_count: i64 = row.get(10)?;
    let total_points: i64 = row.get(11)?;
    Ok(json!({
        "id": id,
        "classId": class_id,
        "className": class_name,
        "studentCode": student_code,
        "fullName": full_name,
        "gender": gender,
        "dateOfBirth": date_of_birth,
        "active": active != 0,
        "createdAt": created_at,
        "updatedAt": updated_at,
        "violationCount": violation_count,
        "totalPoints": total_points
    }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let listing = match setup::load_listing(conn, &state.config) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let q = match ListQuery::from_params(&req.params, &listing) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let class_id = match optional_str(&req.params, "classId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let active = match optional_bool(&req.params, "active") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let mut filter = Filter::default();
    if let Some(cid) = class_id.as_deref() {
        filter.push_text("s.class_id = ?", cid);
    }
    if let Some(a) = active {
        filter.push("s.active = ?", SqlValue::Integer(i64::from(a)));
    }
    if let Some(pattern) = q.like_pattern() {
        filter.push_search(&["s.full_name", "s.student_code"], &pattern);
    }

    let total: i64 = match conn.query_row(
        &format!("SELECT COUNT(*) {} {}", STUDENT_FROM, filter.where_sql()),
        params_from_iter(filter.values.iter()),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let slice = page_slice(&mut state.ranges, &q, total.max(0) as u64);
    let sql = format!(
        "SELECT {} {} {} ORDER BY s.full_name COLLATE NOCASE, s.student_code LIMIT ? OFFSET ?",
        STUDENT_COLUMNS,
        STUDENT_FROM,
        filter.where_sql()
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(filter.with_window(&slice)), student_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(
            &req.id,
            json!({ "students": students, "pagination": slice.meta }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let row = conn
        .query_row(
            &format!("SELECT {} {} WHERE s.id = ?", STUDENT_COLUMNS, STUDENT_FROM),
            [&student_id],
            student_json,
        )
        .optional();
    match row {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match required_str(&req.params, "classId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let student_code = match required_str(&req.params, "studentCode") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let full_name = match required_str(&req.params, "fullName") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let gender = match patch_field(&req.params, "gender", parse_gender) {
        Ok(Patch::Set(g)) => Some(g.as_str()),
        Ok(_) => None,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let date_of_birth = match patch_field(&req.params, "dateOfBirth", parse_birth_date) {
        Ok(Patch::Set(d)) => Some(d),
        Ok(_) => None,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let active = match optional_bool(&req.params, "active") {
        Ok(v) => v.unwrap_or(true),
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    match db::row_exists(conn, "classes", &class_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let student_id = Uuid::new_v4().to_string();
    let now = db::now_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO students(
            id, class_id, student_code, full_name, gender, date_of_birth,
            active, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &class_id,
            &student_code,
            &full_name,
            gender,
            &date_of_birth,
            i64::from(active),
            &now,
            &now,
        ),
    ) {
        if is_unique_violation(&e) {
            return err(
                &req.id,
                "conflict",
                format!("student code {} is already in use", student_code),
                Some(json!({ "field": "studentCode" })),
            );
        }
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    tracing::info!(student_id = %student_id, class_id = %class_id, "student created");
    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let mut update = Update::default();
    match patch_required(&req.params, "classId", |v| non_empty_text(v, "classId")) {
        Ok(Some(class_id)) => {
            match db::row_exists(conn, "classes", &class_id) {
                Ok(true) => {}
                Ok(false) => return err(&req.id, "not_found", "class not found", None),
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
            update.set("class_id", SqlValue::Text(class_id));
        }
        Ok(None) => {}
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    for (key, column) in [("studentCode", "student_code"), ("fullName", "full_name")] {
        match patch_required(&req.params, key, |v| non_empty_text(v, key)) {
            Ok(Some(s)) => update.set(column, SqlValue::Text(s)),
            Ok(None) => {}
            Err(msg) => return err(&req.id, "bad_params", msg, None),
        }
    }
    match patch_field(&req.params, "gender", parse_gender) {
        Ok(p) => update.patch_text(
            "gender",
            match p {
                Patch::Keep => Patch::Keep,
                Patch::Clear => Patch::Clear,
                Patch::Set(g) => Patch::Set(g.as_str().to_string()),
            },
        ),
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    match patch_field(&req.params, "dateOfBirth", parse_birth_date) {
        Ok(p) => update.patch_text("date_of_birth", p),
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    match patch_required(&req.params, "active", |v| {
        v.as_bool().ok_or_else(|| "active must be boolean".to_string())
    }) {
        Ok(Some(a)) => update.set("active", SqlValue::Integer(i64::from(a))),
        Ok(None) => {}
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    if update.is_empty() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }
    update.set("updated_at", SqlValue::Text(db::now_rfc3339()));

    match update.execute(conn, "students", &student_id) {
        Ok(0) => err(&req.id, "not_found", "student not found", None),
        Ok(_) => {
            tracing::info!(student_id = %student_id, "student updated");
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) if is_unique_violation(&e) => err(
            &req.id,
            "conflict",
            "student code is already in use",
            Some(json!({ "field": "studentCode" })),
        ),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    match db::row_exists(conn, "students", &student_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    let removed = match tx.execute("DELETE FROM violations WHERE student_id = ?", [&student_id]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "violations" })),
            );
        }
    };

    if let Err(e) = tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(student_id = %student_id, violations = removed, "student deleted");
    ok(&req.id, json!({ "ok": true, "violationsRemoved": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
