use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    non_empty_text, optional_date, optional_str, page_slice, parse_date, patch_required,
    required_str, text_patch, today, Filter, ListQuery, Update,
};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

const NOTE_MAX: usize = 1000;

const VIOLATION_COLUMNS: &str = "v.id, v.student_id, s.full_name, s.student_code, s.class_id,
    c.name, v.type_id, vt.name, vc.name, v.occurred_on, v.note, v.points, v.created_at";

const VIOLATION_FROM: &str = "FROM violations v
    JOIN students s ON s.id = v.student_id
    JOIN classes c ON c.id = s.class_id
    JOIN violation_types vt ON vt.id = v.type_id
    JOIN violation_categories vc ON vc.id = vt.category_id";

fn violation_json(row: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let student_id: String = row.get(1)?;
    let student_name: String = row.get(2)?;
    let student_code: String = row.get(3)?;
    let class_id: String = row.get(4)?;
    let class_name: String = row.get(5)?;
    let type_id: String = row.get(6)?;
    let type_name: String = row.get(7)?;
    let category_name: String = row.get(8)?;
    let occurred_on: String = row.get(9)?;
    let note: Option<String> = row.get(10)?;
    let points: i64 = row.get(11)?;
    let created_at: String = row.get(12)?;
    Ok(json!({
        "id": id,
        "studentId": student_id,
        "studentName": student_name,
        "studentCode": student_code,
        "classId": class_id,
        "className": class_name,
        "typeId": type_id,
        "typeName": type_name,
        "categoryName": category_name,
        "occurredOn": occurred_on,
        "note": note,
        "points": points,
        "createdAt": created_at
    }))
}

fn parse_occurred_on(v: &serde_json::Value) -> Result<NaiveDate, String> {
    let s = v
        .as_str()
        .ok_or_else(|| "occurredOn must be string".to_string())?;
    let d = parse_date(s.trim(), "occurredOn")?;
    if d > today() {
        return Err("occurredOn must not be in the future".into());
    }
    Ok(d)
}

fn type_points(conn: &Connection, type_id: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT points FROM violation_types WHERE id = ?",
        [type_id],
        |r| r.get(0),
    )
    .optional()
}

fn handle_violations_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let mut filter = Filter::default();
    for (key, clause) in [
        ("studentId", "v.student_id = ?"),
        ("classId", "s.class_id = ?"),
        ("typeId", "v.type_id = ?"),
    ] {
        match optional_str(&req.params, key) {
            Ok(Some(v)) => filter.push_text(clause, &v),
            Ok(None) => {}
            Err(msg) => return err(&req.id, "bad_params", msg, None),
        }
    }
    let from = match optional_date(&req.params, "from") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let to = match optional_date(&req.params, "to") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    if let (Some(f), Some(t)) = (from, to) {
        if f > t {
            return err(&req.id, "bad_params", "from must not be after to", None);
        }
    }
    if let Some(f) = from {
        filter.push_text("v.occurred_on >= ?", &f.format("%Y-%m-%d").to_string());
    }
    if let Some(t) = to {
        filter.push_text("v.occurred_on <= ?", &t.format("%Y-%m-%d").to_string());
    }
    if let Some(pattern) = q.like_pattern() {
        filter.push_search(&["s.full_name", "s.student_code", "vt.name", "v.note"], &pattern);
    }

    let (total, points): (i64, i64) = match conn.query_row(
        &format!(
            "SELECT COUNT(*), COALESCE(SUM(v.points), 0) {} {}",
            VIOLATION_FROM,
            filter.where_sql()
        ),
        params_from_iter(filter.values.iter()),
        |r| Ok((r.get(0)?, r.get(1)?)),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let slice = page_slice(&mut state.ranges, &q, total.max(0) as u64);
    let sql = format!(
        "SELECT {} {} {}
         ORDER BY v.occurred_on DESC, v.created_at DESC, v.id
         LIMIT ? OFFSET ?",
        VIOLATION_COLUMNS,
        VIOLATION_FROM,
        filter.where_sql()
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(filter.with_window(&slice)), violation_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(violations) => ok(
            &req.id,
            json!({
                "violations": violations,
                "totalPoints": points,
                "pagination": slice.meta
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_violations_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let violation_id = match required_str(&req.params, "violationId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let row = conn
        .query_row(
            &format!(
                "SELECT {} {} WHERE v.id = ?",
                VIOLATION_COLUMNS, VIOLATION_FROM
            ),
            [&violation_id],
            violation_json,
        )
        .optional();
    match row {
        Ok(Some(v)) => ok(&req.id, json!({ "violation": v })),
        Ok(None) => err(&req.id, "not_found", "violation not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_violations_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let type_id = match required_str(&req.params, "typeId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let occurred_on = match req.params.get("occurredOn") {
        Some(v) => match parse_occurred_on(v) {
            Ok(d) => d,
            Err(msg) => return err(&req.id, "bad_params", msg, None),
        },
        None => return err(&req.id, "bad_params", "missing occurredOn", None),
    };
    let note = match text_patch(&req.params, "note", NOTE_MAX) {
        Ok(p) => p.into_option(),
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    match db::row_exists(conn, "students", &student_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    let points = match type_points(conn, &type_id) {
        Ok(Some(p)) => p,
        Ok(None) => return err(&req.id, "not_found", "violation type not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let violation_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO violations(id, student_id, type_id, occurred_on, note, points, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &violation_id,
            &student_id,
            &type_id,
            occurred_on.format("%Y-%m-%d").to_string(),
            &note,
            points,
            db::now_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "violations" })),
        );
    }

    tracing::info!(
        violation_id = %violation_id,
        student_id = %student_id,
        points,
        "violation recorded"
    );
    ok(
        &req.id,
        json!({ "violationId": violation_id, "points": points }),
    )
}

fn handle_violations_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let violation_id = match required_str(&req.params, "violationId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let mut update = Update::default();
    match patch_required(&req.params, "typeId", |v| non_empty_text(v, "typeId")) {
        Ok(Some(type_id)) => {
            let points = match type_points(conn, &type_id) {
                Ok(Some(p)) => p,
                Ok(None) => return err(&req.id, "not_found", "violation type not found", None),
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            update.set("type_id", SqlValue::Text(type_id));
            update.set("points", SqlValue::Integer(points));
        }
        Ok(None) => {}
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    match patch_required(&req.params, "occurredOn", parse_occurred_on) {
        Ok(Some(d)) => update.set(
            "occurred_on",
            SqlValue::Text(d.format("%Y-%m-%d").to_string()),
        ),
        Ok(None) => {}
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    match text_patch(&req.params, "note", NOTE_MAX) {
        Ok(p) => update.patch_text("note", p),
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    if update.is_empty() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    match update.execute(conn, "violations", &violation_id) {
        Ok(0) => err(&req.id, "not_found", "violation not found", None),
        Ok(_) => {
            tracing::info!(violation_id = %violation_id, "violation updated");
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_violations_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let violation_id = match required_str(&req.params, "violationId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    match conn.execute("DELETE FROM violations WHERE id = ?", [&violation_id]) {
        Ok(0) => err(&req.id, "not_found", "violation not found", None),
        Ok(_) => {
            tracing::info!(violation_id = %violation_id, "violation deleted");
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "violations" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "violations.list" => Some(handle_violations_list(state, req)),
        "violations.get" => Some(handle_violations_get(state, req)),
        "violations.create" => Some(handle_violations_create(state, req)),
        "violations.update" => Some(handle_violations_update(state, req)),
        "violations.delete" => Some(handle_violations_delete(state, req)),
        _ => None,
    }
}
