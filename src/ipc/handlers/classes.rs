use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    is_unique_violation, non_empty_text, optional_i64_range, page_slice, patch_field,
    patch_required, required_str, Filter, ListQuery, Patch, Update,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

const CLASS_COLUMNS: &str = "c.id, c.name, c.grade_level, c.created_at,
    (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count";

fn class_json(row: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let grade_level: Option<i64> = row.get(2)?;
    let created_at: String = row.get(3)?;
    let student_count: i64 = row.get(4)?;
    Ok(json!({
        "id": id,
        "name": name,
        "gradeLevel": grade_level,
        "createdAt": created_at,
        "studentCount": student_count
    }))
}

fn parse_grade_level(v: &serde_json::Value) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| "gradeLevel must be integer".to_string())?;
    if !(1..=12).contains(&n) {
        return Err("gradeLevel must be in 1..=12".into());
    }
    Ok(n)
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let grade_level = match optional_i64_range(&req.params, "gradeLevel", 1, 12) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let mut filter = Filter::default();
    if let Some(g) = grade_level {
        filter.push("c.grade_level = ?", SqlValue::Integer(g));
    }
    if let Some(pattern) = q.like_pattern() {
        filter.push_search(&["c.name"], &pattern);
    }

    let total: i64 = match conn.query_row(
        &format!("SELECT COUNT(*) FROM classes c {}", filter.where_sql()),
        params_from_iter(filter.values.iter()),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let slice = page_slice(&mut state.ranges, &q, total.max(0) as u64);
    let sql = format!(
        "SELECT {} FROM classes c {} ORDER BY c.name COLLATE NOCASE, c.id LIMIT ? OFFSET ?",
        CLASS_COLUMNS,
        filter.where_sql()
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(filter.with_window(&slice)), class_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(
            &req.id,
            json!({ "classes": classes, "pagination": slice.meta }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match required_str(&req.params, "classId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let row = conn
        .query_row(
            &format!("SELECT {} FROM classes c WHERE c.id = ?", CLASS_COLUMNS),
            [&class_id],
            class_json,
        )
        .optional();
    match row {
        Ok(Some(class)) => ok(&req.id, json!({ "class": class })),
        Ok(None) => err(&req.id, "not_found", "class not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match required_str(&req.params, "name") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let grade_level = match patch_field(&req.params, "gradeLevel", parse_grade_level) {
        Ok(Patch::Set(g)) => Some(g),
        Ok(_) => None,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, grade_level, created_at) VALUES(?, ?, ?, ?)",
        (&class_id, &name, grade_level, db::now_rfc3339()),
    ) {
        if is_unique_violation(&e) {
            return err(
                &req.id,
                "conflict",
                format!("a class named {} already exists", name),
                Some(json!({ "field": "name" })),
            );
        }
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    tracing::info!(class_id = %class_id, "class created");
    ok(&req.id, json!({ "classId": class_id, "name": name }))
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match required_str(&req.params, "classId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let mut update = Update::default();
    match patch_required(&req.params, "name", |v| non_empty_text(v, "name")) {
        Ok(Some(name)) => update.set("name", SqlValue::Text(name)),
        Ok(None) => {}
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    match patch_field(&req.params, "gradeLevel", parse_grade_level) {
        Ok(Patch::Keep) => {}
        Ok(Patch::Clear) => update.set("grade_level", SqlValue::Null),
        Ok(Patch::Set(g)) => update.set("grade_level", SqlValue::Integer(g)),
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    if update.is_empty() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    match update.execute(conn, "classes", &class_id) {
        Ok(0) => err(&req.id, "not_found", "class not found", None),
        Ok(_) => {
            tracing::info!(class_id = %class_id, "class updated");
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) if is_unique_violation(&e) => err(
            &req.id,
            "conflict",
            "another class already has that name",
            Some(json!({ "field": "name" })),
        ),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match required_str(&req.params, "classId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    match db::row_exists(conn, "classes", &class_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let student_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM students WHERE class_id = ?",
        [&class_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_count > 0 {
        return err(
            &req.id,
            "in_use",
            "class still has students",
            Some(json!({ "studentCount": student_count })),
        );
    }

    if let Err(e) = conn.execute("DELETE FROM classes WHERE id = ?", [&class_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    tracing::info!(class_id = %class_id, "class deleted");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.get" => Some(handle_classes_get(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.update" => Some(handle_classes_update(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
