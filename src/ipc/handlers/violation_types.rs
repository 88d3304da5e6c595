use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    is_unique_violation, non_empty_text, optional_str, page_slice, patch_required, required_str,
    text_patch, Filter, ListQuery, Update,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

pub const MAX_POINTS: i64 = 1000;
const DESCRIPTION_MAX: usize = 500;

const TYPE_COLUMNS: &str = "vt.id, vt.category_id, vc.name, vt.name, vt.points, vt.description,
    (SELECT COUNT(*) FROM violations v WHERE v.type_id = vt.id) AS record_count";

const TYPE_FROM: &str =
    "FROM violation_types vt JOIN violation_categories vc ON vc.id = vt.category_id";

fn type_json(row: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let category_id: String = row.get(1)?;
    let category_name: String = row.get(2)?;
    let name: String = row.get(3)?;
    let points: i64 = row.get(4)?;
    let description: Option<String> = row.get(5)?;
    let record_count: i64 = row.get(6)?;
    Ok(json!({
        "id": id,
        "categoryId": category_id,
        "categoryName": category_name,
        "name": name,
        "points": points,
        "description": description,
        "recordCount": record_count
    }))
}

fn parse_points(v: &serde_json::Value) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| "points must be integer".to_string())?;
    if !(0..=MAX_POINTS).contains(&n) {
        return Err(format!("points must be in 0..={}", MAX_POINTS));
    }
    Ok(n)
}

fn handle_types_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let category_id = match optional_str(&req.params, "categoryId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let mut filter = Filter::default();
    if let Some(cid) = category_id.as_deref() {
        filter.push_text("vt.category_id = ?", cid);
    }
    if let Some(pattern) = q.like_pattern() {
        filter.push_search(&["vt.name", "vc.name"], &pattern);
    }

    let total: i64 = match conn.query_row(
        &format!("SELECT COUNT(*) {} {}", TYPE_FROM, filter.where_sql()),
        params_from_iter(filter.values.iter()),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let slice = page_slice(&mut state.ranges, &q, total.max(0) as u64);
    let sql = format!(
        "SELECT {} {} {}
         ORDER BY vc.name COLLATE NOCASE, vt.name COLLATE NOCASE
         LIMIT ? OFFSET ?",
        TYPE_COLUMNS,
        TYPE_FROM,
        filter.where_sql()
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(filter.with_window(&slice)), type_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(types) => ok(
            &req.id,
            json!({ "types": types, "pagination": slice.meta }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_types_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let type_id = match required_str(&req.params, "typeId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let row = conn
        .query_row(
            &format!("SELECT {} {} WHERE vt.id = ?", TYPE_COLUMNS, TYPE_FROM),
            [&type_id],
            type_json,
        )
        .optional();
    match row {
        Ok(Some(t)) => ok(&req.id, json!({ "type": t })),
        Ok(None) => err(&req.id, "not_found", "violation type not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_types_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let category_id = match required_str(&req.params, "categoryId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let name = match required_str(&req.params, "name") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let points = match req.params.get("points") {
        Some(v) => match parse_points(v) {
            Ok(n) => n,
            Err(msg) => return err(&req.id, "bad_params", msg, None),
        },
        None => return err(&req.id, "bad_params", "missing points", None),
    };
    let description = match text_patch(&req.params, "description", DESCRIPTION_MAX) {
        Ok(p) => p.into_option(),
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    match db::row_exists(conn, "violation_categories", &category_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "category not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let type_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO violation_types(id, category_id, name, points, description)
         VALUES(?, ?, ?, ?, ?)",
        (&type_id, &category_id, &name, points, &description),
    ) {
        if is_unique_violation(&e) {
            return err(
                &req.id,
                "conflict",
                format!("{} already exists in this category", name),
                Some(json!({ "field": "name" })),
            );
        }
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "violation_types" })),
        );
    }

    tracing::info!(type_id = %type_id, category_id = %category_id, points, "violation type created");
    ok(&req.id, json!({ "typeId": type_id, "name": name }))
}

fn handle_types_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let type_id = match required_str(&req.params, "typeId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let mut update = Update::default();
    match patch_required(&req.params, "categoryId", |v| non_empty_text(v, "categoryId")) {
        Ok(Some(category_id)) => {
            match db::row_exists(conn, "violation_categories", &category_id) {
                Ok(true) => {}
                Ok(false) => return err(&req.id, "not_found", "category not found", None),
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
            update.set("category_id", SqlValue::Text(category_id));
        }
        Ok(None) => {}
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    match patch_required(&req.params, "name", |v| non_empty_text(v, "name")) {
        Ok(Some(name)) => update.set("name", SqlValue::Text(name)),
        Ok(None) => {}
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    // Recorded violations keep the points they were given.
    match patch_required(&req.params, "points", parse_points) {
        Ok(Some(points)) => update.set("points", SqlValue::Integer(points)),
        Ok(None) => {}
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    match text_patch(&req.params, "description", DESCRIPTION_MAX) {
        Ok(p) => update.patch_text("description", p),
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    if update.is_empty() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    match update.execute(conn, "violation_types", &type_id) {
        Ok(0) => err(&req.id, "not_found", "violation type not found", None),
        Ok(_) => {
            tracing::info!(type_id = %type_id, "violation type updated");
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) if is_unique_violation(&e) => err(
            &req.id,
            "conflict",
            "that name already exists in this category",
            Some(json!({ "field": "name" })),
        ),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_types_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let type_id = match required_str(&req.params, "typeId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    match db::row_exists(conn, "violation_types", &type_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "violation type not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let record_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM violations WHERE type_id = ?",
        [&type_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if record_count > 0 {
        return err(
            &req.id,
            "in_use",
            "violation type is referenced by violation records",
            Some(json!({ "recordCount": record_count })),
        );
    }

    if let Err(e) = conn.execute("DELETE FROM violation_types WHERE id = ?", [&type_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "violation_types" })),
        );
    }

    tracing::info!(type_id = %type_id, "violation type deleted");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "violationTypes.list" => Some(handle_types_list(state, req)),
        "violationTypes.get" => Some(handle_types_get(state, req)),
        "violationTypes.create" => Some(handle_types_create(state, req)),
        "violationTypes.update" => Some(handle_types_update(state, req)),
        "violationTypes.delete" => Some(handle_types_delete(state, req)),
        _ => None,
    }
}
