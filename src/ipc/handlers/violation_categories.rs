use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    is_unique_violation, non_empty_text, page_slice, patch_required, required_str, text_patch,
    Filter, ListQuery, Update,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

const CATEGORY_COLUMNS: &str = "vc.id, vc.name, vc.description,
    (SELECT COUNT(*) FROM violation_types vt WHERE vt.category_id = vc.id) AS type_count";

fn category_json(row: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let description: Option<String> = row.get(2)?;
    let type_count: i64 = row.get(3)?;
    Ok(json!({
        "id": id,
        "name": name,
        "description": description,
        "typeCount": type_count
    }))
}

const DESCRIPTION_MAX: usize = 500;

fn handle_categories_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Some(pattern) = q.like_pattern() {
        filter.push_search(&["vc.name", "vc.description"], &pattern);
    }

    let total: i64 = match conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM violation_categories vc {}",
            filter.where_sql()
        ),
        params_from_iter(filter.values.iter()),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let slice = page_slice(&mut state.ranges, &q, total.max(0) as u64);
    let sql = format!(
        "SELECT {} FROM violation_categories vc {} ORDER BY vc.name COLLATE NOCASE LIMIT ? OFFSET ?",
        CATEGORY_COLUMNS,
        filter.where_sql()
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(filter.with_window(&slice)), category_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(categories) => ok(
            &req.id,
            json!({ "categories": categories, "pagination": slice.meta }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_categories_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let category_id = match required_str(&req.params, "categoryId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM violation_categories vc WHERE vc.id = ?",
                CATEGORY_COLUMNS
            ),
            [&category_id],
            category_json,
        )
        .optional();
    match row {
        Ok(Some(category)) => ok(&req.id, json!({ "category": category })),
        Ok(None) => err(&req.id, "not_found", "category not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_categories_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match required_str(&req.params, "name") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let description = match text_patch(&req.params, "description", DESCRIPTION_MAX) {
        Ok(p) => p.into_option(),
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let category_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO violation_categories(id, name, description) VALUES(?, ?, ?)",
        (&category_id, &name, &description),
    ) {
        if is_unique_violation(&e) {
            return err(
                &req.id,
                "conflict",
                format!("a category named {} already exists", name),
                Some(json!({ "field": "name" })),
            );
        }
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "violation_categories" })),
        );
    }

    tracing::info!(category_id = %category_id, "violation category created");
    ok(&req.id, json!({ "categoryId": category_id, "name": name }))
}

fn handle_categories_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let category_id = match required_str(&req.params, "categoryId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let mut update = Update::default();
    match patch_required(&req.params, "name", |v| non_empty_text(v, "name")) {
        Ok(Some(name)) => update.set("name", SqlValue::Text(name)),
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

    match update.execute(conn, "violation_categories", &category_id) {
        Ok(0) => err(&req.id, "not_found", "category not found", None),
        Ok(_) => {
            tracing::info!(category_id = %category_id, "violation category updated");
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) if is_unique_violation(&e) => err(
            &req.id,
            "conflict",
            "another category already has that name",
            Some(json!({ "field": "name" })),
        ),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_categories_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let category_id = match required_str(&req.params, "categoryId") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    match db::row_exists(conn, "violation_categories", &category_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "category not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let type_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM violation_types WHERE category_id = ?",
        [&category_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if type_count > 0 {
        return err(
            &req.id,
            "in_use",
            "category still has violation types",
            Some(json!({ "typeCount": type_count })),
        );
    }

    if let Err(e) = conn.execute(
        "DELETE FROM violation_categories WHERE id = ?",
        [&category_id],
    ) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "violation_categories" })),
        );
    }

    tracing::info!(category_id = %category_id, "violation category deleted");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "violationCategories.list" => Some(handle_categories_list(state, req)),
        "violationCategories.get" => Some(handle_categories_get(state, req)),
        "violationCategories.create" => Some(handle_categories_create(state, req)),
        "violationCategories.update" => Some(handle_categories_update(state, req)),
        "violationCategories.delete" => Some(handle_categories_delete(state, req)),
        _ => None,
    }
}
