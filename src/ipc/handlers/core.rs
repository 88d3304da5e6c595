use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::ListingSetup;
use crate::ipc::helpers::lenient_u32;
use crate::ipc::types::{AppState, Request};
use crate::pagination::{self, PaginationState, DEFAULT_SIBLING_COUNT};
use serde_json::json;
use std::path::{Path, PathBuf};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

/// Open (or create) the workspace database and make it current.
pub fn open_workspace(state: &mut AppState, path: &Path) -> anyhow::Result<()> {
    let conn = db::open_db(path)?;
    // Pending search input belongs to the previous workspace.
    for d in state.searches.values_mut() {
        d.take();
    }
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    tracing::info!(workspace = %path.display(), "workspace opened");
    Ok(())
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match open_workspace(state, &path) {
        Ok(()) => ok(&req.id, json!({ "workspacePath": path.to_string_lossy() })),
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_pagination_range(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(total_page) = lenient_u32(&req.params, "totalPage") else {
        return err(&req.id, "bad_params", "missing totalPage", None);
    };
    let current_page = lenient_u32(&req.params, "currentPage").unwrap_or(1);
    let sibling_count = lenient_u32(&req.params, "siblingCount")
        .unwrap_or(DEFAULT_SIBLING_COUNT)
        .min(ListingSetup::MAX_SIBLING_COUNT);

    let range = state.ranges.get(PaginationState {
        current_page,
        total_page,
        sibling_count,
    });
    ok(
        &req.id,
        json!({
            "currentPage": pagination::clamp_page(current_page, total_page),
            "totalPage": total_page,
            "siblingCount": sibling_count,
            "visible": pagination::should_render(total_page, &range),
            "range": range,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "pagination.range" => Some(handle_pagination_range(state, req)),
        _ => None,
    }
}
