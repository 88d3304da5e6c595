use crate::debounce::Debouncer;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::router;
use crate::ipc::types::{AppState, Request, SearchScope};
use serde_json::{json, Value};
use std::time::Instant;

fn parse_scope(req: &Request) -> Result<SearchScope, serde_json::Value> {
    let Some(raw) = req.params.get("scope").and_then(|v| v.as_str()) else {
        return Err(err(&req.id, "bad_params", "missing scope", None));
    };
    SearchScope::parse(raw).ok_or_else(|| err(&req.id, "bad_params", "unknown scope", None))
}

fn handle_search_input(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let scope = match parse_scope(req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let term = match req.params.get("term") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(_) => return err(&req.id, "bad_params", "term must be string", None),
    };
    let listing = match setup::load_listing(conn, &state.config) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let debouncer = state
        .searches
        .entry(scope)
        .or_insert_with(|| Debouncer::new(listing.search_quiet()));
    debouncer.input(term, Instant::now());
    ok(
        &req.id,
        json!({
            "pending": true,
            "quietMs": debouncer.quiet().as_millis() as u64
        }),
    )
}

fn handle_search_settle(state: &mut AppState, req: &Request) -> serde_json::Value {
    if state.db.is_none() {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    }
    let scope = match parse_scope(req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let now = Instant::now();
    let Some(debouncer) = state.searches.get(&scope) else {
        return ok(&req.id, json!({ "settled": false, "pending": false }));
    };
    let Some(remaining) = debouncer.remaining(now) else {
        return ok(&req.id, json!({ "settled": false, "pending": false }));
    };
    let Some(term) = debouncer.ready(now).cloned() else {
        return ok(
            &req.id,
            json!({
                "settled": false,
                "pending": true,
                "remainingMs": remaining.as_millis() as u64
            }),
        );
    };

    // A new term always starts from the first page.
    let mut params = match &req.params {
        Value::Object(m) => m.clone(),
        _ => serde_json::Map::new(),
    };
    params.remove("scope");
    params.insert("page".into(), json!(1));
    params.insert("search".into(), json!(term));

    let resp = router::handle_request(state, req.derive(scope.list_method(), Value::Object(params)));
    if resp.get("ok").and_then(|v| v.as_bool()) != Some(true) {
        // The term stays pending so a corrected settle can run it.
        return resp;
    }
    if let Some(d) = state.searches.get_mut(&scope) {
        d.take();
    }
    tracing::debug!(scope = ?scope, term = %term, "search settled");
    ok(
        &req.id,
        json!({
            "settled": true,
            "term": term,
            "result": resp.get("result").cloned().unwrap_or(Value::Null)
        }),
    )
}

fn handle_search_cancel(state: &mut AppState, req: &Request) -> serde_json::Value {
    if state.db.is_none() {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    }
    let scope = match parse_scope(req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let cancelled = state
        .searches
        .get_mut(&scope)
        .and_then(|d| d.take())
        .is_some();
    ok(&req.id, json!({ "cancelled": cancelled }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "search.input" => Some(handle_search_input(state, req)),
        "search.settle" => Some(handle_search_settle(state, req)),
        "search.cancel" => Some(handle_search_cancel(state, req)),
        _ => None,
    }
}
