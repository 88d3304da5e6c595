use crate::config::{Config, MAX_SEARCH_QUIET_MS};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;

#[derive(Clone, Copy)]
enum SetupSection {
    Listing,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "listing" => Some(Self::Listing),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Listing => "setup.listing",
        }
    }
}

/// Defaults shared by every paginated list screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingSetup {
    pub default_per_page: u32,
    pub sibling_count: u32,
    pub search_quiet_ms: u64,
}

impl ListingSetup {
    pub const MAX_SIBLING_COUNT: u32 = 5;

    pub fn search_quiet(&self) -> Duration {
        Duration::from_millis(self.search_quiet_ms)
    }
}

fn default_section(section: SetupSection, config: &Config) -> Value {
    match section {
        SetupSection::Listing => json!({
            "defaultPerPage": 10,
            "siblingCount": crate::pagination::DEFAULT_SIBLING_COUNT,
            "searchQuietMs": config.search_quiet.as_millis() as u64
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Listing => match k.as_str() {
                "defaultPerPage" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 100)?));
                }
                "siblingCount" => {
                    let max = i64::from(ListingSetup::MAX_SIBLING_COUNT);
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, max)?));
                }
                "searchQuietMs" => {
                    let max = MAX_SEARCH_QUIET_MS as i64;
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, max)?));
                }
                _ => return Err(format!("unknown listing field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(
    conn: &rusqlite::Connection,
    config: &Config,
    section: SetupSection,
) -> anyhow::Result<Value> {
    let mut current = default_section(section, config);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed saved values fall back to defaults.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

pub fn load_listing(conn: &rusqlite::Connection, config: &Config) -> anyhow::Result<ListingSetup> {
    let v = load_section(conn, config, SetupSection::Listing)?;
    Ok(serde_json::from_value(v)?)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let listing = match load_section(conn, &state.config, SetupSection::Listing) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "listing": listing }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, &state.config, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    // Debouncers pick up a new quiet window right away.
    if let Some(ms) = current.get("searchQuietMs").and_then(|v| v.as_u64()) {
        for d in state.searches.values_mut() {
            d.set_quiet(Duration::from_millis(ms));
        }
    }
    tracing::info!(section = section_raw, "setup updated");
    let mut result = json!({ "ok": true });
    result[section_raw] = current;
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
