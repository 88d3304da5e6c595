use chrono::NaiveDate;
use rusqlite::types::Value as SqlValue;
use serde_json::{json, Value};

use crate::ipc::handlers::setup::ListingSetup;
use crate::pagination::{self, PaginationState, RangeMemo};

pub const MAX_PER_PAGE: u32 = 100;

pub fn required_str(params: &Value, key: &str) -> Result<String, String> {
    let Some(v) = params.get(key) else {
        return Err(format!("missing {}", key));
    };
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    Ok(s.to_string())
}

/// Optional string param; blank strings count as absent.
pub fn optional_str(params: &Value, key: &str) -> Result<Option<String>, String> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
            let s = s.trim();
            Ok(if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            })
        }
    }
}

pub fn optional_bool(params: &Value, key: &str) -> Result<Option<bool>, String> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| format!("{} must be boolean", key)),
    }
}

pub fn optional_i64_range(
    params: &Value,
    key: &str,
    min: i64,
    max: i64,
) -> Result<Option<i64>, String> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let n = v
                .as_i64()
                .ok_or_else(|| format!("{} must be integer", key))?;
            if !(min..=max).contains(&n) {
                return Err(format!("{} must be in {}..={}", key, min, max));
            }
            Ok(Some(n))
        }
    }
}

/// Page-like counters never fail: anything that is not a non-negative
/// integer reads as 0 and gets clamped by the caller.
pub fn lenient_u32(params: &Value, key: &str) -> Option<u32> {
    let v = params.get(key)?;
    if v.is_null() {
        return None;
    }
    Some(
        v.as_u64()
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(0),
    )
}

pub fn parse_date(s: &str, key: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| format!("{} must be a YYYY-MM-DD date", key))
}

pub fn optional_date(params: &Value, key: &str) -> Result<Option<NaiveDate>, String> {
    match optional_str(params, key)? {
        Some(s) => parse_date(&s, key).map(Some),
        None => Ok(None),
    }
}

pub fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub page: u32,
    pub per_page: u32,
    pub sibling_count: u32,
    pub search: Option<String>,
}

impl ListQuery {
    pub fn from_params(params: &Value, listing: &ListingSetup) -> Result<Self, String> {
        let page = lenient_u32(params, "page").unwrap_or(1);
        let per_page = lenient_u32(params, "perPage")
            .unwrap_or(listing.default_per_page)
            .clamp(1, MAX_PER_PAGE);
        let sibling_count = lenient_u32(params, "siblingCount")
            .unwrap_or(listing.sibling_count)
            .min(ListingSetup::MAX_SIBLING_COUNT);
        let search = optional_str(params, "search")?;
        Ok(Self {
            page,
            per_page,
            sibling_count,
            search,
        })
    }

    /// `LIKE` pattern for the search term, escaped with `\`.
    pub fn like_pattern(&self) -> Option<String> {
        self.search.as_ref().map(|s| {
            let mut out = String::with_capacity(s.len() + 2);
            out.push('%');
            for ch in s.chars() {
                if matches!(ch, '%' | '_' | '\\') {
                    out.push('\\');
                }
                out.push(ch);
            }
            out.push('%');
            out
        })
    }
}

/// A resolved page of a list: the clamped page, its SQL window and the
/// `pagination` object returned to the UI.
pub struct PageSlice {
    pub limit: i64,
    pub offset: i64,
    pub meta: Value,
}

pub fn page_slice(memo: &mut RangeMemo, q: &ListQuery, total_items: u64) -> PageSlice {
    let total_page = pagination::total_pages(total_items, q.per_page);
    let page = pagination::clamp_page(q.page, total_page);
    let range = memo.get(PaginationState {
        current_page: page,
        total_page,
        sibling_count: q.sibling_count,
    });
    let visible = pagination::should_render(total_page, &range);
    PageSlice {
        limit: i64::from(q.per_page),
        offset: i64::try_from(pagination::page_offset(page, q.per_page)).unwrap_or(i64::MAX),
        meta: json!({
            "page": page,
            "perPage": q.per_page,
            "totalItems": total_items,
            "totalPage": total_page,
            "siblingCount": q.sibling_count,
            "range": range,
            "visible": visible,
        }),
    }
}

/// Accumulates `WHERE` clauses and their bound values for list queries.
#[derive(Default)]
pub struct Filter {
    clauses: Vec<String>,
    pub values: Vec<SqlValue>,
}

impl Filter {
    pub fn push(&mut self, clause: &str, value: SqlValue) {
        self.clauses.push(clause.to_string());
        self.values.push(value);
    }

    pub fn push_text(&mut self, clause: &str, value: &str) {
        self.push(clause, SqlValue::Text(value.to_string()));
    }

    /// One clause matching any of the columns against the same pattern.
    pub fn push_search(&mut self, columns: &[&str], pattern: &str) {
        let parts: Vec<String> = columns
            .iter()
            .map(|c| format!("{} LIKE ? ESCAPE '\\'", c))
            .collect();
        self.clauses.push(format!("({})", parts.join(" OR ")));
        for _ in columns {
            self.values.push(SqlValue::Text(pattern.to_string()));
        }
    }

    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn with_window(&self, slice: &PageSlice) -> Vec<SqlValue> {
        let mut v = self.values.clone();
        v.push(SqlValue::Integer(slice.limit));
        v.push(SqlValue::Integer(slice.offset));
        v
    }
}

/// A field in an update request: absent, explicitly `null`, or a new value.
#[derive(Debug, PartialEq)]
pub enum Patch<T> {
    Keep,
    Clear,
    Set(T),
}

pub fn patch_field<T, F>(params: &Value, key: &str, parse: F) -> Result<Patch<T>, String>
where
    F: FnOnce(&Value) -> Result<T, String>,
{
    match params.get(key) {
        None => Ok(Patch::Keep),
        Some(Value::Null) => Ok(Patch::Clear),
        Some(v) => parse(v).map(Patch::Set),
    }
}

/// Like `patch_field`, for columns that cannot be cleared.
pub fn patch_required<T, F>(params: &Value, key: &str, parse: F) -> Result<Option<T>, String>
where
    F: FnOnce(&Value) -> Result<T, String>,
{
    match patch_field(params, key, parse)? {
        Patch::Keep => Ok(None),
        Patch::Clear => Err(format!("{} must not be null", key)),
        Patch::Set(v) => Ok(Some(v)),
    }
}

pub fn non_empty_text(v: &Value, key: &str) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    Ok(s.to_string())
}

/// Free-text column patch; a blank string clears the column.
pub fn text_patch(params: &Value, key: &str, max_len: usize) -> Result<Patch<String>, String> {
    let patch = patch_field(params, key, |v| {
        let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
        let s = s.trim();
        if s.chars().count() > max_len {
            return Err(format!("{} length must be <= {}", key, max_len));
        }
        Ok(s.to_string())
    })?;
    Ok(match patch {
        Patch::Set(s) if s.is_empty() => Patch::Clear,
        other => other,
    })
}

impl<T> Patch<T> {
    /// The value to insert for a new row.
    pub fn into_option(self) -> Option<T> {
        match self {
            Patch::Set(v) => Some(v),
            Patch::Keep | Patch::Clear => None,
        }
    }
}

/// `SET` clauses of a single-row `UPDATE ... WHERE id = ?`.
#[derive(Default)]
pub struct Update {
    sets: Vec<String>,
    values: Vec<SqlValue>,
}

impl Update {
    pub fn set(&mut self, column: &str, value: SqlValue) {
        self.sets.push(format!("{} = ?", column));
        self.values.push(value);
    }

    pub fn patch_text(&mut self, column: &str, patch: Patch<String>) {
        match patch {
            Patch::Keep => {}
            Patch::Clear => self.set(column, SqlValue::Null),
            Patch::Set(s) => self.set(column, SqlValue::Text(s)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn execute(
        self,
        conn: &rusqlite::Connection,
        table: &str,
        id: &str,
    ) -> rusqlite::Result<usize> {
        let sql = format!("UPDATE {} SET {} WHERE id = ?", table, self.sets.join(", "));
        let mut values = self.values;
        values.push(SqlValue::Text(id.to_string()));
        conn.execute(&sql, rusqlite::params_from_iter(values))
    }
}

pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing() -> ListingSetup {
        ListingSetup {
            default_per_page: 10,
            sibling_count: 1,
            search_quiet_ms: 500,
        }
    }

    #[test]
    fn list_query_defaults_and_clamps() {
        let q = ListQuery::from_params(&json!({}), &listing()).expect("query");
        assert_eq!(q.page, 1);
        assert_eq!(q.per_page, 10);
        assert_eq!(q.sibling_count, 1);
        assert_eq!(q.search, None);

        let q = ListQuery::from_params(
            &json!({ "page": -3, "perPage": 1000, "siblingCount": 2.5, "search": "  " }),
            &listing(),
        )
        .expect("query");
        assert_eq!(q.page, 0);
        assert_eq!(q.per_page, MAX_PER_PAGE);
        assert_eq!(q.sibling_count, 0);
        assert_eq!(q.search, None);
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        let q = ListQuery {
            page: 1,
            per_page: 10,
            sibling_count: 1,
            search: Some("50%_a\\b".into()),
        };
        assert_eq!(q.like_pattern().as_deref(), Some("%50\\%\\_a\\\\b%"));
    }

    #[test]
    fn page_slice_clamps_past_the_end() {
        let mut memo = RangeMemo::default();
        let q = ListQuery {
            page: 9,
            per_page: 10,
            sibling_count: 1,
            search: None,
        };
        let s = page_slice(&mut memo, &q, 25);
        assert_eq!(s.meta["page"], 3);
        assert_eq!(s.meta["totalPage"], 3);
        assert_eq!(s.offset, 20);
        assert_eq!(s.meta["visible"], true);

        let empty = page_slice(&mut memo, &q, 0);
        assert_eq!(empty.meta["page"], 1);
        assert_eq!(empty.meta["range"], json!([]));
        assert_eq!(empty.meta["visible"], false);
    }

    #[test]
    fn filter_builds_where_clause() {
        let mut f = Filter::default();
        assert_eq!(f.where_sql(), "");
        f.push_text("s.class_id = ?", "c1");
        f.push_search(&["s.full_name", "s.student_code"], "%an%");
        assert_eq!(
            f.where_sql(),
            "WHERE s.class_id = ? AND (s.full_name LIKE ? ESCAPE '\\' OR s.student_code LIKE ? ESCAPE '\\')"
        );
        assert_eq!(f.values.len(), 3);
    }

    #[test]
    fn patch_distinguishes_absent_null_and_value() {
        let p = json!({ "note": null, "name": "x" });
        let parse = |v: &Value| non_empty_text(v, "k");
        assert_eq!(patch_field(&p, "missing", parse), Ok(Patch::Keep));
        assert_eq!(patch_field(&p, "note", parse), Ok(Patch::Clear));
        assert_eq!(patch_field(&p, "name", parse), Ok(Patch::Set("x".into())));
        assert!(patch_required(&p, "note", parse).is_err());
        assert_eq!(patch_required(&p, "missing", parse), Ok(None));

        let t = json!({ "a": "  ", "b": "ok", "c": "xxxx" });
        assert_eq!(text_patch(&t, "a", 3), Ok(Patch::Clear));
        assert_eq!(text_patch(&t, "b", 3), Ok(Patch::Set("ok".into())));
        assert!(text_patch(&t, "c", 3).is_err());
        assert_eq!(text_patch(&t, "b", 3).map(Patch::into_option), Ok(Some("ok".into())));
    }

    #[test]
    fn required_and_optional_strings() {
        let p = json!({ "name": "  10A ", "blank": " ", "num": 3 });
        assert_eq!(required_str(&p, "name").as_deref(), Ok("10A"));
        assert!(required_str(&p, "blank").is_err());
        assert!(required_str(&p, "missing").is_err());
        assert_eq!(optional_str(&p, "blank"), Ok(None));
        assert!(optional_str(&p, "num").is_err());
    }
}
