use std::collections::HashMap;
use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::Config;
use crate::debounce::Debouncer;
use crate::pagination::RangeMemo;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Request {
    /// Same request id, different method and params.
    pub fn derive(&self, method: &str, params: serde_json::Value) -> Request {
        Request {
            id: self.id.clone(),
            method: method.to_string(),
            params,
        }
    }
}

/// List screens that accept debounced search input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchScope {
    Classes,
    Students,
    ViolationCategories,
    ViolationTypes,
    Violations,
}

impl SearchScope {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "classes" => Some(Self::Classes),
            "students" => Some(Self::Students),
            "violationCategories" => Some(Self::ViolationCategories),
            "violationTypes" => Some(Self::ViolationTypes),
            "violations" => Some(Self::Violations),
            _ => None,
        }
    }

    pub fn list_method(self) -> &'static str {
        match self {
            Self::Classes => "classes.list",
            Self::Students => "students.list",
            Self::ViolationCategories => "violationCategories.list",
            Self::ViolationTypes => "violationTypes.list",
            Self::Violations => "violations.list",
        }
    }
}

pub struct AppState {
    pub config: Config,
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub ranges: RangeMemo,
    pub searches: HashMap<SearchScope, Debouncer<String>>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            workspace: None,
            db: None,
            ranges: RangeMemo::default(),
            searches: HashMap::new(),
        }
    }
}
