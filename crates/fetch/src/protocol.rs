//! Source protocols: how to ask for a page and how to read one back.
//!
//! The paginator is protocol-agnostic; a [`SourceProtocol`] supplies the
//! page-size and continuation arguments and turns stdout into a [`Page`].

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use gleaner_core::{Invocation, Record, Timestamp};

/// One page of source output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    /// Continuation token for the following page.
    pub next_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("output is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected output shape: {0}")]
    Shape(String),
}

pub trait SourceProtocol: Send + Sync {
    /// Full argument list for one page request.
    fn page_args(&self, base: &Invocation, page_size: u32, token: Option<&str>) -> Vec<String>;

    /// Parse one page of stdout.
    fn parse_page(&self, stdout: &str) -> Result<Page, ParseError>;
}

// ── reddit CLI ──────────────────────────────────────────────────────

/// The `reddit` CLI: `--per-page N` sizes a page, `--after TOKEN` continues.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedditCliProtocol;

const PAGE_SIZE_FLAGS: &[&str] = &["--per-page", "--limit"];
const AFTER_FLAG: &str = "--after";
const ITEM_KEYS: &[&str] = &["posts", "items", "children", "data"];
const TOKEN_KEYS: &[&str] = &["after", "next"];

impl SourceProtocol for RedditCliProtocol {
    fn page_args(&self, base: &Invocation, page_size: u32, token: Option<&str>) -> Vec<String> {
        let mut args = base.args.clone();
        if !base.has_any_flag(PAGE_SIZE_FLAGS) {
            args.push(PAGE_SIZE_FLAGS[0].to_string());
            args.push(page_size.to_string());
        }
        if let Some(token) = token {
            args.push(AFTER_FLAG.to_string());
            args.push(token.to_string());
        }
        args
    }

    fn parse_page(&self, stdout: &str) -> Result<Page, ParseError> {
        let value: Value = serde_json::from_str(stdout.trim())?;
        let (items, next_token) = match value {
            Value::Array(items) => (items, None),
            Value::Object(map) => split_listing(map)?,
            other => {
                return Err(ParseError::Shape(format!(
                    "expected array or object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let records = items.into_iter().filter_map(item_to_record).collect();
        Ok(Page {
            records,
            next_token,
        })
    }
}

/// Pull the item list and continuation token out of an object-shaped page.
///
/// Handles flat `{ "posts": [...], "after": "t3_x" }` objects as well as
/// reddit listings nested under `data`.
fn split_listing(mut map: Map<String, Value>) -> Result<(Vec<Value>, Option<String>), ParseError> {
    let token = TOKEN_KEYS
        .iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))
        .filter(|t| !t.is_empty())
        .map(String::from);

    for key in ITEM_KEYS {
        match map.remove(*key) {
            Some(Value::Array(items)) => return Ok((items, token)),
            Some(Value::Object(inner)) if *key == "data" => {
                let (items, inner_token) = split_listing(inner)?;
                return Ok((items, inner_token.or(token)));
            }
            _ => {}
        }
    }
    Err(ParseError::Shape(format!(
        "object has none of the item keys {:?}",
        ITEM_KEYS
    )))
}

fn item_to_record(item: Value) -> Option<Record> {
    // Listing children are wrapped as { "kind": "t3", "data": { ... } }.
    let item = match item {
        Value::Object(mut map) if map.get("kind").is_some_and(Value::is_string) => {
            match map.remove("data") {
                Some(data @ Value::Object(_)) => data,
                _ => Value::Object(map),
            }
        }
        other => other,
    };

    let id = match item.get("id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            warn!("dropping item without an id");
            return None;
        }
    };
    let created = match item.get("created_utc").and_then(created_seconds) {
        Some(ts) => ts,
        None => {
            warn!(id = %id, "dropping item without created_utc");
            return None;
        }
    };
    Some(Record::new(id, created, item))
}

fn created_seconds(v: &Value) -> Option<Timestamp> {
    v.as_i64().or_else(|| v.as_f64().map(|f| f.trunc() as Timestamp))
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
