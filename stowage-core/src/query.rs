//! The hybrid query planner: `SearchQuery`, its operator set, and SQL
//! assembly against the `records` / `records_fts` schema `store.rs` owns.

use std::collections::BTreeMap;

use regex_lite::Regex;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::error::{Result, StowageError};

/// Closed operator set for structured filters. Kept
/// exhaustive on purpose: adding an operator means updating this match
/// everywhere it is handled, not silently falling through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
    In,
    Exists,
    NotExists,
}

/// One structured predicate over `json_extract(json_projection, '$.path')`.
#[derive(Debug, Clone)]
pub struct Filter {
    pub path: String,
    pub op: Operator,
    pub value: Value,
}

/// A hybrid search request: optional full-text term, structured filters,
/// label equality filters, sort, and paging.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub full_text: Option<String>,
    pub filters: Vec<Filter>,
    pub label_filters: BTreeMap<String, String>,
    pub order_by: Option<String>,
    pub ascending: bool,
    pub limit: u32,
    pub offset: u32,
}

/// One row of a `Search` result: the record id plus its relevance score
/// (BM25 when full-text is engaged, else 0.0).
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
}

static ORDER_BY_WHITELIST: &[&str] = &["created_at", "updated_at", "id"];

fn order_by_pattern() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.]+$").unwrap())
}

/// Assembled SQL plus its bound parameters, ready for
/// `Connection::prepare` + `query_map`.
pub struct Plan {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Build the `SELECT` plan for a [`SearchQuery`] against `records`
/// (optionally joined to `records_fts`): select columns, join FTS if
/// engaged, filter clauses, order by score or field, then limit/offset.
pub fn build_plan(query: &SearchQuery) -> Result<Plan> {
    let mut params: Vec<SqlValue> = Vec::new();
    let fts_engaged = query
        .full_text
        .as_ref()
        .map(|t| !t.is_empty())
        .unwrap_or(false);

    let score_expr = if fts_engaged {
        "bm25(records_fts)"
    } else {
        "0.0"
    };

    let mut sql = format!(
        "SELECT r.id, r.payload, r.json_projection, r.data_uri, r.labels, r.created_at, r.updated_at, {} AS score \
         FROM records r",
        score_expr
    );
    if fts_engaged {
        sql.push_str(" JOIN records_fts ON records_fts.rowid = r.rowid");
    }

    let mut where_clauses: Vec<String> = Vec::new();

    if let Some(term) = query.full_text.as_ref().filter(|t| !t.is_empty()) {
        where_clauses.push("records_fts.content MATCH ?".to_string());
        params.push(SqlValue::Text(term.clone()));
    }

    for filter in &query.filters {
        let clause = build_filter_clause(filter, &mut params)?;
        where_clauses.push(clause);
    }

    for (key, value) in &query.label_filters {
        where_clauses.push("json_extract(r.labels, ?) = ?".to_string());
        params.push(SqlValue::Text(format!("$.{}", key)));
        params.push(SqlValue::Text(value.clone()));
    }

    if !where_clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_clauses.join(" AND "));
    }

    let direction = if query.ascending { "ASC" } else { "DESC" };
    let order_expr = match query.order_by.as_deref() {
        Some("score") if fts_engaged => "score".to_string(),
        Some(path) if !path.is_empty() => {
            if !order_by_pattern().is_match(path) {
                return Err(StowageError::InvalidArgument(format!(
                    "order_by contains disallowed characters: {}",
                    path
                )));
            }
            if path.contains('.') {
                format!("json_extract(r.json_projection, '$.{}')", path)
            } else if ORDER_BY_WHITELIST.contains(&path) {
                format!("r.{}", path)
            } else {
                return Err(StowageError::InvalidArgument(format!(
                    "order_by '{}' is not in the whitelist {{created_at, updated_at, id}}",
                    path
                )));
            }
        }
        _ => "r.created_at".to_string(),
    };
    sql.push_str(&format!(" ORDER BY {} {}, r.id ASC", order_expr, direction));

    let limit = if query.limit == 0 { 100 } else { query.limit };
    sql.push_str(" LIMIT ? OFFSET ?");
    params.push(SqlValue::Integer(limit as i64));
    params.push(SqlValue::Integer(query.offset as i64));

    Ok(Plan { sql, params })
}

fn build_filter_clause(filter: &Filter, params: &mut Vec<SqlValue>) -> Result<String> {
    if !order_by_pattern().is_match(&filter.path) {
        return Err(StowageError::InvalidArgument(format!(
            "filter path contains disallowed characters: {}",
            filter.path
        )));
    }
    let extract = format!("json_extract(r.json_projection, '$.{}')", filter.path);
    let clause = match filter.op {
        Operator::Exists => format!("{} IS NOT NULL", extract),
        Operator::NotExists => format!("{} IS NULL", extract),
        Operator::Eq | Operator::Ne | Operator::Contains => {
            let s = json_scalar_to_string(&filter.value)?;
            params.push(SqlValue::Text(s));
            let op = match filter.op {
                Operator::Eq => "=",
                Operator::Ne => "!=",
                Operator::Contains => "LIKE",
                _ => unreachable!(),
            };
            if matches!(filter.op, Operator::Contains) {
                let idx = params.len() - 1;
                if let SqlValue::Text(s) = &params[idx] {
                    params[idx] = SqlValue::Text(format!("%{}%", s));
                }
                format!("{} {} ?", extract, op)
            } else {
                format!("{} {} ?", extract, op)
            }
        }
        Operator::Gt | Operator::Lt | Operator::Ge | Operator::Le => {
            let op = match filter.op {
                Operator::Gt => ">",
                Operator::Lt => "<",
                Operator::Ge => ">=",
                Operator::Le => "<=",
                _ => unreachable!(),
            };
            match &filter.value {
                Value::Number(n) => {
                    params.push(SqlValue::Real(n.as_f64().unwrap_or(0.0)));
                    format!("CAST({} AS REAL) {} ?", extract, op)
                }
                Value::String(s) => {
                    params.push(SqlValue::Text(s.clone()));
                    format!("{} {} ?", extract, op)
                }
                other => {
                    return Err(StowageError::InvalidArgument(format!(
                        "operator requires a numeric or string value, got: {}",
                        other
                    )));
                }
            }
        }
        Operator::In => {
            let items = filter.value.as_array().ok_or_else(|| {
                StowageError::InvalidArgument("IN operator requires an array value".to_string())
            })?;
            if items.is_empty() {
                return Ok("0".to_string());
            }
            let mut placeholders = Vec::with_capacity(items.len());
            for item in items {
                params.push(SqlValue::Text(json_scalar_to_string(item)?));
                placeholders.push("?".to_string());
            }
            format!("{} IN ({})", extract, placeholders.join(", "))
        }
    };
    Ok(clause)
}

fn json_scalar_to_string(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(StowageError::InvalidArgument(format!(
            "filter value must be a scalar, got: {}",
            other
        ))),
    }
}
