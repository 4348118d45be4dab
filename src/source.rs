//! ERP row extracts.
//!
//! The dashboard queries the ERP by IDO (collection) name with an optional
//! property list, filter, ordering and record cap. The workspace source
//! answers those queries from extracts saved under `<workspace>/sources/`.

use crate::csv::parse_csv_record;
use crate::staging::model::RawRow;
use anyhow::{bail, Context};
use serde_json::Value;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// `limit` value meaning "every row".
pub const NO_LIMIT: i64 = -1;

#[derive(Debug, Clone, PartialEq)]
pub struct RowQuery {
    pub ido_name: String,
    pub properties: Vec<String>,
    pub filter: Option<String>,
    pub order_by: Option<String>,
    pub limit: i64,
}

impl RowQuery {
    pub fn all(ido_name: impl Into<String>) -> Self {
        Self {
            ido_name: ido_name.into(),
            properties: Vec::new(),
            filter: None,
            order_by: None,
            limit: NO_LIMIT,
        }
    }
}

/// Malformed query text. Callers report these as bad parameters rather than
/// source failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("invalid ido name: {0}")]
    IdoName(String),
    #[error("invalid filter at offset {offset}: {message}")]
    Filter { offset: usize, message: String },
    #[error("invalid order by clause: {0}")]
    OrderBy(String),
    #[error("invalid limit {0}")]
    Limit(i64),
}

pub trait RowSource {
    fn fetch_raw_rows(&self, query: &RowQuery) -> anyhow::Result<Vec<RawRow>>;
}

pub struct WorkspaceFileSource {
    dir: PathBuf,
}

impl WorkspaceFileSource {
    pub fn new(workspace: &Path) -> Self {
        Self {
            dir: workspace.join("sources"),
        }
    }

    fn read_extract(&self, ido_name: &str) -> anyhow::Result<Vec<RawRow>> {
        let json_path = self.dir.join(format!("{ido_name}.json"));
        if json_path.is_file() {
            return read_json_extract(&json_path);
        }
        let csv_path = self.dir.join(format!("{ido_name}.csv"));
        if csv_path.is_file() {
            return read_csv_extract(&csv_path);
        }
        bail!(
            "no extract for {} in {}",
            ido_name,
            self.dir.to_string_lossy()
        )
    }
}

impl RowSource for WorkspaceFileSource {
    fn fetch_raw_rows(&self, query: &RowQuery) -> anyhow::Result<Vec<RawRow>> {
        let valid_name = !query.ido_name.is_empty()
            && query
                .ido_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !query.ido_name.starts_with('.');
        if !valid_name {
            return Err(QueryError::IdoName(query.ido_name.clone()).into());
        }
        if query.limit < NO_LIMIT {
            return Err(QueryError::Limit(query.limit).into());
        }
        let conditions = match query.filter.as_deref() {
            Some(f) if !f.trim().is_empty() => parse_filter(f)?,
            _ => Vec::new(),
        };
        let order = match query.order_by.as_deref() {
            Some(o) if !o.trim().is_empty() => parse_order_by(o)?,
            _ => Vec::new(),
        };

        let rows = self.read_extract(&query.ido_name)?;
        let read = rows.len();
        let mut rows: Vec<RawRow> = rows
            .into_iter()
            .filter(|r| conditions.iter().all(|c| c.matches(r)))
            .collect();
        if !order.is_empty() {
            rows.sort_by(|a, b| compare_rows(a, b, &order));
        }
        if query.limit != NO_LIMIT {
            rows.truncate(usize::try_from(query.limit).unwrap_or(usize::MAX));
        }
        if !query.properties.is_empty() {
            rows = rows
                .into_iter()
                .map(|r| project(&r, &query.properties))
                .collect();
        }

        info!(ido = %query.ido_name, read, returned = rows.len(), "fetched rows");
        Ok(rows)
    }
}

fn read_json_extract(path: &Path) -> anyhow::Result<Vec<RawRow>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse {}", path.to_string_lossy()))?;
    let Value::Array(items) = value else {
        bail!("{} is not a JSON array", path.to_string_lossy());
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(map) => Ok(map),
            _ => bail!("{} item {} is not an object", path.to_string_lossy(), i),
        })
        .collect()
}

fn read_csv_extract(path: &Path) -> anyhow::Result<Vec<RawRow>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return Ok(Vec::new());
    };
    let header: Vec<String> = parse_csv_record(header.trim_start_matches('\u{feff}'))
        .into_iter()
        .map(|h| h.trim().to_string())
        .collect();
    debug!(path = %path.to_string_lossy(), columns = header.len(), "reading csv extract");
    Ok(lines
        .map(|line| {
            let mut cells = parse_csv_record(line).into_iter();
            header
                .iter()
                .map(|h| {
                    let v = cells.next().map(Value::String).unwrap_or(Value::Null);
                    (h.clone(), v)
                })
                .collect()
        })
        .collect())
}

fn lookup<'a>(row: &'a RawRow, name: &str) -> Option<&'a Value> {
    row.get(name).or_else(|| {
        row.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    })
}

fn project(row: &RawRow, properties: &[String]) -> RawRow {
    properties
        .iter()
        .map(|p| (p.clone(), lookup(row, p).cloned().unwrap_or(Value::Null)))
        .collect()
}

fn text_of(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOp {
    Eq,
    Ne,
    Like,
}

#[derive(Debug, Clone, PartialEq)]
struct Condition {
    field: String,
    op: FilterOp,
    value: String,
}

impl Condition {
    fn matches(&self, row: &RawRow) -> bool {
        let actual = text_of(lookup(row, &self.field));
        match self.op {
            FilterOp::Eq => actual.eq_ignore_ascii_case(&self.value),
            FilterOp::Ne => !actual.eq_ignore_ascii_case(&self.value),
            FilterOp::Like => like_match(
                &actual.to_ascii_lowercase(),
                &self.value.to_ascii_lowercase(),
            ),
        }
    }
}

/// SQL LIKE with `%` and `_` wildcards.
fn like_match(text: &str, pattern: &str) -> bool {
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    let (mut ti, mut pi) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '_' || p[pi] == t[ti]) {
            ti += 1;
            pi += 1;
        } else if pi < p.len() && p[pi] == '%' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '%')
}

struct FilterParser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> FilterParser<'a> {
    fn error(&self, message: impl Into<String>) -> QueryError {
        QueryError::Filter {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn word(&mut self) -> &'a str {
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'))
            .unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn op(&mut self) -> Result<FilterOp, QueryError> {
        let rest = self.rest();
        for (token, op) in [("<>", FilterOp::Ne), ("!=", FilterOp::Ne), ("=", FilterOp::Eq)] {
            if rest.starts_with(token) {
                self.pos += token.len();
                return Ok(op);
            }
        }
        let start = self.pos;
        if self.word().eq_ignore_ascii_case("like") {
            return Ok(FilterOp::Like);
        }
        self.pos = start;
        Err(self.error("expected =, <> or LIKE"))
    }

    fn literal(&mut self) -> Result<String, QueryError> {
        if !self.rest().starts_with('\'') {
            let w = self.word();
            if w.is_empty() {
                return Err(self.error("expected a quoted value"));
            }
            return Ok(w.to_string());
        }
        self.pos += 1;
        let mut out = String::new();
        let mut chars = self.rest().char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    out.push('\'');
                    chars.next();
                    continue;
                }
                self.pos += i + 1;
                return Ok(out);
            }
            out.push(c);
        }
        Err(self.error("unterminated quoted value"))
    }

    fn parse(mut self) -> Result<Vec<Condition>, QueryError> {
        let mut out = Vec::new();
        loop {
            self.skip_ws();
            let field = self.word();
            if field.is_empty() {
                return Err(self.error("expected a property name"));
            }
            self.skip_ws();
            let op = self.op()?;
            self.skip_ws();
            let value = self.literal()?;
            out.push(Condition {
                field: field.to_string(),
                op,
                value,
            });
            self.skip_ws();
            if self.rest().is_empty() {
                return Ok(out);
            }
            if !self.word().eq_ignore_ascii_case("and") {
                return Err(self.error("expected AND"));
            }
        }
    }
}

fn parse_filter(src: &str) -> Result<Vec<Condition>, QueryError> {
    FilterParser { src, pos: 0 }.parse()
}

fn parse_order_by(src: &str) -> Result<Vec<(String, bool)>, QueryError> {
    src.split(',')
        .map(|part| {
            let mut words = part.split_whitespace();
            let field = words
                .next()
                .ok_or_else(|| QueryError::OrderBy(src.to_string()))?;
            let descending = match words.next().map(|w| w.to_ascii_uppercase()) {
                None => false,
                Some(w) if w == "ASC" => false,
                Some(w) if w == "DESC" => true,
                Some(_) => return Err(QueryError::OrderBy(src.to_string())),
            };
            if words.next().is_some() {
                return Err(QueryError::OrderBy(src.to_string()));
            }
            Ok((field.to_string(), descending))
        })
        .collect()
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => match (as_number(x), as_number(y)) {
            (Some(nx), Some(ny)) => nx.partial_cmp(&ny).unwrap_or(Ordering::Equal),
            _ => text_of(Some(x)).cmp(&text_of(Some(y))),
        },
    }
}

fn compare_rows(a: &RawRow, b: &RawRow, order: &[(String, bool)]) -> Ordering {
    for (field, descending) in order {
        let ord = compare_values(lookup(a, field), lookup(b, field));
        let ord = if *descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_workspace(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(p.join("sources")).expect("create temp dir");
        p
    }

    fn seeded() -> (PathBuf, WorkspaceFileSource) {
        let ws = temp_workspace("stagingd-source");
        let items = json!([
            { "Item": "AX-100", "Description": "Bracket", "Qty": 5, "Whse": "MAIN" },
            { "Item": "AX-200", "Description": "Plate", "Qty": 12, "Whse": "MAIN" },
            { "Item": "BX-100", "Description": "Bolt, hex", "Qty": 2, "Whse": "EAST" },
            { "Item": "CX-900", "Description": null, "Qty": 40, "Whse": "MAIN" }
        ]);
        std::fs::write(ws.join("sources/SLItems.json"), items.to_string()).expect("write json");
        std::fs::write(
            ws.join("sources/SLJobmatls.csv"),
            "Job,Suffix,Item,Qty\nJ-1,0,AX-100,3\n\nJ-2,1,\"BX-100\",\n",
        )
        .expect("write csv");
        let source = WorkspaceFileSource::new(&ws);
        (ws, source)
    }

    fn items(rows: &[RawRow]) -> Vec<&str> {
        rows.iter().filter_map(|r| r["Item"].as_str()).collect()
    }

    #[test]
    fn filter_order_limit_and_projection() {
        let (_ws, source) = seeded();
        let query = RowQuery {
            ido_name: "SLItems".into(),
            properties: vec!["Item".into(), "qty".into(), "UnitCost".into()],
            filter: Some("Whse = 'MAIN' AND Item LIKE 'a%'".into()),
            order_by: Some("Qty DESC".into()),
            limit: 1,
        };
        let rows = source.fetch_raw_rows(&query).expect("fetch");
        assert_eq!(rows.len(), 1);
        assert_eq!(
            Value::Object(rows[0].clone()),
            json!({ "Item": "AX-200", "qty": 12, "UnitCost": null })
        );
    }

    #[test]
    fn no_limit_returns_everything_in_file_order() {
        let (_ws, source) = seeded();
        let rows = source.fetch_raw_rows(&RowQuery::all("SLItems")).expect("fetch");
        assert_eq!(items(&rows), vec!["AX-100", "AX-200", "BX-100", "CX-900"]);
    }

    #[test]
    fn numeric_ordering_and_not_equal() {
        let (_ws, source) = seeded();
        let mut query = RowQuery::all("SLItems");
        query.filter = Some("Whse <> 'east'".into());
        query.order_by = Some("Qty".into());
        let rows = source.fetch_raw_rows(&query).expect("fetch");
        assert_eq!(items(&rows), vec!["AX-100", "AX-200", "CX-900"]);
    }

    #[test]
    fn csv_extract_uses_header_names() {
        let (_ws, source) = seeded();
        let rows = source.fetch_raw_rows(&RowQuery::all("SLJobmatls")).expect("fetch");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["Item"], json!("BX-100"));
        assert_eq!(rows[1]["Qty"], json!(""));
        assert_eq!(rows[0]["Suffix"], json!("0"));
    }

    #[test]
    fn malformed_queries_are_query_errors() {
        let (_ws, source) = seeded();
        let mut query = RowQuery::all("SLItems");
        query.filter = Some("Whse = 'MAIN".into());
        let err = source.fetch_raw_rows(&query).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<QueryError>(),
            Some(QueryError::Filter { .. })
        ));

        let err = source
            .fetch_raw_rows(&RowQuery::all("../secrets"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<QueryError>(),
            Some(QueryError::IdoName(_))
        ));

        let mut query = RowQuery::all("SLItems");
        query.order_by = Some("Qty SIDEWAYS".into());
        assert!(source.fetch_raw_rows(&query).is_err());

        let missing = source.fetch_raw_rows(&RowQuery::all("SLNothing")).unwrap_err();
        assert!(missing.downcast_ref::<QueryError>().is_none());
    }

    #[test]
    fn like_wildcards() {
        assert!(like_match("ax-100", "ax%"));
        assert!(like_match("ax-100", "%-1_0"));
        assert!(like_match("ax-100", "%"));
        assert!(!like_match("ax-100", "bx%"));
        assert!(!like_match("ax", "ax_"));
    }

    #[test]
    fn quoted_values_escape_single_quotes() {
        let conditions = parse_filter("Description = 'O''Brien' and Qty = 4").expect("parse");
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].value, "O'Brien");
        assert_eq!(conditions[1].value, "4");
        assert_eq!(conditions[1].op, FilterOp::Eq);
    }
}
