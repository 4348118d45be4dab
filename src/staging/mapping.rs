use super::error::MapperFault;
use super::model::{MappedRow, RawRow, ValidationResult};
use super::pipeline::Mapper;
use anyhow::bail;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Text,
    Integer,
    Decimal,
    Boolean,
    Date,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRule {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_len: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Field mapping for one ERP entity, stored as JSON in workspace settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingProfile {
    pub name: String,
    pub ido: String,
    pub fields: Vec<FieldRule>,
    #[serde(default)]
    pub key_fields: Vec<String>,
    #[serde(default)]
    pub warn_empty: Vec<String>,
    /// normalized record key -> id of a record committed earlier
    #[serde(skip)]
    known_records: HashMap<String, String>,
}

impl MappingProfile {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            bail!("profile name must not be empty");
        }
        if self.ido.trim().is_empty() {
            bail!("profile {} has no ido", self.name);
        }
        if self.fields.is_empty() {
            bail!("profile {} has no fields", self.name);
        }
        let mut targets = HashSet::new();
        for rule in &self.fields {
            if rule.source.trim().is_empty() || rule.target.trim().is_empty() {
                bail!("profile {} has a field with an empty source or target", self.name);
            }
            if !targets.insert(rule.target.as_str()) {
                bail!("profile {} maps {} twice", self.name, rule.target);
            }
        }
        for key in self.key_fields.iter().chain(self.warn_empty.iter()) {
            if !targets.contains(key.as_str()) {
                bail!("profile {} references unknown field {}", self.name, key);
            }
        }
        Ok(())
    }

    pub fn with_known_records(mut self, known: HashMap<String, String>) -> Self {
        self.known_records = known
            .into_iter()
            .map(|(k, v)| (normalize_key(&k), v))
            .collect();
        self
    }

    /// Source property names, for projecting the ERP query.
    pub fn source_properties(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.source.clone()).collect()
    }
}

fn normalize_key(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

fn lookup<'a>(raw: &'a RawRow, name: &str) -> Option<&'a Value> {
    raw.get(name).or_else(|| {
        raw.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    })
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn coerce_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

fn coerce_decimal(value: &Value) -> Option<Number> {
    let f = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    Number::from_f64(f)
}

fn coerce_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "y" => Some(true),
            "0" | "false" | "no" | "n" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Accepts `YYYY-MM-DD`, ISO datetimes and the ERP's `YYYYMMDD HH:MM:SS.fff`.
fn coerce_date(value: &Value) -> Option<String> {
    let s = value.as_str()?.trim();
    let date = s
        .get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .or_else(|| {
            s.get(..8)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y%m%d").ok())
        })?;
    Some(date.format("%Y-%m-%d").to_string())
}

impl Mapper for MappingProfile {
    fn map_row(&self, raw: &RawRow) -> Result<(MappedRow, ValidationResult), MapperFault> {
        let mut fields = Map::new();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for rule in &self.fields {
            let target = rule.target.as_str();
            let value = lookup(raw, &rule.source)
                .filter(|v| !is_empty(v))
                .or(rule.default.as_ref());
            let Some(value) = value else {
                if rule.required {
                    errors.push(format!("{target} is required"));
                } else if self.warn_empty.iter().any(|w| w == target) {
                    warnings.push(format!("{target} is empty"));
                }
                fields.insert(target.to_string(), Value::Null);
                continue;
            };

            let mapped = match rule.kind {
                FieldKind::Text => {
                    let text = coerce_text(value);
                    if matches!(value, Value::String(s) if s.len() != text.len()) {
                        warnings.push(format!("{target} was trimmed"));
                    }
                    match rule.max_len {
                        Some(max) if text.chars().count() > max => {
                            errors.push(format!("{target} exceeds {max} characters"));
                            None
                        }
                        _ => Some(Value::String(text)),
                    }
                }
                FieldKind::Integer => coerce_integer(value).map(Value::from).or_else(|| {
                    errors.push(format!("{target} is not an integer"));
                    None
                }),
                FieldKind::Decimal => coerce_decimal(value).map(Value::Number).or_else(|| {
                    errors.push(format!("{target} is not a number"));
                    None
                }),
                FieldKind::Boolean => coerce_boolean(value).map(Value::Bool).or_else(|| {
                    errors.push(format!("{target} is not a yes/no value"));
                    None
                }),
                FieldKind::Date => coerce_date(value).map(Value::String).or_else(|| {
                    errors.push(format!("{target} is not a valid date"));
                    None
                }),
            };
            fields.insert(target.to_string(), mapped.unwrap_or(Value::Null));
        }

        let record_key = if self.key_fields.is_empty() {
            None
        } else {
            self.key_fields
                .iter()
                .map(|k| fields.get(k).filter(|v| !is_empty(v)).map(coerce_text))
                .collect::<Option<Vec<_>>>()
                .map(|parts| parts.join("|"))
        };

        Ok((
            MappedRow { fields, record_key },
            ValidationResult::from_messages(errors, warnings),
        ))
    }

    fn matched_reference(&self, mapped: &MappedRow) -> Option<String> {
        let key = mapped.record_key.as_deref()?;
        self.known_records.get(&normalize_key(key)).cloned()
    }
}
