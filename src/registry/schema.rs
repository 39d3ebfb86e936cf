//! Argument schemas derived from declared parameter lists.
//!
//! Each action declares its parameters once at registration. The resulting
//! `ArgsSchema` is cached on the registered action and reused for every
//! call: it validates candidate keyword arguments strictly (no coercion) and
//! renders a JSON Schema for documentation layers.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Declared type of a parameter or return value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    Any,
    Null,
    Bool,
    Int,
    Float,
    Str,
    List(Box<TypeTag>),
    /// String-keyed mapping with uniform value type
    Dict(Box<TypeTag>),
    /// Value or null
    Optional(Box<TypeTag>),
    /// Arbitrary JSON object
    Object,
}

impl TypeTag {
    pub fn list(inner: TypeTag) -> Self {
        Self::List(Box::new(inner))
    }

    pub fn dict(inner: TypeTag) -> Self {
        Self::Dict(Box::new(inner))
    }

    pub fn optional(inner: TypeTag) -> Self {
        Self::Optional(Box::new(inner))
    }

    /// Strict check of a JSON value against this type
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            TypeTag::Any => true,
            TypeTag::Null => value.is_null(),
            TypeTag::Bool => value.is_boolean(),
            TypeTag::Int => value.is_i64() || value.is_u64(),
            TypeTag::Float => value.is_number(),
            TypeTag::Str => value.is_string(),
            TypeTag::Object => value.is_object(),
            TypeTag::List(inner) => value
                .as_array()
                .map_or(false, |items| items.iter().all(|v| inner.matches(v))),
            TypeTag::Dict(inner) => value
                .as_object()
                .map_or(false, |map| map.values().all(|v| inner.matches(v))),
            TypeTag::Optional(inner) => value.is_null() || inner.matches(value),
        }
    }

    /// Short human-readable name used in validation messages
    pub fn describe(&self) -> String {
        match self {
            TypeTag::Any => "any".to_string(),
            TypeTag::Null => "null".to_string(),
            TypeTag::Bool => "bool".to_string(),
            TypeTag::Int => "int".to_string(),
            TypeTag::Float => "float".to_string(),
            TypeTag::Str => "str".to_string(),
            TypeTag::Object => "object".to_string(),
            TypeTag::List(inner) => format!("list[{}]", inner.describe()),
            TypeTag::Dict(inner) => format!("dict[str, {}]", inner.describe()),
            TypeTag::Optional(inner) => format!("{} | None", inner.describe()),
        }
    }

    /// JSON Schema fragment for this type
    pub fn json_schema(&self) -> Value {
        match self {
            TypeTag::Any => json!({}),
            TypeTag::Null => json!({ "type": "null" }),
            TypeTag::Bool => json!({ "type": "boolean" }),
            TypeTag::Int => json!({ "type": "integer" }),
            TypeTag::Float => json!({ "type": "number" }),
            TypeTag::Str => json!({ "type": "string" }),
            TypeTag::Object => json!({ "type": "object" }),
            TypeTag::List(inner) => json!({ "type": "array", "items": inner.json_schema() }),
            TypeTag::Dict(inner) => {
                json!({ "type": "object", "additionalProperties": inner.json_schema() })
            }
            TypeTag::Optional(inner) => {
                json!({ "anyOf": [inner.json_schema(), { "type": "null" }] })
            }
        }
    }
}

/// Whether a parameter must be supplied
#[derive(Debug, Clone, PartialEq)]
pub enum ParamDefault {
    Required,
    Value(Value),
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub ty: TypeTag,
    pub default: ParamDefault,
    pub doc: Option<String>,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, ty: TypeTag) -> Self {
        Self {
            name: name.into(),
            ty,
            default: ParamDefault::Required,
            doc: None,
        }
    }

    pub fn optional(name: impl Into<String>, ty: TypeTag, default: Value) -> Self {
        Self {
            name: name.into(),
            ty,
            default: ParamDefault::Value(default),
            doc: None,
        }
    }

    /// Attach a documentation string
    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn is_required(&self) -> bool {
        matches!(self.default, ParamDefault::Required)
    }
}

/// A single problem found while validating arguments
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum ValidationIssue {
    #[error("missing required argument '{0}'")]
    Missing(String),

    #[error("unexpected argument '{0}'")]
    Unknown(String),

    #[error("argument '{name}' expected {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: String,
        found: String,
    },
}

/// Problems found while deriving a schema
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("parameter '{0}' is declared more than once")]
    DuplicateParam(String),

    #[error("default for parameter '{name}' does not match its type {expected}")]
    DefaultMismatch { name: String, expected: String },
}

/// Cached, structural schema for an action's keyword arguments
#[derive(Debug, Clone, PartialEq)]
pub struct ArgsSchema {
    title: String,
    params: Vec<ParamSpec>,
}

impl ArgsSchema {
    /// Derive a schema from a declared parameter list
    pub fn derive(title: impl Into<String>, params: Vec<ParamSpec>) -> Result<Self, SchemaError> {
        let mut seen = HashSet::new();
        for param in &params {
            if !seen.insert(param.name.as_str()) {
                return Err(SchemaError::DuplicateParam(param.name.clone()));
            }
            if let ParamDefault::Value(default) = &param.default {
                if !param.ty.matches(default) {
                    return Err(SchemaError::DefaultMismatch {
                        name: param.name.clone(),
                        expected: param.ty.describe(),
                    });
                }
            }
        }

        Ok(Self {
            title: title.into(),
            params,
        })
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Per-parameter documentation captured at registration
    pub fn args_docs(&self) -> BTreeMap<String, String> {
        self.params
            .iter()
            .filter_map(|p| p.doc.as_ref().map(|d| (p.name.clone(), d.clone())))
            .collect()
    }

    /// Validate candidate arguments, returning them with defaults filled in
    ///
    /// All issues are collected; the call fails if any were found.
    pub fn validate(&self, args: &Map<String, Value>) -> Result<Map<String, Value>, Vec<ValidationIssue>> {
        let mut issues = Vec::new();

        for name in args.keys() {
            if self.param(name).is_none() {
                issues.push(ValidationIssue::Unknown(name.clone()));
            }
        }

        let mut validated = Map::new();
        for param in &self.params {
            match args.get(&param.name) {
                Some(value) if param.ty.matches(value) => {
                    validated.insert(param.name.clone(), value.clone());
                }
                Some(value) => issues.push(ValidationIssue::TypeMismatch {
                    name: param.name.clone(),
                    expected: param.ty.describe(),
                    found: json_type_name(value).to_string(),
                }),
                None => match &param.default {
                    ParamDefault::Required => issues.push(ValidationIssue::Missing(param.name.clone())),
                    ParamDefault::Value(default) => {
                        validated.insert(param.name.clone(), default.clone());
                    }
                },
            }
        }

        if issues.is_empty() {
            Ok(validated)
        } else {
            Err(issues)
        }
    }

    /// Render as a JSON Schema object
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &self.params {
            let mut prop = param.ty.json_schema();
            if let Value::Object(ref mut obj) = prop {
                obj.insert("title".to_string(), Value::String(param.name.clone()));
                if let Some(doc) = &param.doc {
                    obj.insert("description".to_string(), Value::String(doc.clone()));
                }
                if let ParamDefault::Value(default) = &param.default {
                    obj.insert("default".to_string(), default.clone());
                }
            }
            properties.insert(param.name.clone(), prop);
            if param.is_required() {
                required.push(Value::String(param.name.clone()));
            }
        }

        json!({
            "title": self.title,
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

/// Return-type descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnSchema {
    pub ty: TypeTag,
}

impl ReturnSchema {
    pub fn new(ty: TypeTag) -> Self {
        Self { ty }
    }

    pub fn to_json_schema(&self) -> Value {
        self.ty.json_schema()
    }
}

/// Schema pair exposed through the introspection surface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionSchema {
    pub args: Value,
    #[serde(rename = "return")]
    pub returns: Option<Value>,
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "int",
        Value::Number(_) => "float",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
