// ABOUTME: Compiles a tool's JSON Schema into a flat parameter table and
// ABOUTME: validates model-supplied arguments against it.

use serde::Serialize;
use serde_json::Value;

use crate::error::SchemaError;

/// The value type a parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParamType {
    fn parse(name: &str) -> Self {
        match name {
            "string" => ParamType::String,
            "integer" => ParamType::Integer,
            "number" => ParamType::Number,
            "boolean" => ParamType::Boolean,
            "array" => ParamType::Array,
            "object" => ParamType::Object,
            _ => ParamType::Any,
        }
    }

    /// Whether `value` is acceptable for this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Any => true,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::Any => "any",
        }
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamDef {
    pub name: String,
    pub ty: ParamType,
    pub required: bool,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Parameter table compiled once from a tool's JSON Schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParamSchema {
    params: Vec<ParamDef>,
    allow_additional: bool,
}

impl ParamSchema {
    /// Compile a JSON Schema object. Anything that is not an object schema
    /// yields an empty table that accepts any arguments.
    pub fn from_json(schema: &Value) -> Self {
        let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
            return Self {
                params: Vec::new(),
                allow_additional: true,
            };
        };

        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut params: Vec<ParamDef> = properties
            .iter()
            .map(|(name, prop)| {
                let (ty, nullable) = match prop.get("type") {
                    Some(Value::String(t)) => (ParamType::parse(t), false),
                    Some(Value::Array(types)) => {
                        let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
                        let ty = names
                            .iter()
                            .find(|t| **t != "null")
                            .map(|t| ParamType::parse(t))
                            .unwrap_or(ParamType::Any);
                        (ty, names.contains(&"null"))
                    }
                    _ => (ParamType::Any, false),
                };
                ParamDef {
                    name: name.clone(),
                    ty,
                    required: required.contains(&name.as_str()),
                    nullable,
                    description: prop
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                }
            })
            .collect();
        params.sort_by(|a, b| a.name.cmp(&b.name));

        let allow_additional = !matches!(schema.get("additionalProperties"), Some(Value::Bool(false)));

        Self {
            params,
            allow_additional,
        }
    }

    /// Declared parameters, sorted by name.
    pub fn params(&self) -> &[ParamDef] {
        &self.params
    }

    /// Look up one parameter.
    pub fn param(&self, name: &str) -> Option<&ParamDef> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Check `args` against the table, collecting every violation.
    pub fn validate(&self, tool: &str, args: &Value) -> Result<(), SchemaError> {
        let empty = serde_json::Map::new();
        let object = match args {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(SchemaError {
                    tool: tool.to_string(),
                    violations: vec![format!(
                        "arguments must be an object, got {}",
                        describe(other)
                    )],
                });
            }
        };

        let mut violations = Vec::new();

        for param in &self.params {
            match object.get(&param.name) {
                None if param.required => {
                    violations.push(format!("missing required parameter '{}'", param.name));
                }
                None => {}
                Some(Value::Null) if param.nullable || !param.required => {}
                Some(value) if !param.ty.accepts(value) => {
                    violations.push(format!(
                        "parameter '{}' must be {}, got {}",
                        param.name,
                        param.ty.as_str(),
                        describe(value)
                    ));
                }
                Some(_) => {}
            }
        }

        if !self.allow_additional {
            let mut unknown: Vec<&String> = object
                .keys()
                .filter(|k| self.param(k).is_none())
                .collect();
            unknown.sort();
            for key in unknown {
                violations.push(format!("unknown parameter '{}'", key));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(SchemaError {
                tool: tool.to_string(),
                violations,
            })
        }
    }
}
