//! Template model
//!
//! A template is a multi-document YAML stream. Exactly one document has
//! `kind: Template` and declares the variables and behavioral flags; every
//! other document is an opaque manifest with `$VAR` / `${VAR}` placeholders.

use std::collections::BTreeMap;
use std::fmt;

use berth_common::config::FlagDefaults;
use berth_common::yaml::parse_documents;
use berth_common::{Error, Result};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::naming::SUFFIX_LEN;

/// Marker kind of the metadata document
pub const TEMPLATE_KIND: &str = "Template";

/// Variable that seeds the generated resource name
pub const NAME_VARIABLE: &str = "NAME";

/// Longest accepted base name; a collision suffix must still fit a DNS label
pub const MAX_NAME_LEN: usize = 63 - 1 - SUFFIX_LEN;

/// Variables filled in by the engine. Templates may declare them (their
/// defaults are placeholders), but callers may never set them.
pub const RESERVED_VARIABLES: &[&str] = &[
    "NAMESPACE",
    "HOSTNAME",
    "REGISTRY",
    "USERNAME",
    "INGRESS_URL",
    "PRIVATE_DIR",
    "PRIVATE_VOLUME",
    "SHARED_DIR",
    "SHARED_VOLUME",
];

/// Whether a variable name is computed by the engine
pub fn is_reserved(name: &str) -> bool {
    RESERVED_VARIABLES.contains(&name)
}

/// Type tag of a variable
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    /// Any string
    #[default]
    String,
    /// Decimal integer
    Int,
}

/// A declared template variable
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Variable {
    /// Placeholder name
    pub name: String,
    /// Value used when the caller does not supply one
    pub default: String,
    /// Display label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Help text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    /// Type tag
    #[serde(rename = "type")]
    pub var_type: VariableType,
}

impl Variable {
    /// Check a candidate value against the type tag
    pub fn check(&self, value: &str) -> Result<()> {
        match self.var_type {
            VariableType::String => Ok(()),
            VariableType::Int => value.trim().parse::<i64>().map(|_| ()).map_err(|_| {
                Error::bad_field(&self.name, format!("expected an integer, got {:?}", value))
            }),
        }
    }
}

/// Behavioral flags of a template
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TemplateFlags {
    /// At most one live instance per tenant
    pub singleton: bool,
    /// Gate ingresses with authentication
    pub auth: bool,
    /// Attach tenant storage
    pub mount: bool,
    /// Attach dataset volumes
    pub datasets: bool,
}

/// A parsed template, read-only once loaded
#[derive(Clone, Debug)]
pub struct Template {
    id: String,
    name: String,
    description: String,
    flags: TemplateFlags,
    variables: Vec<Variable>,
    documents: Vec<Value>,
    data: String,
}

impl Template {
    /// Parse template text.
    ///
    /// Any defect yields a single `InvalidTemplate` error naming `id`.
    pub fn parse(id: &str, data: &str, defaults: FlagDefaults) -> Result<Self> {
        let invalid = |msg: String| Error::invalid_template(id, msg);

        let docs = parse_documents(data).map_err(|e| invalid(e.to_string()))?;

        let mut metadata: Option<serde_json::Map<String, Value>> = None;
        let mut documents = Vec::new();
        for doc in docs {
            let Value::Object(map) = doc else {
                return Err(invalid("documents must be mappings".to_string()));
            };
            if map.get("kind").and_then(Value::as_str) == Some(TEMPLATE_KIND) {
                if metadata.is_some() {
                    return Err(invalid("more than one Template document".to_string()));
                }
                metadata = Some(map);
            } else {
                documents.push(Value::Object(map));
            }
        }

        let metadata = metadata.ok_or_else(|| invalid("missing Template document".to_string()))?;

        let name = match metadata.get("name") {
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(invalid("name must be a string".to_string())),
            None => id.to_string(),
        };
        let description = metadata
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let flag = |key: &str, default: bool| -> Result<bool> {
            match metadata.get(key) {
                None | Some(Value::Null) => Ok(default),
                Some(Value::Bool(b)) => Ok(*b),
                Some(_) => Err(invalid(format!("{key} must be a boolean"))),
            }
        };
        let flags = TemplateFlags {
            singleton: flag("singleton", defaults.singleton)?,
            auth: flag("auth", defaults.auth)?,
            mount: flag("mount", defaults.mount)?,
            datasets: flag("datasets", defaults.datasets)?,
        };

        let raw_variables = match metadata.get("variables") {
            Some(Value::Array(vars)) => vars,
            Some(_) => return Err(invalid("variables must be a list".to_string())),
            None => return Err(invalid("missing variables".to_string())),
        };

        let mut variables: Vec<Variable> = Vec::with_capacity(raw_variables.len());
        for raw in raw_variables {
            let variable = parse_variable(raw).map_err(invalid)?;
            if variables.iter().any(|v| v.name == variable.name) {
                return Err(invalid(format!("duplicate variable {}", variable.name)));
            }
            variables.push(variable);
        }

        if !variables.iter().any(|v| v.name == NAME_VARIABLE) {
            return Err(invalid(format!("missing {NAME_VARIABLE} variable")));
        }

        Ok(Self {
            id: id.to_string(),
            name,
            description,
            flags,
            variables,
            documents,
            data: data.to_string(),
        })
    }

    /// Catalog identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description, possibly empty
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Behavioral flags
    pub fn flags(&self) -> TemplateFlags {
        self.flags
    }

    /// Declared variables in declaration order
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Look up a declared variable
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Manifest documents, placeholders intact
    pub fn documents(&self) -> &[Value] {
        &self.documents
    }

    /// Raw template text
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Default values for every declared variable
    pub fn default_values(&self) -> Values {
        Values {
            entries: self
                .variables
                .iter()
                .map(|v| (v.name.clone(), v.default.clone()))
                .collect(),
        }
    }

    /// Validate caller-supplied values and merge them over the defaults.
    ///
    /// Unknown, reserved and ill-typed fields are rejected; so is a `NAME`
    /// that is not a DNS label.
    pub fn bind(&self, raw: &BTreeMap<String, String>) -> Result<Values> {
        let mut values = self.default_values();
        for (key, value) in raw {
            if is_reserved(key) {
                return Err(Error::bad_field(key, format!("{key} is set by the server")));
            }
            let variable = self
                .variable(key)
                .ok_or_else(|| Error::bad_field(key, format!("unknown variable {key}")))?;
            variable.check(value)?;
            values.set(key, value.clone())?;
        }

        let name = values.get(NAME_VARIABLE).unwrap_or_default();
        if !is_dns_label(name) {
            return Err(Error::bad_field(
                NAME_VARIABLE,
                format!("{name:?} is not a valid name (lowercase letters, digits and '-')"),
            ));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(Error::bad_field(
                NAME_VARIABLE,
                format!("name is longer than {MAX_NAME_LEN} characters"),
            ));
        }
        Ok(values)
    }

    /// Summary for catalog listings
    pub fn format(&self, include_data: bool) -> TemplateSummary {
        TemplateSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            singleton: self.flags.singleton,
            auth: self.flags.auth,
            mount: self.flags.mount,
            datasets: self.flags.datasets,
            variables: self.variables.clone(),
            data: include_data.then(|| self.data.clone()),
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}: {}", self.name, self.description)
        }
    }
}

fn parse_variable(raw: &Value) -> std::result::Result<Variable, String> {
    let map = raw
        .as_object()
        .ok_or_else(|| "variables must be mappings".to_string())?;
    let name = match map.get("name") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => return Err("variable missing name".to_string()),
    };
    let default = match map.get("default") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) => String::new(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(_) => return Err(format!("variable {name} has a non-scalar default")),
        None => return Err(format!("variable {name} missing default")),
    };
    let var_type = match map.get("type").and_then(Value::as_str) {
        None | Some("string") => VariableType::String,
        Some("int") => VariableType::Int,
        Some(other) => return Err(format!("variable {name} has unknown type {other}")),
    };
    let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);

    let variable = Variable {
        label: text("label"),
        help: text("help"),
        name,
        default,
        var_type,
    };
    if variable.var_type == VariableType::Int && !variable.default.is_empty() {
        variable.check(&variable.default).map_err(|e| e.to_string())?;
    }
    Ok(variable)
}

/// RFC 1123 label: lowercase alphanumerics and '-', alphanumeric at both ends
pub fn is_dns_label(s: &str) -> bool {
    let bytes = s.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= 63
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[0] != b'-'
        && bytes[bytes.len() - 1] != b'-'
}

/// Catalog view of a template
#[derive(Clone, Debug, Serialize)]
pub struct TemplateSummary {
    /// Catalog identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Description
    pub description: String,
    /// Singleton flag
    pub singleton: bool,
    /// Auth flag
    pub auth: bool,
    /// Mount flag
    pub mount: bool,
    /// Datasets flag
    pub datasets: bool,
    /// Declared variables
    pub variables: Vec<Variable>,
    /// Raw template text, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Values chosen for one materialization, in declaration order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Values {
    entries: Vec<(String, String)>,
}

impl Values {
    /// Value of a variable
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Overwrite a declared variable; unknown names are rejected
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        match self.entries.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => {
                entry.1 = value.into();
                Ok(())
            }
            None => Err(Error::bad_field(name, format!("unknown variable {name}"))),
        }
    }

    /// Add or overwrite a computed value
    pub fn insert_computed(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    /// Iterate over (name, value) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no values
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build from pairs; used when recovering values from an annotation
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl Serialize for Values {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}
