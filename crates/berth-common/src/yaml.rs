//! YAML stream utilities
//!
//! Parsing goes through yaml-rust2 and lands in `serde_json::Value` so that
//! manifests can be walked and patched with JSON pointers. Emitting goes
//! through serde_yaml.

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

/// Error type for YAML parsing and emitting
#[derive(Debug, Clone)]
pub struct YamlError(String);

impl std::fmt::Display for YamlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for YamlError {}

/// Parse a multi-document YAML stream, dropping empty documents.
///
/// Each YAML document separated by `---` becomes a separate Value; a stray
/// separator (leading or trailing) does not produce a `Null` entry.
pub fn parse_documents(input: &str) -> Result<Vec<Value>, YamlError> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| YamlError(e.to_string()))?;
    docs.into_iter()
        .map(yaml_to_json)
        .filter(|doc| !matches!(doc, Ok(Value::Null)))
        .collect()
}

/// Emit a sequence of documents as one YAML stream separated by `---`
pub fn dump_documents(docs: &[Value]) -> Result<String, YamlError> {
    let mut out = String::new();
    for (i, doc) in docs.iter().enumerate() {
        if i > 0 {
            out.push_str("---\n");
        }
        let text = serde_yaml::to_string(doc).map_err(|e| YamlError(e.to_string()))?;
        out.push_str(&text);
    }
    Ok(out)
}

/// Convert a yaml_rust2::Yaml value to serde_json::Value
fn yaml_to_json(yaml: Yaml) -> Result<Value, YamlError> {
    match yaml {
        Yaml::Null => Ok(Value::Null),
        Yaml::Boolean(b) => Ok(Value::Bool(b)),
        Yaml::Integer(i) => Ok(Value::Number(i.into())),
        Yaml::Real(s) => {
            let f: f64 = s
                .parse()
                .map_err(|e: std::num::ParseFloatError| YamlError(e.to_string()))?;
            Ok(Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null))
        }
        Yaml::String(s) => Ok(Value::String(s)),
        Yaml::Array(arr) => arr
            .into_iter()
            .map(yaml_to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Yaml::Hash(map) => map
            .into_iter()
            .map(|(k, v)| {
                let key = match k {
                    Yaml::String(s) => s,
                    Yaml::Integer(i) => i.to_string(),
                    Yaml::Real(r) => r,
                    Yaml::Boolean(b) => b.to_string(),
                    Yaml::Null => "null".to_string(),
                    _ => return Err(YamlError("unsupported YAML key type".to_string())),
                };
                yaml_to_json(v).map(|v| (key, v))
            })
            .collect::<Result<Map<String, Value>, _>>()
            .map(Value::Object),
        Yaml::Alias(_) => Err(YamlError("YAML aliases not supported".to_string())),
        Yaml::BadValue => Err(YamlError("bad YAML value".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_documents_nested() {
        let yaml = r#"
metadata:
  name: my-app
  namespace: default
spec:
  replicas: 3
"#;
        let result = parse_documents(yaml).unwrap().remove(0);
        assert_eq!(result["metadata"]["name"], "my-app");
        assert_eq!(result["spec"]["replicas"], 3);
    }

    #[test]
    fn test_parse_documents_skips_empty() {
        let yaml = "---\nname: first\n---\nname: second\n---\n";
        let results = parse_documents(yaml).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["name"], "first");
        assert_eq!(results[1]["name"], "second");
    }

    #[test]
    fn test_parse_documents_invalid() {
        assert!(parse_documents("not: valid: yaml: {{").is_err());
    }

    #[test]
    fn test_parse_documents_empty() {
        assert!(parse_documents("").unwrap().is_empty());
    }

    #[test]
    fn test_dump_documents_separates_with_markers() {
        let docs = vec![
            serde_json::json!({"kind": "Service"}),
            serde_json::json!({"kind": "Ingress"}),
        ];
        let text = dump_documents(&docs).unwrap();
        assert_eq!(text.matches("---\n").count(), 1);

        let back = parse_documents(&text).unwrap();
        assert_eq!(back, docs);
    }

    #[test]
    fn test_placeholder_strings_survive_dump() {
        let docs = vec![serde_json::json!({"image": "$REGISTRY/app:${TAG}", "port": "$PORT"})];
        let text = dump_documents(&docs).unwrap();
        assert!(text.contains("$REGISTRY/app:${TAG}"));
        assert!(text.contains("$PORT"));
    }
}
