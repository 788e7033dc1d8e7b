//! Document format detection and loose scalar values.
//!
//! Scenario and profile documents are accepted as YAML (`.yaml`, `.yml`) or
//! JSON5 (`.json5`, `.json`). Anything else is treated as YAML.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::errors::ValidationError;

/// Serialization format of a scenario or profile document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json5,
}

impl DocumentFormat {
    /// Pick the format from the file extension.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("json5") | Some("json") => DocumentFormat::Json5,
            _ => DocumentFormat::Yaml,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DocumentFormat::Yaml => "YAML",
            DocumentFormat::Json5 => "JSON5",
        }
    }
}

/// Deserialize `content` in the given format, reporting failures against `path`.
pub fn parse_document<T: DeserializeOwned>(
    content: &str,
    format: DocumentFormat,
    path: &Path,
) -> Result<T, ValidationError> {
    let result = match format {
        DocumentFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        DocumentFormat::Json5 => json5::from_str(content).map_err(|e| e.to_string()),
    };

    result.map_err(|message| ValidationError::Parse {
        path: path.to_path_buf(),
        format: format.name(),
        message,
    })
}

/// Read and deserialize a document, picking the format from its extension.
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T, ValidationError> {
    let content = std::fs::read_to_string(path).map_err(|source| ValidationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_document(&content, DocumentFormat::from_path(path), path)
}

/// A scalar as written in a document. Environment values such as `PORT: 1883`
/// or `VERBOSE: true` arrive as numbers or booleans and are stringified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Null,
}

impl ScalarValue {
    pub fn into_string(self) -> String {
        match self {
            ScalarValue::Bool(b) => b.to_string(),
            ScalarValue::Integer(i) => i.to_string(),
            ScalarValue::Float(f) => f.to_string(),
            ScalarValue::String(s) => s,
            ScalarValue::Null => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("a/b.json5")),
            DocumentFormat::Json5
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("a/b.JSON")),
            DocumentFormat::Json5
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("a/b.yml")),
            DocumentFormat::Yaml
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("a/b")),
            DocumentFormat::Yaml
        );
    }

    #[test]
    fn test_scalar_values_are_stringified() {
        let map: BTreeMap<String, ScalarValue> = parse_document(
            "PORT: 1883\nVERBOSE: true\nRATE: 0.5\nHOST: broker\nEMPTY:\n",
            DocumentFormat::Yaml,
            &PathBuf::from("env.yaml"),
        )
        .unwrap();

        let strings: BTreeMap<String, String> = map
            .into_iter()
            .map(|(k, v)| (k, v.into_string()))
            .collect();
        assert_eq!(strings["PORT"], "1883");
        assert_eq!(strings["VERBOSE"], "true");
        assert_eq!(strings["RATE"], "0.5");
        assert_eq!(strings["HOST"], "broker");
        assert_eq!(strings["EMPTY"], "");
    }

    #[test]
    fn test_parse_error_names_format_and_path() {
        let result: Result<BTreeMap<String, String>, _> = parse_document(
            "{ this is not valid json5 }}}",
            DocumentFormat::Json5,
            &PathBuf::from("broken.json5"),
        );
        let err = result.unwrap_err().to_string();
        assert!(err.contains("JSON5"));
        assert!(err.contains("broken.json5"));
    }
}
