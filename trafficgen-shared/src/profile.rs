//! Tool-argument profile documents.
//!
//! A profile is a reusable set of tool arguments. Two shapes are accepted and
//! produce the same [`Profile`]:
//!
//! ```yaml
//! profile:
//!   tool: hping3
//!   name: syn-fast
//!   description: Fast SYN flood
//!   tool_args: "-S --flood -p 80"
//! ```
//!
//! ```json5
//! { name: "syn-fast", tool_args: "-S --flood -p 80" }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::document::{DocumentFormat, ScalarValue, parse_document};
use crate::errors::{ValidationError, ValidationResult};

/// Value used for `tool` and `name` when the document omits them
pub const UNKNOWN: &str = "unknown";

/// A loaded tool-argument profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub tool: String,
    pub name: String,
    pub description: String,
    /// Forwarded verbatim to the child as `TOOL_ARGS`
    pub tool_args: String,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            tool: UNKNOWN.to_string(),
            name: UNKNOWN.to_string(),
            description: String::new(),
            tool_args: String::new(),
        }
    }
}

/// Profile fields as they appear in a document
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileDoc {
    pub tool: Option<ScalarValue>,
    pub name: Option<ScalarValue>,
    pub description: Option<String>,
    pub tool_args: Option<ScalarValue>,
}

/// Either shape of a profile document
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ProfileFile {
    Wrapped { profile: ProfileDoc },
    Flat(ProfileDoc),
}

impl ProfileFile {
    pub fn into_profile(self) -> Profile {
        let doc = match self {
            ProfileFile::Wrapped { profile } => profile,
            ProfileFile::Flat(doc) => doc,
        };

        let text = |value: Option<ScalarValue>| {
            value
                .map(ScalarValue::into_string)
                .filter(|s| !s.trim().is_empty())
        };

        Profile {
            tool: text(doc.tool).unwrap_or_else(|| UNKNOWN.to_string()),
            name: text(doc.name).unwrap_or_else(|| UNKNOWN.to_string()),
            description: doc.description.unwrap_or_default(),
            tool_args: doc
                .tool_args
                .map(ScalarValue::into_string)
                .unwrap_or_default(),
        }
    }
}

/// Parse profile content read from `path`.
pub fn parse_profile_str(
    content: &str,
    format: DocumentFormat,
    path: &Path,
) -> ValidationResult<Profile> {
    let file: Option<ProfileFile> = parse_document(content, format, path)?;
    file.map(ProfileFile::into_profile).ok_or_else(|| {
        ValidationError::Parse {
            path: path.to_path_buf(),
            format: format.name(),
            message: "profile document is empty".to_string(),
        }
    })
}

/// Read and parse a profile file, picking the format from its extension.
pub fn parse_profile_file(path: &Path) -> ValidationResult<Profile> {
    let content = std::fs::read_to_string(path).map_err(|source| ValidationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_profile_str(&content, DocumentFormat::from_path(path), path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_wrapped_and_flat_shapes_are_equivalent() {
        let wrapped = parse_profile_str(
            "profile:\n  tool: hping3\n  name: syn-fast\n  description: Fast\n  tool_args: \"-S --flood\"\n",
            DocumentFormat::Yaml,
            Path::new("p.yaml"),
        )
        .unwrap();
        let flat = parse_profile_str(
            r#"{ tool: "hping3", name: "syn-fast", description: "Fast", tool_args: "-S --flood" }"#,
            DocumentFormat::Json5,
            Path::new("p.json5"),
        )
        .unwrap();

        assert_eq!(wrapped, flat);
        assert_eq!(wrapped.tool_args, "-S --flood");
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let profile =
            parse_profile_str("name: minimal\n", DocumentFormat::Yaml, Path::new("p.yaml"))
                .unwrap();
        assert_eq!(profile.tool, "unknown");
        assert_eq!(profile.name, "minimal");
        assert_eq!(profile.description, "");
        assert_eq!(profile.tool_args, "");
    }

    #[test]
    fn test_numeric_tool_args_are_stringified() {
        let profile = parse_profile_str(
            "profile:\n  tool_args: 1500\n",
            DocumentFormat::Yaml,
            Path::new("p.yaml"),
        )
        .unwrap();
        assert_eq!(profile.tool_args, "1500");
        assert_eq!(profile.name, "unknown");
    }

    #[test]
    fn test_empty_document_is_invalid() {
        let err = parse_profile_str("", DocumentFormat::Yaml, Path::new("empty.yaml")).unwrap_err();
        assert!(matches!(err, ValidationError::Parse { .. }));
    }

    #[test]
    fn test_malformed_document_is_invalid() {
        let err = parse_profile_str("- just\n- a list\n", DocumentFormat::Yaml, Path::new("list.yaml"))
            .unwrap_err();
        assert!(matches!(err, ValidationError::Parse { .. }));
    }

    #[test]
    fn test_parse_profile_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("scan.json5");
        fs::write(&path, r#"{ profile: { tool: "nmap", tool_args: "-sS -T4" } }"#).unwrap();

        let profile = parse_profile_file(&path).unwrap();
        assert_eq!(profile.tool, "nmap");
        assert_eq!(profile.tool_args, "-sS -T4");

        let missing = parse_profile_file(&temp_dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(missing, ValidationError::Io { .. }));
    }
}
