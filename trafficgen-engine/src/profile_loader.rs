//! Profile Loader - per-run loading of tool-argument profiles.
//!
//! Profiles are read fresh for every run that references one, so edits between
//! runs of the same scenario take effect. Failures are launch failures of the
//! referencing run, never scenario validation errors.

use std::path::{Path, PathBuf};

use tracing::debug;

use trafficgen_shared::errors::{LaunchError, LaunchResult, ValidationError};
use trafficgen_shared::metadata::ProfileSummary;
use trafficgen_shared::profile::{Profile, parse_profile_file};

/// A profile together with the file it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedProfile {
    pub path: PathBuf,
    pub profile: Profile,
}

impl LoadedProfile {
    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            path: self.path.clone(),
            tool: self.profile.tool.clone(),
            name: self.profile.name.clone(),
        }
    }
}

/// Load the profile at `path`.
///
/// A missing file maps to `profile_not_found`; anything unreadable or
/// malformed maps to `profile_invalid`.
pub fn load_profile(path: &Path) -> LaunchResult<LoadedProfile> {
    if !path.exists() {
        return Err(LaunchError::ProfileNotFound(path.to_path_buf()));
    }
    if !path.is_file() {
        return Err(LaunchError::ProfileInvalid {
            path: path.to_path_buf(),
            message: "not a regular file".to_string(),
        });
    }

    let profile = parse_profile_file(path).map_err(|e| match e {
        ValidationError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
            LaunchError::ProfileNotFound(path.to_path_buf())
        }
        other => LaunchError::ProfileInvalid {
            path: path.to_path_buf(),
            message: other.to_string(),
        },
    })?;

    debug!(
        "Loaded profile '{}' (tool: {}) from {:?}",
        profile.name, profile.tool, path
    );

    Ok(LoadedProfile {
        path: path.to_path_buf(),
        profile,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_profile_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("flood.yaml");
        fs::write(
            &path,
            "profile:\n  tool: hping3\n  name: flood\n  tool_args: \"-S --flood\"\n",
        )
        .unwrap();

        let loaded = load_profile(&path).unwrap();
        assert_eq!(loaded.profile.tool, "hping3");
        assert_eq!(loaded.profile.tool_args, "-S --flood");

        let summary = loaded.summary();
        assert_eq!(summary.path, path);
        assert_eq!(summary.name, "flood");
    }

    #[test]
    fn test_missing_profile() {
        let temp_dir = TempDir::new().unwrap();
        let err = load_profile(&temp_dir.path().join("nope.yaml")).unwrap_err();
        assert_eq!(err.reason(), "profile_not_found");
    }

    #[test]
    fn test_malformed_profile() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.json5");
        fs::write(&path, "{ tool_args: ").unwrap();

        let err = load_profile(&path).unwrap_err();
        assert_eq!(err.reason(), "profile_invalid");
    }

    #[test]
    fn test_directory_is_not_a_profile() {
        let temp_dir = TempDir::new().unwrap();
        let err = load_profile(temp_dir.path()).unwrap_err();
        assert_eq!(err.reason(), "profile_invalid");
    }
}
