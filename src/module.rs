//! Verification module locators.
//!
//! A [`ModuleLocator`] tells a runtime handle where the verification script
//! lives. Resolving it yields the script source plus a SHA-256 digest that is
//! logged when the engine loads it.

use crate::error::{BridgeError, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::info;

/// Where the verification module comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleLocator {
    /// Script file on disk
    File(PathBuf),
    /// Script held in memory
    Inline {
        /// Module name used in engine diagnostics
        name: String,
        /// Script source
        source: String,
    },
}

/// A resolved verification module
#[derive(Debug, Clone)]
pub struct ModuleSource {
    /// Module name used in engine diagnostics
    pub name: String,
    /// Script source
    pub code: String,
    /// Hex SHA-256 of `code`
    pub digest: String,
}

impl ModuleSource {
    /// Build a module source, computing its digest
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        let code = code.into();
        let digest = hex::encode(Sha256::digest(code.as_bytes()));
        Self {
            name: name.into(),
            code,
            digest,
        }
    }
}

impl ModuleLocator {
    /// Locate a script file
    pub fn file(path: impl Into<PathBuf>) -> Self {
        ModuleLocator::File(path.into())
    }

    /// Use an in-memory script
    pub fn inline(name: impl Into<String>, source: impl Into<String>) -> Self {
        ModuleLocator::Inline {
            name: name.into(),
            source: source.into(),
        }
    }

    /// Write `packaged` to `path` unless a file is already there, then locate it.
    ///
    /// An existing file is left untouched.
    pub fn provision(path: impl AsRef<Path>, packaged: &str) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, packaged)?;
            info!(path = %path.display(), "Verification bundle written to disk");
        }
        Ok(Self::file(path))
    }

    /// Load the module source
    pub fn resolve(&self) -> Result<ModuleSource> {
        match self {
            ModuleLocator::File(path) => {
                let code = std::fs::read_to_string(path).map_err(|e| {
                    BridgeError::initialization(format!(
                        "cannot read verification module {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(ModuleSource::new(path.display().to_string(), code))
            }
            ModuleLocator::Inline { name, source } => {
                Ok(ModuleSource::new(name.clone(), source.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_inline_digest() {
        let source = ModuleLocator::inline("verifier.js", "module.exports = {};")
            .resolve()
            .unwrap();
        assert_eq!(source.name, "verifier.js");
        assert_eq!(source.digest.len(), 64);
        assert_eq!(
            source.digest,
            ModuleSource::new("other", "module.exports = {};").digest
        );
    }

    #[test]
    fn test_missing_file_is_initialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModuleLocator::file(dir.path().join("absent.js"))
            .resolve()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::RuntimeInitialization);
    }

    #[test]
    fn test_provision_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle").join("pvtBundle.js");

        let locator = ModuleLocator::provision(&path, "// first").unwrap();
        assert_eq!(locator, ModuleLocator::file(&path));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "// first");

        ModuleLocator::provision(&path, "// second").unwrap();
        assert_eq!(locator.resolve().unwrap().code, "// first");
    }
}
