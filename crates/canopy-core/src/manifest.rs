//! `manifest.json` written next to each step's outputs.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CanopyError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunManifest {
    pub tool: String,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    pub elapsed_secs: f64,
    /// Step-specific counters and parameters.
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl RunManifest {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            ..Self::default()
        }
    }

    pub fn detail(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.details.insert(key.to_string(), value.into());
    }

    /// Write to `{dir}/{tool}_manifest.json` and return the path.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).map_err(|e| CanopyError::io(dir, e))?;
        let path = dir.join(format!("{}_manifest.json", self.tool));
        let json = serde_json::to_string_pretty(self).map_err(|source| CanopyError::Json {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, json).map_err(|e| CanopyError::io(&path, e))?;
        Ok(path)
    }

    /// Load a manifest written by a previous step.
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| CanopyError::io(path, e))?;
        serde_json::from_str(&text).map_err(|source| CanopyError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_is_named_after_tool() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = RunManifest::new("cumulative");
        m.outputs.push(PathBuf::from("reforested_92_19.tiff"));
        m.detail("pairs", 27);
        let path = m.write(dir.path()).unwrap();
        assert!(path.ends_with("cumulative_manifest.json"));

        let back = RunManifest::read(&path).unwrap();
        assert_eq!(back.details["pairs"], serde_json::json!(27));
        assert_eq!(back.outputs.len(), 1);
    }
}
