//! Job script loading

use crate::JobError;
use convenient_sandbox::SandboxSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Base image used when a script names none
pub const DEFAULT_IMAGE: &str = "ubuntu:latest";

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

/// Declarative description of one job
///
/// ```yaml
/// source: https://github.com/user/repo.git
/// data:
///   - https://example.com/input.tar.gz:/data/input/
/// run:
///   - python3 main.py
/// upload:
///   - out/*.csv
/// apt:
///   - python3
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobScript {
    /// Where the source code comes from; empty for none
    #[serde(default)]
    pub source: String,
    /// Data file URIs, fetched concurrently
    #[serde(default)]
    pub data: Vec<String>,
    /// Shell commands run in order inside the sandbox
    #[serde(default)]
    pub run: Vec<String>,
    /// Glob patterns of result files, relative to the working directory
    #[serde(default)]
    pub upload: Vec<String>,
    /// Base image
    #[serde(default = "default_image")]
    pub image: String,
    /// APT packages installed into the image
    #[serde(default)]
    pub apt: Vec<String>,
    /// Job name; prefixes every stored object
    #[serde(default)]
    pub name: String,
}

impl Default for JobScript {
    fn default() -> Self {
        Self {
            source: String::new(),
            data: Vec::new(),
            run: Vec::new(),
            upload: Vec::new(),
            image: default_image(),
            apt: Vec::new(),
            name: String::new(),
        }
    }
}

impl JobScript {
    /// Parse a script from YAML text
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Load a script file
    pub async fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| JobError::Script {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Self::from_yaml(&content).map_err(|e| JobError::Script {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Fill in the name: `fallback` if given, else `job-<unix seconds in hex>`
    pub fn ensure_name(&mut self, fallback: Option<&str>) {
        if !self.name.is_empty() {
            return;
        }
        self.name = match fallback.filter(|name| !name.is_empty()) {
            Some(name) => name.to_string(),
            None => default_name(),
        };
    }

    /// Inputs for the generated Dockerfile and entrypoint
    #[must_use]
    pub fn sandbox_spec(&self) -> SandboxSpec {
        SandboxSpec {
            image: self.image.clone(),
            apt: self.apt.clone(),
            run: self.run.clone(),
        }
    }
}

/// `job-<unix seconds in hex>`
#[must_use]
pub fn default_name() -> String {
    format!("job-{:x}", chrono::Utc::now().timestamp())
}
