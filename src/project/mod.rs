//! Project type detection and workspace profiles.
//!
//! Detects what kind of project a workspace holds, resolves a merged
//! profile (project over global over built-in defaults), and initialises
//! workspace configuration under `.ollm/`.

use crate::models::RoutingProfile;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    #[error("Corrupt project file: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolsProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoutingOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<RoutingProfile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProjectProfile {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub tools: ToolsProfile,
    pub routing: RoutingOverride,
}

pub const BUILT_IN_PROFILE_NAMES: &[&str] =
    &["typescript", "python", "rust", "go", "documentation"];

/// Default settings for a built-in profile name.
#[must_use]
pub fn built_in_profile(name: &str) -> Option<ProjectProfile> {
    let profile = match name {
        "typescript" => ProjectProfile {
            name: "typescript".to_string(),
            system_prompt: Some(
                "You are assisting in a TypeScript project. Prefer strict types \
                 and modern ECMAScript idioms."
                    .to_string(),
            ),
            tools: ToolsProfile {
                enabled: Some(
                    ["code_search", "symbol_lookup", "test_runner"]
                        .map(String::from)
                        .to_vec(),
                ),
                disabled: None,
            },
            routing: RoutingOverride {
                default_profile: Some(RoutingProfile::Code),
            },
            ..Default::default()
        },
        "python" => ProjectProfile {
            name: "python".to_string(),
            system_prompt: Some(
                "You are assisting in a Python project. Follow PEP 8 and prefer \
                 the standard library."
                    .to_string(),
            ),
            routing: RoutingOverride {
                default_profile: Some(RoutingProfile::Code),
            },
            ..Default::default()
        },
        "rust" => ProjectProfile {
            name: "rust".to_string(),
            system_prompt: Some(
                "You are assisting in a Rust project. Prefer idiomatic, \
                 clippy-clean code."
                    .to_string(),
            ),
            routing: RoutingOverride {
                default_profile: Some(RoutingProfile::Code),
            },
            ..Default::default()
        },
        "go" => ProjectProfile {
            name: "go".to_string(),
            system_prompt: Some(
                "You are assisting in a Go project. Keep code gofmt-clean and \
                 explicit."
                    .to_string(),
            ),
            routing: RoutingOverride {
                default_profile: Some(RoutingProfile::Code),
            },
            ..Default::default()
        },
        "documentation" => ProjectProfile {
            name: "documentation".to_string(),
            system_prompt: Some(
                "You are assisting with documentation. Write clear, well \
                 structured prose."
                    .to_string(),
            ),
            routing: RoutingOverride {
                default_profile: Some(RoutingProfile::Creative),
            },
            ..Default::default()
        },
        _ => return None,
    };
    Some(profile)
}

/// Resolve a merged profile: project over global over built-in defaults.
/// The tool lists are scoped overrides, so a present list replaces the
/// lower layer instead of merging with it.
#[must_use]
pub fn apply_profile(project: &ProjectProfile, global: Option<&ProjectProfile>) -> ProjectProfile {
    let mut merged = built_in_profile(&project.name).unwrap_or_else(|| ProjectProfile {
        name: project.name.clone(),
        ..Default::default()
    });
    if let Some(global) = global {
        overlay(&mut merged, global);
    }
    overlay(&mut merged, project);
    merged
}

fn overlay(base: &mut ProjectProfile, layer: &ProjectProfile) {
    if layer.model.is_some() {
        base.model = layer.model.clone();
    }
    if layer.system_prompt.is_some() {
        base.system_prompt = layer.system_prompt.clone();
    }
    if layer.tools.enabled.is_some() {
        base.tools.enabled = layer.tools.enabled.clone();
    }
    if layer.tools.disabled.is_some() {
        base.tools.disabled = layer.tools.disabled.clone();
    }
    if layer.routing.default_profile.is_some() {
        base.routing.default_profile = layer.routing.default_profile;
    }
}

#[derive(Debug, Default)]
pub struct ProjectProfileService {
    manual_profile: Option<String>,
}

impl ProjectProfileService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_manual_profile(&mut self, name: Option<String>) {
        self.manual_profile = name;
    }

    #[must_use]
    pub fn manual_profile(&self) -> Option<&str> {
        self.manual_profile.as_deref()
    }

    /// Detect the workspace's project type.
    ///
    /// A manual override skips the filesystem entirely. Otherwise marker
    /// files are probed in order; an existing workspace always resolves to
    /// some profile (`documentation` as the catch-all), while a missing
    /// workspace directory resolves to `None`.
    pub async fn detect_profile(
        &self,
        workspace_dir: &Path,
    ) -> Result<Option<ProjectProfile>, ProjectError> {
        if let Some(name) = &self.manual_profile {
            if let Some(profile) = built_in_profile(name) {
                return Ok(Some(profile));
            }
            tracing::warn!("Unknown manual profile '{name}', falling back to detection");
        }

        match tokio::fs::metadata(workspace_dir).await {
            Ok(meta) if meta.is_dir() => {}
            _ => return Ok(None),
        }

        if path_exists(&workspace_dir.join("Cargo.toml")).await {
            return Ok(built_in_profile("rust"));
        }
        if path_exists(&workspace_dir.join("go.mod")).await {
            return Ok(built_in_profile("go"));
        }
        for marker in ["pyproject.toml", "requirements.txt", "setup.py"] {
            if path_exists(&workspace_dir.join(marker)).await {
                return Ok(built_in_profile("python"));
            }
        }
        if let Ok(content) = tokio::fs::read_to_string(workspace_dir.join("package.json")).await
            && content.contains("typescript")
        {
            return Ok(built_in_profile("typescript"));
        }

        Ok(built_in_profile("documentation"))
    }

    /// Write `<workspace>/.ollm/project.yaml` with the built-in defaults
    /// for `profile_name`, creating directories as needed. The file keeps
    /// its `.yaml` suffix but carries JSON content for interoperability
    /// with the rest of the ecosystem.
    pub async fn initialize_project(
        &self,
        workspace_dir: &Path,
        profile_name: &str,
    ) -> Result<PathBuf, ProjectError> {
        let profile = built_in_profile(profile_name)
            .ok_or_else(|| ProjectError::UnknownProfile(profile_name.to_string()))?;

        let config_dir = workspace_dir.join(".ollm");
        tokio::fs::create_dir_all(&config_dir).await?;

        let path = config_dir.join("project.yaml");
        let content = serde_json::to_string_pretty(&profile)?;
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }

    /// Read the workspace project file back. Absent file means no project
    /// profile; unparsable content is corruption. YAML is accepted as a
    /// superset of the JSON the initializer writes.
    pub async fn load_project_profile(
        &self,
        workspace_dir: &Path,
    ) -> Result<Option<ProjectProfile>, ProjectError> {
        let path = workspace_dir.join(".ollm").join("project.yaml");
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_yaml::from_str(&content)
                .map(Some)
                .map_err(|e| ProjectError::Corrupt(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[must_use]
    pub fn list_built_in_profiles(&self) -> Vec<ProjectProfile> {
        BUILT_IN_PROFILE_NAMES
            .iter()
            .filter_map(|name| built_in_profile(name))
            .collect()
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}
