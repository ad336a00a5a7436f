/// Shared types used across the codebase

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Execution environment a module is built for. Fixed at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleEnv {
    Venv,
    Conda,
    Docker,
    Inline,
    Git,
}

impl ModuleEnv {
    pub const ALL: [ModuleEnv; 5] = [
        ModuleEnv::Venv,
        ModuleEnv::Conda,
        ModuleEnv::Docker,
        ModuleEnv::Inline,
        ModuleEnv::Git,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleEnv::Venv => "venv",
            ModuleEnv::Conda => "conda",
            ModuleEnv::Docker => "docker",
            ModuleEnv::Inline => "inline",
            ModuleEnv::Git => "git",
        }
    }

    /// Inline modules run on demand and never have a standing deployment.
    pub fn supports_deploy(&self) -> bool {
        !matches!(self, ModuleEnv::Inline)
    }
}

impl fmt::Display for ModuleEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ModuleEnv {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModuleEnv::ALL
            .into_iter()
            .find(|env| env.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown environment '{}' (expected venv, conda, docker, inline or git)", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    Inactive,
    Active,
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionStatus::Inactive => f.pad("inactive"),
            VersionStatus::Active => f.pad("active"),
        }
    }
}

/// Lifecycle actions recorded in a module's history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Upload,
    Activate,
    Deactivate,
    Rollback,
    Deploy,
    Undeploy,
    Delete,
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HistoryAction::Upload => "upload",
            HistoryAction::Activate => "activate",
            HistoryAction::Deactivate => "deactivate",
            HistoryAction::Rollback => "rollback",
            HistoryAction::Deploy => "deploy",
            HistoryAction::Undeploy => "undeploy",
            HistoryAction::Delete => "delete",
        };
        f.pad(s)
    }
}

/// Whether a recorded action took effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Succeeded,
    Failed,
    Cancelled,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Succeeded => f.pad("succeeded"),
            Outcome::Failed => f.pad("failed"),
            Outcome::Cancelled => f.pad("cancelled"),
        }
    }
}
