//! Engine configuration
//!
//! Every section deserializes with defaults so a partial JSON file (or no
//! file at all) yields a working configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::constants::{defaults, orchestrator, planner};
use crate::error::{EngineError, Result};
use crate::plan::ErrorPolicy;

/// How plan validation failures are treated
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanValidationMode {
    /// Log validation errors and run the plan anyway
    #[default]
    Advisory,
    /// Fail the run with `EngineError::PlanValidation`
    Enforce,
}

/// How the supervisor picks teams
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// Planner builds a plan, orchestrator tunes it
    #[default]
    PlanDriven,
    /// Keyword classification routes straight to a single team
    Keyword,
}

/// Planner thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlannerConfig {
    /// `Unclear` intents below this confidence produce an empty plan
    pub unclear_floor: f64,
    /// Plans for intents below this confidence get inflated timeouts
    pub low_confidence: f64,
    pub timeout_factor: f64,
    pub search_timeout_secs: u64,
    pub analysis_timeout_secs: u64,
    pub document_timeout_secs: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            unclear_floor: planner::UNCLEAR_FLOOR,
            low_confidence: planner::LOW_CONFIDENCE,
            timeout_factor: planner::TIMEOUT_FACTOR,
            search_timeout_secs: 30,
            analysis_timeout_secs: 60,
            document_timeout_secs: 90,
        }
    }
}

impl PlannerConfig {
    /// Default step timeout for a team
    pub fn timeout_for(&self, team: &str) -> u64 {
        match team {
            "analysis" => self.analysis_timeout_secs,
            "document" => self.document_timeout_secs,
            _ => self.search_timeout_secs,
        }
    }
}

/// Orchestrator thresholds and statistics storage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub quality_threshold: f64,
    pub smoothing_alpha: f64,
    pub min_success_rate: f64,
    pub min_samples: u64,
    /// Directory for per-user statistics files; in-memory when absent
    pub statistics_dir: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            quality_threshold: orchestrator::QUALITY_THRESHOLD,
            smoothing_alpha: orchestrator::SMOOTHING_ALPHA,
            min_success_rate: orchestrator::MIN_SUCCESS_RATE,
            min_samples: orchestrator::MIN_SAMPLES,
            statistics_dir: None,
        }
    }
}

/// Supervisor behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SupervisorConfig {
    pub validation_mode: PlanValidationMode,
    pub routing_mode: RoutingMode,
    pub error_policy: ErrorPolicy,
    /// Directory for checkpoint files; in-memory when absent
    pub checkpoint_dir: Option<String>,
}

/// Team runtime settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TeamsConfig {
    pub tool_timeout_secs: u64,
    pub tool_result_limit: usize,
    /// Skip the document approval gate for unattended runs
    pub auto_approve_documents: bool,
}

impl Default for TeamsConfig {
    fn default() -> Self {
        Self {
            tool_timeout_secs: defaults::TOOL_TIMEOUT_SECS,
            tool_result_limit: defaults::TOOL_RESULT_LIMIT,
            auto_approve_documents: false,
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub planner: PlannerConfig,
    pub orchestrator: OrchestratorConfig,
    pub supervisor: SupervisorConfig,
    pub teams: TeamsConfig,
}

impl EngineConfig {
    /// Load configuration from a JSON file; a missing file yields defaults
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("Config {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).await?;
        serde_json::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save configuration as pretty JSON, creating parent directories
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents).await?;
        log::info!("Configuration saved to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::load(dir.path().join("absent.json")).await.unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.supervisor.validation_mode, PlanValidationMode::Advisory);
    }

    #[tokio::test]
    async fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"supervisor": {"validation_mode": "enforce"}, "teams": {"auto_approve_documents": true}}"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).await.unwrap();
        assert_eq!(config.supervisor.validation_mode, PlanValidationMode::Enforce);
        assert_eq!(config.supervisor.routing_mode, RoutingMode::PlanDriven);
        assert!(config.teams.auto_approve_documents);
        assert_eq!(config.teams.tool_timeout_secs, defaults::TOOL_TIMEOUT_SECS);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = EngineConfig::default();
        config.orchestrator.statistics_dir = Some("stats".into());

        config.save(&path).await.unwrap();
        assert_eq!(EngineConfig::load(&path).await.unwrap(), config);
    }

    #[tokio::test]
    async fn test_malformed_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = EngineConfig::load(&path).await.unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_timeout_for_team() {
        let config = PlannerConfig::default();
        assert_eq!(config.timeout_for("analysis"), 60);
        assert_eq!(config.timeout_for("unknown"), 30);
    }
}
