//! Capability registry for execution teams
//!
//! Maps team names to their declared capabilities. The registry is built once
//! at startup and shared by `Arc`; nothing mutates it afterwards.
//!
//! # Usage
//!
//! ```ignore
//! use query_engine::CapabilityRegistry;
//!
//! let registry = Arc::new(CapabilityRegistry::with_default_teams());
//! let teams = registry.list(true);
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::teams;

/// Declared capabilities of one team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamCapabilities {
    pub name: String,
    pub description: String,
    /// Free-form capability labels (e.g. "legal_search", "risk_assessment")
    pub capabilities: Vec<String>,
    /// Retrieval tools the team may call, in preference order
    pub tools: Vec<String>,
    pub enabled: bool,
}

impl TeamCapabilities {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            capabilities: Vec::new(),
            tools: Vec::new(),
            enabled: true,
        }
    }

    pub fn with_capabilities(mut self, caps: &[&str]) -> Self {
        self.capabilities = caps.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tools = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Catalogue of team name to declared capabilities
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    teams: BTreeMap<String, TeamCapabilities>,
}

impl CapabilityRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the Search, Analysis and Document teams
    pub fn with_default_teams() -> Self {
        let mut registry = Self::new();
        registry.register(
            TeamCapabilities::new(teams::SEARCH, "Legal, market-price and loan-product retrieval")
                .with_capabilities(&["legal_search", "market_search", "loan_search"])
                .with_tools(&["legal_search", "market_data", "loan_data"]),
        );
        registry.register(
            TeamCapabilities::new(teams::ANALYSIS, "Statistics, pattern recognition and insights")
                .with_capabilities(&["market_analysis", "risk_assessment", "loan_calculation"])
                .with_tools(&["market_data", "loan_data"]),
        );
        registry.register(
            TeamCapabilities::new(teams::DOCUMENT, "Contract drafting and review with human approval")
                .with_capabilities(&["contract_creation", "contract_review"])
                .with_tools(&["legal_search"]),
        );
        registry
    }

    /// Register (or replace) a team
    pub fn register(&mut self, caps: TeamCapabilities) {
        self.teams.insert(caps.name.clone(), caps);
    }

    /// Team names, optionally only the enabled ones
    pub fn list(&self, enabled_only: bool) -> Vec<String> {
        self.teams
            .values()
            .filter(|t| !enabled_only || t.enabled)
            .map(|t| t.name.clone())
            .collect()
    }

    pub fn get_capabilities(&self, name: &str) -> Option<&TeamCapabilities> {
        self.teams.get(name)
    }

    /// Whether the team exists and is enabled
    pub fn is_available(&self, name: &str) -> bool {
        self.teams.get(name).is_some_and(|t| t.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_teams() {
        let registry = CapabilityRegistry::with_default_teams();
        assert_eq!(registry.list(true), vec!["analysis", "document", "search"]);
        let search = registry.get_capabilities("search").unwrap();
        assert_eq!(search.tools, vec!["legal_search", "market_data", "loan_data"]);
    }

    #[test]
    fn test_list_filters_disabled() {
        let mut registry = CapabilityRegistry::with_default_teams();
        registry.register(TeamCapabilities::new("document", "off").disabled());

        assert_eq!(registry.list(true), vec!["analysis", "search"]);
        assert_eq!(registry.list(false).len(), 3);
        assert!(!registry.is_available("document"));
        assert!(!registry.is_available("missing"));
    }
}
