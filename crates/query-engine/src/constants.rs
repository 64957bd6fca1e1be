//! Engine-wide constants
//!
//! Single source of truth for thresholds and configuration defaults.

/// Team names known to the engine
pub mod teams {
    pub const SEARCH: &str = "search";
    pub const ANALYSIS: &str = "analysis";
    pub const DOCUMENT: &str = "document";

    /// Precedence used when synthesizing dependency edges
    pub const PRECEDENCE: [&str; 3] = [SEARCH, ANALYSIS, DOCUMENT];
}

/// Planner thresholds and estimates
pub mod planner {
    /// `Unclear` intents below this confidence produce an empty plan
    pub const UNCLEAR_FLOOR: f64 = 0.3;
    /// Plans for intents below this confidence get inflated timeouts
    pub const LOW_CONFIDENCE: f64 = 0.5;
    /// Timeout multiplier applied to low-confidence plans
    pub const TIMEOUT_FACTOR: f64 = 1.5;
    /// Estimated seconds per team step
    pub const SEARCH_ESTIMATE_SECS: u64 = 5;
    pub const ANALYSIS_ESTIMATE_SECS: u64 = 15;
    pub const DOCUMENT_ESTIMATE_SECS: u64 = 20;
    /// Retries granted to every fresh step
    pub const DEFAULT_RETRIES: u32 = 1;
}

/// Orchestrator thresholds
pub mod orchestrator {
    /// Result quality below this triggers adjustments for pending teams
    pub const QUALITY_THRESHOLD: f64 = 0.5;
    /// Weight of a new observation in the smoothed success rate
    pub const SMOOTHING_ALPHA: f64 = 0.1;
    /// Tools below this learned success rate are dropped from selections
    pub const MIN_SUCCESS_RATE: f64 = 0.3;
    /// Observations required before a learned rate is trusted
    pub const MIN_SAMPLES: u64 = 3;
    /// Success rate assumed for a tool with no history
    pub const PRIOR_SUCCESS_RATE: f64 = 0.8;
}

/// Language-model call defaults
pub mod model {
    pub const TEMPERATURE: f32 = 0.1;
    pub const MAX_TOKENS: u32 = 800;
}

/// Team runtime defaults
pub mod defaults {
    /// Per-tool timeout inside the Search team
    pub const TOOL_TIMEOUT_SECS: u64 = 10;
    /// Results fetched per tool call
    pub const TOOL_RESULT_LIMIT: usize = 10;
    /// Default directory for file-backed checkpoints
    pub const CHECKPOINT_DIR: &str = "data/checkpoints";
    /// Default directory for file-backed tool statistics
    pub const STATISTICS_DIR: &str = "data/statistics";
}

/// Prompt names understood by the language-model seam
pub mod prompts {
    pub const INTENT_ANALYSIS: &str = "intent_analysis";
    pub const AGENT_SELECTION: &str = "agent_selection";
    pub const AGENT_SELECTION_SIMPLE: &str = "agent_selection_simple";
    pub const TASK_DECOMPOSITION: &str = "task_decomposition";
    pub const ORCHESTRATION_STRATEGY: &str = "orchestration_strategy";
    pub const KEYWORD_EXTRACTION: &str = "keyword_extraction";
    pub const TOOL_SELECTION: &str = "tool_selection";
    pub const RESPONSE_SYNTHESIS: &str = "response_synthesis";
    pub const DOCUMENT_DRAFT: &str = "document_draft";
    pub const ANALYSIS_INSIGHTS: &str = "analysis_insights";
}
