//! Team Nodes - Search, Analysis and Document teams for the query engine
//!
//! Each team is a `StagePipeline` of graph-flow tasks:
//!
//! - **Search**: prepare -> route -> search -> aggregate -> finalize
//! - **Analysis**: preprocess -> statistics -> patterns -> insights -> report
//! - **Document**: planning -> aggregate (approval gate) -> generate
//!
//! `TeamNodeExecutor` plugs the pipelines into the supervisor; data comes
//! from `RetrievalTool`s registered in a `ToolRegistry`.
//!
//! # Example
//!
//! ```ignore
//! use team_nodes::{LegalSearchTool, TeamNodeExecutor, TeamServices, ToolRegistry};
//!
//! let tools = ToolRegistry::new().with_tool(Arc::new(LegalSearchTool::new(retriever, 5)));
//! let executor = TeamNodeExecutor::new(TeamServices::new(model, Arc::new(tools), config.teams));
//! ```

pub mod analysis;
pub mod document;
pub mod executor;
pub mod search;
pub mod services;
pub mod tools;

pub use document::DocumentPlan;
pub use executor::TeamNodeExecutor;
pub use services::TeamServices;
pub use tools::{run_tool, LegalSearchTool, RecordSearchTool, RetrievalTool, ToolRegistry};
