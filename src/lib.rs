pub mod analyzer;
pub mod config;
pub mod ecosystem;
pub mod governor;
pub mod isolation;
pub mod logging;
pub mod merge;
pub mod model;
pub mod orchestrator;
pub mod registry;
