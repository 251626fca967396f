pub mod agents;
pub mod api;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod evaluator;
pub mod llm;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod prompts;
pub mod redis_client;
pub mod references;
pub mod risk;
pub mod sessions;
