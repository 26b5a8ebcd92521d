pub mod analyzer;
pub mod cache;
pub mod chart;
pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod file_loader;
pub mod fingerprint;
pub mod llm;
pub mod pipeline;
pub mod profile;
pub mod providers;
pub mod schema;
pub mod sql_guard;
pub mod table;
