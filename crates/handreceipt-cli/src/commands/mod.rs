pub mod auth_cmd;
pub mod common;
pub mod completions;
pub mod config;
pub mod list;
pub mod manage;
pub mod requests;
pub mod scan;
pub mod stats;
pub mod sync;
