pub mod analyze;
pub mod apply;
pub mod approval;
pub mod checkpoint;
pub mod commands;
pub mod config;
pub mod ecosystem;
pub mod events;
pub mod http;
pub mod registry;
pub mod report;
pub mod risk;
pub mod runtime;
pub mod tree;
