// ABOUTME: Library half of the sandcastle binary
// ABOUTME: Settings overrides from flags, logging setup and result rendering

pub mod config;
pub mod logging;
pub mod output;
