// ABOUTME: Shared configuration constants for the Sandcastle workspace
// ABOUTME: Exposes environment variable names and defaults plus a boolean flag parser

pub mod constants;

use tracing::warn;

/// Parse a boolean-ish environment value ("1", "true", "yes", "on").
///
/// Unrecognised values fall back to `default` with a warning.
pub fn parse_flag(name: &str, value: &str, default: bool) -> bool {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" | "" => false,
        other => {
            warn!("Ignoring unrecognised value {:?} for {}", other, name);
            default
        }
    }
}
