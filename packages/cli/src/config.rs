// ABOUTME: Resolves sandbox settings from the environment and command line flags
// ABOUTME: Flags override environment values, which override built-in defaults

use anyhow::{Context, Result};
use sandcastle_sandbox::SandboxSettings;
use std::path::Path;

/// Values given on the command line; `None` keeps the environment/default value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub image: Option<String>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub timeout: Option<u64>,
    pub port: Option<u16>,
    pub debug: bool,
}

impl Overrides {
    pub fn apply(&self, mut settings: SandboxSettings) -> Result<SandboxSettings> {
        if let Some(image) = &self.image {
            settings.image = image.clone();
        }
        if let Some(cpu) = &self.cpu {
            settings.cpu_limit = cpu.clone();
        }
        if let Some(memory) = &self.memory {
            settings.memory_limit = memory.clone();
        }
        if let Some(timeout) = self.timeout {
            settings.timeout_secs = timeout;
        }
        if let Some(port) = self.port {
            settings.host_port = port;
        }
        settings.debug |= self.debug;

        settings.validate().context("Invalid command line settings")?;
        Ok(settings)
    }
}

/// Load `.env` from the working directory into the process environment.
/// A missing file is not an error.
pub fn load_dotenv() -> std::result::Result<(), dotenvy::Error> {
    ignore_missing(dotenvy::dotenv().map(|_| ()))
}

/// Load a specific env file into the process environment
pub fn load_env_file(path: &Path) -> std::result::Result<(), dotenvy::Error> {
    ignore_missing(dotenvy::from_path(path))
}

fn ignore_missing(result: std::result::Result<(), dotenvy::Error>) -> std::result::Result<(), dotenvy::Error> {
    match result {
        Err(e) if e.not_found() => Ok(()),
        other => other,
    }
}

/// Read the environment (after `load_dotenv`), then apply flag overrides
pub fn load_settings(overrides: &Overrides) -> Result<SandboxSettings> {
    let settings = SandboxSettings::from_env().context("Failed to read sandbox settings")?;
    overrides.apply(settings)
}
