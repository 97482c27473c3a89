// ABOUTME: Image preparation and instance management commands
// ABOUTME: Builds the image when needed and reports, probes or stops the running instance

use anyhow::{bail, Context, Result};
use chrono::Utc;
use colored::*;
use sandcastle_cli::output::status_lines;
use sandcastle_sandbox::SandboxOrchestrator;

/// Build the image if it is missing, or always when `force` is set
pub async fn prepare_image(orchestrator: &SandboxOrchestrator, image: &str, force: bool) -> Result<()> {
    if force {
        println!("Rebuilding image {}...", image.cyan());
        if !orchestrator.build_image().await {
            bail!("Failed to build image {}", image);
        }
        println!("{} Image built", "✓".green());
        return Ok(());
    }

    let built = orchestrator
        .ensure_image(false)
        .await
        .with_context(|| format!("Failed to prepare image {}", image))?;

    if built {
        println!("{} Built missing image {}", "✓".green(), image.cyan());
    } else {
        println!("Using existing image {}", image.cyan());
    }
    Ok(())
}

pub async fn status(orchestrator: &SandboxOrchestrator) -> Result<()> {
    if let Err(e) = orchestrator.discover().await {
        tracing::warn!("Instance discovery failed: {}", e);
    }

    let report = orchestrator.instance_status().await;
    for line in status_lines(&report, Utc::now()) {
        println!("{}", line);
    }
    Ok(())
}

pub async fn stop(orchestrator: &SandboxOrchestrator) -> Result<()> {
    let found = orchestrator
        .discover()
        .await
        .context("Failed to look for a running instance")?;

    let Some(instance) = found else {
        println!("No running sandbox instance");
        return Ok(());
    };

    orchestrator
        .stop()
        .await
        .context("Failed to stop the sandbox instance")?;
    println!(
        "{} Stopped instance {}",
        "✓".green(),
        instance.instance_id.unwrap_or_default()
    );
    Ok(())
}

pub async fn ping(orchestrator: &SandboxOrchestrator) -> Result<()> {
    if orchestrator.check_available().await {
        println!("{} Execution service is answering", "✓".green());
        Ok(())
    } else {
        bail!("Execution service is not answering");
    }
}
