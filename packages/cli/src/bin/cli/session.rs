// ABOUTME: Request execution commands: single message and interactive loop
// ABOUTME: Streams fragments to stdout as they arrive and cancels the session on Ctrl+C

use anyhow::Result;
use colored::*;
use sandcastle_cli::output::result_lines;
use sandcastle_sandbox::{ExecutionResult, SandboxOrchestrator};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};

const EXIT_WORDS: [&str; 3] = ["exit", "quit", "q"];

/// Run one request, printing fragments live
async fn execute(orchestrator: &SandboxOrchestrator, text: &str) -> ExecutionResult {
    let (fragment_tx, mut fragment_rx) = mpsc::unbounded_channel::<String>();
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(fragment) = fragment_rx.recv().await {
            let _ = write!(stdout, "{}", fragment);
            let _ = stdout.flush();
        }
    });

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let result = orchestrator
        .execute_with(text, Some(fragment_tx), Some(cancel_rx))
        .await;

    interrupt.abort();
    let _ = printer.await;
    println!();

    for line in result_lines(&result) {
        println!("{}", line);
    }
    result
}

/// Returns whether the request succeeded
pub async fn run_once(orchestrator: &SandboxOrchestrator, message: &str) -> bool {
    println!("{} {}", "Sending:".bold(), message);
    execute(orchestrator, message).await.success
}

pub async fn interactive(orchestrator: &SandboxOrchestrator) -> Result<()> {
    println!("{}", "=== Sandcastle interactive mode ===".bold());
    println!("Type 'exit' or 'quit' to leave; Ctrl+C cancels the running request.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", ">>>".bold());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&input.to_lowercase().as_str()) {
            break;
        }

        execute(orchestrator, input).await;
    }

    println!("Bye");
    Ok(())
}
