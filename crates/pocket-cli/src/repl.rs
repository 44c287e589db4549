//! The interactive prompt loop

use std::io::Write;
use std::time::Duration;

use crossterm::style::Stylize;
use pocket_core::session::Exchange;
use pocket_core::{LoopEvent, LoopOutcome, LoopStatus, Orchestrator, SessionId};
use pocket_wallet::{PRODUCT_NAME, WALLET_FACT};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::command::{Command, HELP};

/// Exchanges shown as context before each answer
const CONTEXT_EXCHANGES: usize = 2;

pub async fn run(orch: &Orchestrator) -> anyhow::Result<()> {
    let session = SessionId::new();
    orch.open_session(&session);
    banner(orch);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", "You:".green().bold());
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };

        match Command::parse(&line) {
            Command::Empty => {}
            Command::Quit => break,
            Command::ClearHistory => {
                orch.clear_history(&session);
                notice("Conversation history cleared.");
            }
            Command::ShowHistory => show_history(&orch.history(&session)),
            Command::ShowWallet => match orch.fact(&session, WALLET_FACT) {
                Some(address) => notice(&format!("Current wallet address: {}", address)),
                None => notice("No wallet address set."),
            },
            Command::ClearWallet => {
                orch.forget_fact(&session, WALLET_FACT);
                notice("Wallet address cleared.");
            }
            Command::ToggleStream => {
                let enabled = !orch.is_streaming();
                orch.set_streaming(enabled);
                notice(&format!("Streaming {}.", if enabled { "enabled" } else { "disabled" }));
            }
            Command::Query(query) => ask(orch, &session, &query).await?,
        }
    }

    orch.close_session(&session);
    println!("{}", "Goodbye!".cyan());
    Ok(())
}

async fn ask(orch: &Orchestrator, session: &SessionId, query: &str) -> anyhow::Result<()> {
    let recent = orch.recent_history(session, CONTEXT_EXCHANGES);
    if !recent.is_empty() {
        println!("{}", "Context:".dim());
        for exchange in &recent {
            println!("{}", format!("  > {}", exchange.query).dim());
            println!("{}", format!("  < {}", first_line(&exchange.response)).dim());
        }
    }

    let streaming = orch.is_streaming();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let query_run = async move {
        let result = orch.handle_query(session, query, Some(&tx)).await;
        drop(tx);
        result
    };
    let printer = async {
        let mut in_text = false;
        while let Some(event) = rx.recv().await {
            if let LoopEvent::TextDelta { text } = &event {
                if !in_text {
                    print!("{} ", "Assistant:".cyan().bold());
                    in_text = true;
                }
                print!("{}", text);
                let _ = std::io::stdout().flush();
                continue;
            }
            if in_text {
                println!();
                in_text = false;
            }
            if let Some(line) = describe_event(&event) {
                println!("{}", line.yellow());
            }
        }
        if in_text {
            println!();
        }
    };

    let (result, ()) = tokio::join!(query_run, printer);
    match result {
        Ok(outcome) => {
            if !streaming {
                println!("{} {}", "Assistant:".cyan().bold(), outcome.text);
            }
            println!("{}", footer(&outcome).dim());
        }
        Err(e) => {
            tracing::warn!(error = %e, "Query failed");
            println!("{} {}", "Error:".red().bold(), e.user_message());
        }
    }
    println!();
    Ok(())
}

/// One status line per loop event, if it has one
pub fn describe_event(event: &LoopEvent) -> Option<String> {
    match event {
        LoopEvent::ToolCalled { name, arguments, .. } => {
            Some(format!("[Calling tool {} with args {}]", name, arguments))
        }
        LoopEvent::ToolFailed { name, message, .. } => Some(format!("[Tool {} failed: {}]", name, message)),
        LoopEvent::IterationLimitReached { max_iterations } => {
            Some(format!("[Stopped after {} iterations without a final answer]", max_iterations))
        }
        LoopEvent::IterationStarted { .. } | LoopEvent::ToolSucceeded { .. } | LoopEvent::TextDelta { .. } => None,
    }
}

pub fn footer(outcome: &LoopOutcome) -> String {
    let mut line = format!("(response time: {})", seconds(outcome.elapsed));
    if outcome.status == LoopStatus::IterationLimitReached {
        line.push_str(" (iteration limit reached)");
    }
    line
}

fn seconds(elapsed: Duration) -> String {
    format!("{:.2}s", elapsed.as_secs_f64())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

fn banner(orch: &Orchestrator) {
    println!();
    println!("{}", format!("{} - Solana wallet agent", PRODUCT_NAME).cyan().bold());
    println!("Connected tools: {}", orch.tool_names().join(", "));
    println!("{}", HELP.dim());
    println!();
}

fn notice(text: &str) {
    println!("{}", text.yellow());
}

fn show_history(history: &[Exchange]) {
    if history.is_empty() {
        notice("No conversation history yet.");
        return;
    }
    println!("{}", "Conversation history:".bold());
    for (i, exchange) in history.iter().enumerate() {
        println!("{} {}", format!("[{}] You:", i + 1).green(), exchange.query);
        println!("{} {}", "    Assistant:".cyan(), exchange.response);
    }
}
