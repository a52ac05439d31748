//! Single question command

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::info;

use kbassist_agent::{CancellationToken, QueryRequest, QueryResponse};
use kbassist_core::AgentOutcome;

use crate::app::Services;
use crate::output::{self, OutputFormat};

pub struct AskArgs {
    pub query: String,
    pub session: Option<String>,
    pub user: String,
    pub top_k: Option<usize>,
}

pub async fn run(services: &Services, args: AskArgs, format: OutputFormat) -> Result<()> {
    let mut request = QueryRequest::new(args.query).with_user(args.user);
    if let Some(session) = args.session {
        request = request.with_session(session);
    }
    if let Some(top_k) = args.top_k {
        request = request.with_top_k(top_k);
    }

    // Ctrl-C stops the agent loop instead of killing the process
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, cancelling query");
                cancel.cancel();
            }
        })
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} {msg}")?,
    );
    spinner.set_message("Thinking...");
    spinner.enable_steady_tick(Duration::from_millis(80));

    let result = services.assistant.ask(request, &cancel).await;
    spinner.finish_and_clear();
    watcher.abort();

    let response = result.context("Query rejected")?;

    match output::format_structured(&response, format)? {
        Some(rendered) => println!("{}", rendered),
        None => print_response(&response),
    }

    Ok(())
}

fn print_response(response: &QueryResponse) {
    println!("{}", response.answer);

    match response.outcome {
        AgentOutcome::Answered => {}
        AgentOutcome::Exhausted => output::warning("Stopped at the iteration limit"),
        AgentOutcome::Failed => output::error("The assistant could not complete this request"),
        AgentOutcome::Cancelled => output::warning("Cancelled"),
    }

    if !response.sources.is_empty() {
        output::section("Sources");
        for (i, source) in response.sources.iter().enumerate() {
            output::list_item(
                i + 1,
                &format!("{} ({}) {:.3}", source.title, source.filename, source.score),
            );
        }
    }

    eprintln!();
    eprintln!(
        "{}",
        format!(
            "[{} | {} iteration(s) | session {}]",
            response.agent_plan, response.iterations, response.session_id
        )
        .dimmed()
    );
}
