//! Terminal Approval Prompt
//!
//! Interactive confirmation for mutating tools in `review` mode. Reads
//! answers from stdin between REPL turns, when the line editor is not
//! active, so the two never consume the same bytes.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use console::style;

use bailu_core::mediator::{ApprovalDecision, ApprovalPrompt, ApprovalRequest};

pub struct TerminalApproval;

#[async_trait]
impl ApprovalPrompt for TerminalApproval {
    async fn confirm(&self, request: &ApprovalRequest) -> Result<ApprovalDecision> {
        eprintln!();
        eprintln!(
            "{} {}",
            style("⚙ approval needed:").yellow().bold(),
            request.summary
        );

        if let Some(diff) = &request.diff {
            let rendered = if request.show_full {
                &diff.full
            } else {
                &diff.preview
            };
            if !rendered.is_empty() {
                eprintln!("{}", rendered);
            }
            eprintln!(
                "{}",
                style(format!("+{} / -{} lines", diff.added, diff.removed)).dim()
            );
        }

        loop {
            eprint!("{} ", style("[y]es / [n]o / [d]iff / [q]uit:").bold());
            let answer = read_line().await?;
            match answer.trim().to_lowercase().as_str() {
                "y" | "yes" => return Ok(ApprovalDecision::Yes),
                "n" | "no" => return Ok(ApprovalDecision::No),
                "d" | "diff" => return Ok(ApprovalDecision::Diff),
                "q" | "quit" => return Ok(ApprovalDecision::Quit),
                other => eprintln!("unrecognized answer '{}'", other),
            }
        }
    }

    async fn confirm_rollback(&self, path: &Path, error: &str) -> Result<bool> {
        eprintln!();
        eprintln!("{} {}", style("✗").red().bold(), error);
        eprint!(
            "{} restore {} from its backup? [y/N] ",
            style("↩").yellow(),
            path.display()
        );
        let answer = read_line().await?;
        Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
    }
}

/// One blocking stdin line, off the async runtime.
async fn read_line() -> Result<String> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin()
            .read_line(&mut line)
            .context("failed to read from stdin")?;
        Ok(line)
    })
    .await
    .context("stdin reader task failed")?
}
