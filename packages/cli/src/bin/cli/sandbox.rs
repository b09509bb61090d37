// ABOUTME: CLI commands for sandboxes served by a running devbox server
// ABOUTME: Create, inspect, run commands in and stop a session's sandbox

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::*;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use serde_json::json;
use std::time::Duration;

use super::client::ApiClient;
use devbox_sandbox::{CommandStatus, Runtime, Sandbox, SandboxCommand, SandboxStatus};

/// Polling cadence while waiting for a command to finish
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Subcommand)]
pub enum SandboxCommands {
    /// Create a sandbox for a session (stops the session's previous sandbox)
    Create {
        /// Session that owns the sandbox
        #[arg(short, long)]
        session: String,
        /// Repository to clone into the sandbox
        #[arg(short, long)]
        repo: String,
        /// Runtime: nodejs or python
        #[arg(long, default_value = "nodejs")]
        runtime: Runtime,
        /// Number of vCPUs (1-8)
        #[arg(long, default_value = "2")]
        vcpus: u32,
    },
    /// Show the session's current sandbox
    Status {
        #[arg(short, long)]
        session: String,
    },
    /// Run a shell command in a sandbox
    Exec {
        sandbox_id: String,
        /// Command text; quote it to keep shell operators
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
        /// Return as soon as the command is queued
        #[arg(long)]
        no_wait: bool,
    },
    /// Stop a sandbox
    Stop { sandbox_id: String },
    /// List commands run in a sandbox, newest first
    History { sandbox_id: String },
    /// Show a command with its output
    Show { command_id: String },
}

impl SandboxCommands {
    pub async fn execute(self, client: &ApiClient) -> Result<()> {
        match self {
            SandboxCommands::Create {
                session,
                repo,
                runtime,
                vcpus,
            } => create_command(client, &session, &repo, runtime, vcpus).await,
            SandboxCommands::Status { session } => status_command(client, &session).await,
            SandboxCommands::Exec {
                sandbox_id,
                command,
                no_wait,
            } => exec_command(client, &sandbox_id, &command.join(" "), !no_wait).await,
            SandboxCommands::Stop { sandbox_id } => stop_command(client, &sandbox_id).await,
            SandboxCommands::History { sandbox_id } => history_command(client, &sandbox_id).await,
            SandboxCommands::Show { command_id } => show_command(client, &command_id).await,
        }
    }
}

async fn create_command(
    client: &ApiClient,
    session: &str,
    repo: &str,
    runtime: Runtime,
    vcpus: u32,
) -> Result<()> {
    let body = json!({
        "session_id": session,
        "repo_url": repo,
        "runtime": runtime,
        "vcpus": vcpus,
    });
    let sandbox: Option<Sandbox> = client.post(&["api", "sandboxes"], Some(&body)).await?;
    let Some(sandbox) = sandbox else {
        bail!("Server returned no sandbox");
    };

    println!("{} Sandbox {} is being created", "✓".green(), sandbox.id.cyan());
    println!(
        "{}",
        format!("Check progress with: devbox sandbox status --session {}", session).dimmed()
    );
    Ok(())
}

async fn status_command(client: &ApiClient, session: &str) -> Result<()> {
    match client
        .get::<Sandbox>(&["api", "sessions", session, "sandbox"])
        .await?
    {
        Some(sandbox) => print_sandbox(&sandbox),
        None => println!("{}", "No active sandbox for this session".yellow()),
    }
    Ok(())
}

async fn exec_command(client: &ApiClient, sandbox_id: &str, command: &str, wait: bool) -> Result<()> {
    let queued: Option<SandboxCommand> = client
        .post(
            &["api", "sandboxes", sandbox_id, "commands"],
            Some(&json!({ "command": command })),
        )
        .await?;
    let Some(mut current) = queued else {
        bail!("Server returned no command");
    };

    if !wait {
        println!("{} Command {} queued", "✓".green(), current.id.cyan());
        return Ok(());
    }

    let command_id = current.id.clone();
    while !current.status.is_terminal() {
        tokio::time::sleep(POLL_INTERVAL).await;
        match client
            .get::<SandboxCommand>(&["api", "commands", command_id.as_str()])
            .await?
        {
            Some(command) => current = command,
            None => bail!("Command {} disappeared", current.id),
        }
    }

    print_output(&current);
    Ok(())
}

async fn stop_command(client: &ApiClient, sandbox_id: &str) -> Result<()> {
    let stopped: Option<Sandbox> = client
        .post::<(), _>(&["api", "sandboxes", sandbox_id, "stop"], None)
        .await?;
    if let Some(sandbox) = stopped {
        println!("{} Sandbox {} stopped", "✓".green(), sandbox.id.cyan());
    }
    Ok(())
}

async fn history_command(client: &ApiClient, sandbox_id: &str) -> Result<()> {
    let commands: Vec<SandboxCommand> = client
        .get(&["api", "sandboxes", sandbox_id, "commands"])
        .await?
        .unwrap_or_default();

    if commands.is_empty() {
        println!("{}", "No commands found".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec!["ID", "Command", "Status", "Exit", "Started"]);

    for command in &commands {
        table.add_row(vec![
            command.id.clone(),
            truncate(&command.command, 40),
            command.status.to_string(),
            command
                .exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "-".to_string()),
            command.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }

    println!("{}", table);
    println!("Total: {} commands", commands.len().to_string().cyan());
    Ok(())
}

async fn show_command(client: &ApiClient, command_id: &str) -> Result<()> {
    match client
        .get::<SandboxCommand>(&["api", "commands", command_id])
        .await?
    {
        Some(command) => {
            println!("{} {}", "$".dimmed(), command.command.bold());
            print_output(&command);
            Ok(())
        }
        None => bail!("Command not found: {}", command_id),
    }
}

fn print_sandbox(sandbox: &Sandbox) {
    let status = match sandbox.status {
        SandboxStatus::Active => sandbox.status.to_string().green(),
        SandboxStatus::Creating => sandbox.status.to_string().yellow(),
        SandboxStatus::Stopped => sandbox.status.to_string().dimmed(),
        SandboxStatus::Error => sandbox.status.to_string().red(),
    };

    println!("{}", format!("📦 Sandbox {}", sandbox.id).blue().bold());
    println!("Status:   {}", status);
    println!("Repo:     {}", sandbox.repo_url);
    println!("Runtime:  {} ({} vCPU)", sandbox.runtime, sandbox.vcpus);
    if let Some(url) = &sandbox.public_url {
        println!("URL:      {}", url.cyan());
    }
    if let Some(message) = &sandbox.error_message {
        println!("Error:    {}", message.red());
    }
    println!(
        "Created:  {}",
        sandbox.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
}

fn print_output(command: &SandboxCommand) {
    if let Some(output) = &command.output {
        print!("{}", output);
    }
    if let Some(error_output) = &command.error_output {
        eprint!("{}", error_output.red());
    }

    let code = command
        .exit_code
        .map(|code| code.to_string())
        .unwrap_or_else(|| "?".to_string());
    match command.status {
        CommandStatus::Completed => println!("{}", format!("exit {}", code).dimmed()),
        _ => println!("{}", format!("{} (exit {})", command.status, code).red()),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("ls -la", 40), "ls -la");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
    }
}
