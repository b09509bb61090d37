// ABOUTME: Domain types for sandboxes and the commands executed inside them
// ABOUTME: Closed status enums, typed state transitions and timestamp encoding

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Language runtime a sandbox is provisioned with
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Nodejs,
    Python,
}

impl Runtime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nodejs => "nodejs",
            Self::Python => "python",
        }
    }
}

impl FromStr for Runtime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nodejs" => Ok(Self::Nodejs),
            "python" => Ok(Self::Python),
            other => Err(format!(
                "Unsupported runtime '{}' (expected 'nodejs' or 'python')",
                other
            )),
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    Creating,
    Active,
    Stopped,
    Error,
}

impl SandboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Active => "active",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    /// `creating` and `active` sandboxes count against the one-per-session limit
    pub fn is_live(&self) -> bool {
        match self {
            Self::Creating | Self::Active => true,
            Self::Stopped | Self::Error => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_live()
    }
}

impl FromStr for SandboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(Self::Creating),
            "active" => Ok(Self::Active),
            "stopped" => Ok(Self::Stopped),
            "error" => Ok(Self::Error),
            other => Err(format!("Unknown sandbox status '{}'", other)),
        }
    }
}

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Pending | Self::Running => false,
            Self::Completed | Self::Failed => true,
        }
    }
}

impl FromStr for CommandStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("Unknown command status '{}'", other)),
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sandbox {
    pub id: String,
    pub session_id: String,
    pub repo_url: String,
    pub runtime: Runtime,
    pub vcpus: u32,
    pub status: SandboxStatus,

    // Set by the compute backend
    pub external_handle: Option<String>,
    pub public_url: Option<String>,
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sandbox {
    /// A fresh `creating` sandbox with a newly generated id
    pub fn new_creating(
        session_id: impl Into<String>,
        repo_url: impl Into<String>,
        runtime: Runtime,
        vcpus: u32,
    ) -> Self {
        let now = now_micros();
        Self {
            id: format!("sbx_{}", uuid::Uuid::new_v4().to_string().replace('-', "")),
            session_id: session_id.into(),
            repo_url: repo_url.into(),
            runtime,
            vcpus,
            status: SandboxStatus::Creating,
            external_handle: None,
            public_url: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxCommand {
    pub id: String,
    pub sandbox_id: String,
    pub command: String,
    pub status: CommandStatus,
    pub output: Option<String>,
    pub error_output: Option<String>,
    pub exit_code: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SandboxCommand {
    pub fn new_pending(sandbox_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: format!("cmd_{}", uuid::Uuid::new_v4().to_string().replace('-', "")),
            sandbox_id: sandbox_id.into(),
            command: command.into(),
            status: CommandStatus::Pending,
            output: None,
            error_output: None,
            exit_code: None,
            created_at: now_micros(),
            completed_at: None,
        }
    }
}

/// A status change applied to a sandbox as a compare-and-set on its current status
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxTransition {
    /// Provisioning succeeded
    Activate {
        handle: String,
        public_url: Option<String>,
    },
    /// Provisioning failed or timed out
    Fail { message: String },
    /// Explicit stop or supersession; clears `public_url`
    Stop,
}

impl SandboxTransition {
    pub fn allowed_from(&self) -> &'static [SandboxStatus] {
        match self {
            Self::Activate { .. } | Self::Fail { .. } => &[SandboxStatus::Creating],
            Self::Stop => &[
                SandboxStatus::Creating,
                SandboxStatus::Active,
                SandboxStatus::Error,
            ],
        }
    }

    pub fn target(&self) -> SandboxStatus {
        match self {
            Self::Activate { .. } => SandboxStatus::Active,
            Self::Fail { .. } => SandboxStatus::Error,
            Self::Stop => SandboxStatus::Stopped,
        }
    }

    /// Apply to an in-memory row, returning false if the current status forbids it
    pub fn apply(&self, sandbox: &mut Sandbox, now: DateTime<Utc>) -> bool {
        if !self.allowed_from().contains(&sandbox.status) {
            return false;
        }

        match self {
            Self::Activate { handle, public_url } => {
                sandbox.external_handle = Some(handle.clone());
                sandbox.public_url = public_url.clone();
            }
            Self::Fail { message } => {
                sandbox.error_message = Some(message.clone());
            }
            Self::Stop => {
                sandbox.public_url = None;
            }
        }
        sandbox.status = self.target();
        sandbox.updated_at = now;
        true
    }
}

/// Final result of a command as recorded in one write
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub output: Option<String>,
    pub error_output: Option<String>,
    pub exit_code: i32,
    pub completed_at: DateTime<Utc>,
}

impl CommandOutcome {
    pub fn status(&self) -> CommandStatus {
        if self.exit_code == 0 {
            CommandStatus::Completed
        } else {
            CommandStatus::Failed
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandTransition {
    /// Dispatch picked the command up
    Start,
    /// The command reached a terminal status
    Finish(CommandOutcome),
}

impl CommandTransition {
    pub fn allowed_from(&self) -> &'static [CommandStatus] {
        match self {
            Self::Start => &[CommandStatus::Pending],
            Self::Finish(_) => &[CommandStatus::Pending, CommandStatus::Running],
        }
    }

    pub fn target(&self) -> CommandStatus {
        match self {
            Self::Start => CommandStatus::Running,
            Self::Finish(outcome) => outcome.status(),
        }
    }

    pub fn apply(&self, command: &mut SandboxCommand) -> bool {
        if !self.allowed_from().contains(&command.status) {
            return false;
        }

        if let Self::Finish(outcome) = self {
            command.output = outcome.output.clone();
            command.error_output = outcome.error_output.clone();
            command.exit_code = Some(outcome.exit_code);
            command.completed_at = Some(outcome.completed_at);
        }
        command.status = self.target();
        true
    }
}

/// Current time truncated to the microsecond precision rows are persisted with
pub fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    parse_timestamp(&format_timestamp(now)).unwrap_or(now)
}

/// Fixed-width RFC 3339 so lexical order equals chronological order
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_round_trip_through_strings() {
        for status in [
            SandboxStatus::Creating,
            SandboxStatus::Active,
            SandboxStatus::Stopped,
            SandboxStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<SandboxStatus>().unwrap(), status);
        }
        assert!("running".parse::<SandboxStatus>().is_err());
        assert!("ruby".parse::<Runtime>().is_err());
    }

    #[test]
    fn test_stop_clears_public_url_and_keeps_handle() {
        let mut sandbox = Sandbox::new_creating("s1", "https://github.com/a/b", Runtime::Nodejs, 2);
        let now = now_micros();
        assert!(SandboxTransition::Activate {
            handle: "h1".to_string(),
            public_url: Some("https://h1.example".to_string()),
        }
        .apply(&mut sandbox, now));

        assert!(SandboxTransition::Stop.apply(&mut sandbox, now));
        assert_eq!(sandbox.status, SandboxStatus::Stopped);
        assert_eq!(sandbox.public_url, None);
        assert_eq!(sandbox.external_handle.as_deref(), Some("h1"));

        // Stopped is final
        assert!(!SandboxTransition::Stop.apply(&mut sandbox, now));
    }

    #[test]
    fn test_activation_rejected_outside_creating() {
        let mut sandbox = Sandbox::new_creating("s1", "https://github.com/a/b", Runtime::Python, 1);
        let now = now_micros();
        assert!(SandboxTransition::Fail {
            message: "boom".to_string()
        }
        .apply(&mut sandbox, now));

        let activate = SandboxTransition::Activate {
            handle: "late".to_string(),
            public_url: None,
        };
        assert!(!activate.apply(&mut sandbox, now));
        assert_eq!(sandbox.status, SandboxStatus::Error);
        assert_eq!(sandbox.external_handle, None);
    }

    #[test]
    fn test_finish_sets_exit_code_and_completion_together() {
        let mut command = SandboxCommand::new_pending("sbx_1", "false");
        let outcome = CommandOutcome {
            output: None,
            error_output: Some("nope".to_string()),
            exit_code: 1,
            completed_at: now_micros(),
        };

        assert!(CommandTransition::Finish(outcome).apply(&mut command));
        assert_eq!(command.status, CommandStatus::Failed);
        assert_eq!(command.exit_code, Some(1));
        assert!(command.completed_at.is_some());
        assert!(!CommandTransition::Start.apply(&mut command));
    }

    #[test]
    fn test_timestamps_are_fixed_width() {
        let whole_second = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let formatted = format_timestamp(whole_second);
        assert_eq!(formatted, "2024-01-01T00:00:00.000000Z");
        assert_eq!(parse_timestamp(&formatted).unwrap(), whole_second);
    }

    #[test]
    fn test_ids_are_prefixed() {
        let sandbox = Sandbox::new_creating("s1", "https://github.com/a/b", Runtime::Nodejs, 2);
        let command = SandboxCommand::new_pending(&sandbox.id, "ls");
        assert!(sandbox.id.starts_with("sbx_"));
        assert_eq!(sandbox.id.len(), 4 + 32);
        assert!(command.id.starts_with("cmd_"));
    }
}
