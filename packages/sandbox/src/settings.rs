// ABOUTME: Tunable limits and timeouts for sandbox lifecycle and command dispatch
// ABOUTME: Built from environment configuration by the server, defaults suit local development

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSettings {
    // Resource Limits
    pub max_vcpus: u32,
    /// Upper bound on command text, in bytes
    pub max_command_length: usize,

    // Timeouts
    pub provision_timeout: Duration,
    pub command_timeout: Duration,
    pub teardown_timeout: Duration,

    /// Stop-then-insert attempts before a create gives up on concurrent creators
    pub create_attempts: u32,

    // Garbage collection
    /// Terminal sandboxes older than this are purged; `None` keeps them forever
    pub retention: Option<Duration>,
    pub reaper_interval: Duration,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            max_vcpus: 8,
            max_command_length: 16 * 1024,
            provision_timeout: Duration::from_secs(300),
            command_timeout: Duration::from_secs(600),
            teardown_timeout: Duration::from_secs(30),
            create_attempts: 3,
            retention: None,
            reaper_interval: Duration::from_secs(300),
        }
    }
}
