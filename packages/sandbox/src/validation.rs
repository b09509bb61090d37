// ABOUTME: Input validation for sandbox creation and command execution requests
// ABOUTME: All checks run before anything is written

use crate::error::{Result, SandboxError};
use url::Url;

pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.trim().is_empty() {
        return Err(SandboxError::Validation(
            "session_id must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Repository URLs must be absolute http(s) URLs with a host
pub fn validate_repo_url(repo_url: &str) -> Result<()> {
    let url = Url::parse(repo_url)
        .map_err(|e| SandboxError::Validation(format!("Invalid repo_url '{}': {}", repo_url, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(SandboxError::Validation(format!(
            "repo_url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(SandboxError::Validation(
            "repo_url must include a host".to_string(),
        ));
    }

    Ok(())
}

pub fn validate_vcpus(vcpus: u32, max_vcpus: u32) -> Result<()> {
    if vcpus < 1 || vcpus > max_vcpus {
        return Err(SandboxError::Validation(format!(
            "vcpus must be between 1 and {}, got {}",
            max_vcpus, vcpus
        )));
    }
    Ok(())
}

pub fn validate_command(command: &str, max_length: usize) -> Result<()> {
    if command.trim().is_empty() {
        return Err(SandboxError::Validation(
            "command must not be empty".to_string(),
        ));
    }

    if command.len() > max_length {
        return Err(SandboxError::Validation(format!(
            "command exceeds {} bytes",
            max_length
        )));
    }

    Ok(())
}
