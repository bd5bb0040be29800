//! The Playbook Runner (§4.9): a uniform interface over two execution modes,
//! both surfacing the same error taxonomy and neither ever writing a
//! credential to its own logs.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use ssh2::Session;
use tracing::debug;

use crate::error::CoreError;
use crate::mission::exploit::OsFamily;
use crate::platform::ExecResult;
use crate::secrets::SecretOracle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybookStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PlaybookOutcome {
    pub status: PlaybookStatus,
    pub log: String,
}

pub trait PlaybookRunner: Send + Sync {
    fn run_script(&self, host: &str, os_family: OsFamily, script: &str) -> Result<ExecResult, CoreError>;

    fn run_playbook(
        &self,
        hosts: &[String],
        playbook_path: &str,
        extra_vars: &HashMap<String, String>,
    ) -> Result<PlaybookOutcome, CoreError>;
}

/// Runs scripts over SSH (Unix) or a WinRM-style HTTP endpoint (Windows), and
/// wraps an external configuration-management executable for playbooks.
pub struct ExternalPlaybookRunner {
    secrets: Arc<dyn SecretOracle>,
    default_username: String,
    winrm_port: u16,
    playbook_binary: String,
}

impl ExternalPlaybookRunner {
    pub fn new(secrets: Arc<dyn SecretOracle>, default_username: impl Into<String>, playbook_binary: impl Into<String>) -> Self {
        Self {
            secrets,
            default_username: default_username.into(),
            winrm_port: 5985,
            playbook_binary: playbook_binary.into(),
        }
    }

    fn secret_for_host(&self, host: &str) -> Result<String, CoreError> {
        let bytes = self.secrets.get_secret(host)?;
        String::from_utf8(bytes).map_err(|_| CoreError::Internal("secret is not valid utf-8".to_string()))
    }

    fn run_script_ssh(&self, host: &str, script: &str) -> Result<ExecResult, CoreError> {
        let password = self.secret_for_host(host)?;
        let tcp = TcpStream::connect((host, 22)).map_err(|e| CoreError::BackendUnreachable(e.to_string()))?;
        let mut session = Session::new().map_err(|e| CoreError::Internal(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| CoreError::BackendUnreachable(e.to_string()))?;
        session
            .userauth_password(&self.default_username, &password)
            .map_err(|e| CoreError::AuthFailed(e.to_string()))?;

        let mut channel = session.channel_session().map_err(|e| CoreError::BackendUnreachable(e.to_string()))?;
        channel.exec(&format!("bash -c '{script}'")).map_err(|e| CoreError::BackendUnreachable(e.to_string()))?;
        let mut stdout = String::new();
        channel.read_to_string(&mut stdout).map_err(|e| CoreError::Internal(e.to_string()))?;
        let mut stderr = String::new();
        channel.stderr().read_to_string(&mut stderr).map_err(|e| CoreError::Internal(e.to_string()))?;
        channel.wait_close().map_err(|e| CoreError::Internal(e.to_string()))?;
        let exit_code = channel.exit_status().map_err(|e| CoreError::Internal(e.to_string()))?;

        debug!(host, exit_code, "executed script over ssh");
        Ok(ExecResult { stdout, stderr, exit_code })
    }

    fn run_script_winrm(&self, host: &str, script: &str) -> Result<ExecResult, CoreError> {
        let password = self.secret_for_host(host)?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        let url = format!("http://{host}:{}/wsman", self.winrm_port);
        let response = client
            .post(&url)
            .basic_auth(&self.default_username, Some(&password))
            .body(script.to_string())
            .send()
            .map_err(|e| CoreError::BackendUnreachable(e.to_string()))?;
        let status = response.status();
        if status.as_u16() == 401 {
            return Err(CoreError::AuthFailed(format!("winrm auth rejected for {host}")));
        }
        if !status.is_success() {
            return Err(CoreError::BackendUnreachable(format!("winrm call to {host} returned {status}")));
        }
        let stdout = response.text().unwrap_or_default();
        debug!(host, "executed script over winrm");
        Ok(ExecResult { stdout, stderr: String::new(), exit_code: 0 })
    }
}

impl PlaybookRunner for ExternalPlaybookRunner {
    fn run_script(&self, host: &str, os_family: OsFamily, script: &str) -> Result<ExecResult, CoreError> {
        match os_family {
            OsFamily::Linux => self.run_script_ssh(host, script),
            OsFamily::Windows => self.run_script_winrm(host, script),
        }
    }

    fn run_playbook(
        &self,
        hosts: &[String],
        playbook_path: &str,
        extra_vars: &HashMap<String, String>,
    ) -> Result<PlaybookOutcome, CoreError> {
        let mut inventory_file = tempfile::NamedTempFile::new().map_err(|e| CoreError::Internal(e.to_string()))?;
        for host in hosts {
            writeln!(inventory_file, "{host} ansible_user={}", self.default_username)
                .map_err(|e| CoreError::Internal(e.to_string()))?;
        }

        let extra_vars_json = serde_json::to_string(extra_vars).map_err(|e| CoreError::Internal(e.to_string()))?;
        let output = Command::new(&self.playbook_binary)
            .arg("-i")
            .arg(inventory_file.path())
            .arg(playbook_path)
            .arg("--extra-vars")
            .arg(&extra_vars_json)
            .output()
            .map_err(|e| CoreError::BackendUnreachable(format!("failed to launch {}: {e}", self.playbook_binary)))?;

        let log = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let status = if output.status.success() { PlaybookStatus::Success } else { PlaybookStatus::Failed };
        Ok(PlaybookOutcome { status, log })
    }
}
