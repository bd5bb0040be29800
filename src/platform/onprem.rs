//! The on-prem hypervisor adapter (§6): drives a single hypervisor host over
//! SSH, issuing the same CLI-style commands an operator would type by hand.

use std::io::Read;
use std::net::TcpStream;
use std::time::{Duration, Instant};

use ssh2::Session;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::network::NetworkLease;
use crate::platform::adapter::{CloneSpec, Credential, ExecResult, PlatformAdapter, PowerOp};
use crate::resource::{Resource, ResourceIdentity, ResourceKind, ResourceState};

#[derive(Debug, Clone)]
pub struct OnPremConfig {
    pub instance_id: String,
    pub host: String,
    pub user: String,
    pub password: String,
    pub verify_tls: bool,
    pub storage_pool: String,
    pub node_name: String,
}

pub struct OnPremAdapter {
    config: OnPremConfig,
}

impl OnPremAdapter {
    pub fn new(config: OnPremConfig) -> Self {
        Self { config }
    }

    fn connect(&self) -> Result<Session, CoreError> {
        let tcp = TcpStream::connect((self.config.host.as_str(), 22))
            .map_err(|e| CoreError::BackendUnreachable(format!("{}: {e}", self.config.host)))?;
        let mut session = Session::new()
            .map_err(|e| CoreError::Internal(format!("ssh session init failed: {e}")))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| CoreError::BackendUnreachable(format!("ssh handshake failed: {e}")))?;
        session
            .userauth_password(&self.config.user, &self.config.password)
            .map_err(|e| CoreError::AuthFailed(format!("ssh auth failed: {e}")))?;
        Ok(session)
    }

    fn run(&self, session: &Session, command: &str) -> Result<ExecResult, CoreError> {
        let mut channel = session
            .channel_session()
            .map_err(|e| CoreError::BackendUnreachable(format!("channel open failed: {e}")))?;
        channel
            .exec(command)
            .map_err(|e| CoreError::BackendUnreachable(format!("exec failed: {e}")))?;

        let mut stdout = String::new();
        channel
            .read_to_string(&mut stdout)
            .map_err(|e| CoreError::Internal(format!("stdout read failed: {e}")))?;
        let mut stderr = String::new();
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .map_err(|e| CoreError::Internal(format!("stderr read failed: {e}")))?;
        channel
            .wait_close()
            .map_err(|e| CoreError::Internal(format!("channel close failed: {e}")))?;
        let exit_code = channel
            .exit_status()
            .map_err(|e| CoreError::Internal(format!("exit status read failed: {e}")))?;

        debug!(node = %self.config.node_name, command, exit_code, "ran hypervisor command");
        Ok(ExecResult { stdout, stderr, exit_code })
    }
}

impl PlatformAdapter for OnPremAdapter {
    fn backend_kind(&self) -> &str {
        "onprem"
    }

    fn backend_instance_id(&self) -> &str {
        &self.config.instance_id
    }

    fn clone_from_template(&self, spec: &CloneSpec) -> Result<String, CoreError> {
        let session = self.connect()?;
        let command = format!(
            "virsh vol-clone --pool {pool} {template} {name}-{request_id}",
            pool = self.config.storage_pool,
            template = spec.template_ref,
            name = spec.name,
            request_id = spec.request_id,
        );
        let result = self.run(&session, &command)?;
        if result.exit_code != 0 {
            if result.stderr.contains("already exists") {
                return Ok(format!("{}-{}", spec.name, spec.request_id));
            }
            if result.stderr.to_lowercase().contains("quota") {
                return Err(CoreError::QuotaExceeded(result.stderr));
            }
            if result.stderr.to_lowercase().contains("in use") {
                return Err(CoreError::NameCollision(spec.name.clone()));
            }
            return Err(CoreError::BackendUnreachable(result.stderr));
        }
        Ok(format!("{}-{}", spec.name, spec.request_id))
    }

    fn set_power(&self, native_id: &str, op: PowerOp) -> Result<(), CoreError> {
        let session = self.connect()?;
        let verb = match op {
            PowerOp::On => "start",
            PowerOp::Off => "shutdown",
            PowerOp::Reset => "reset",
        };
        let result = self.run(&session, &format!("virsh {verb} {native_id}"))?;
        if result.exit_code != 0 {
            if result.stderr.contains("not found") {
                return Err(CoreError::ResourceMissing(ResourceIdentity::new(
                    "onprem",
                    &self.config.instance_id,
                    native_id,
                )));
            }
            return Err(CoreError::TransitionBusy(ResourceIdentity::new(
                "onprem",
                &self.config.instance_id,
                native_id,
            )));
        }
        Ok(())
    }

    fn wait_for_liveness(&self, native_id: &str, deadline: Duration) -> Result<String, CoreError> {
        let deadline_at = Instant::now() + deadline;
        let session = self.connect()?;
        loop {
            let result = self.run(&session, &format!("virsh domifaddr {native_id}"))?;
            if let Some(ip) = result.stdout.lines().find_map(extract_ipv4) {
                return Ok(ip);
            }
            if Instant::now() >= deadline_at {
                return Err(CoreError::Timeout(format!("{native_id} did not report an IP in time")));
            }
            std::thread::sleep(Duration::from_secs(2));
        }
    }

    fn delete(&self, native_id: &str, force: bool) -> Result<(), CoreError> {
        let session = self.connect()?;
        let flag = if force { "--remove-all-storage" } else { "" };
        let result = self.run(&session, &format!("virsh undefine {native_id} {flag}"))?;
        if result.exit_code != 0 && !result.stderr.contains("not found") {
            warn!(native_id, stderr = %result.stderr, "delete reported non-zero but not already-missing");
            return Err(CoreError::BackendUnreachable(result.stderr));
        }
        Ok(())
    }

    fn list_resources(&self, kind_filter: Option<&str>) -> Result<Vec<Resource>, CoreError> {
        let session = self.connect()?;
        let result = self.run(&session, "virsh list --all --name")?;
        Ok(result
            .stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|native_id| {
                Resource::new(
                    ResourceIdentity::new("onprem", &self.config.instance_id, native_id),
                    ResourceKind::Vm,
                    native_id,
                )
                .with_state(ResourceState::Running)
            })
            .filter(|r| kind_filter.map(|k| k == "vm").unwrap_or(true))
            .collect())
    }

    fn attach_network(&self, native_id: &str, lease: &NetworkLease) -> Result<(), CoreError> {
        let session = self.connect()?;
        let command = format!("virsh attach-interface {native_id} bridge vlan{} --live", lease.vlan);
        let result = self.run(&session, &command)?;
        if result.exit_code != 0 {
            return Err(CoreError::BackendUnreachable(result.stderr));
        }
        Ok(())
    }

    fn exec_command(&self, native_id: &str, credential: &Credential, command: &str) -> Result<ExecResult, CoreError> {
        let session = self.connect()?;
        let guest_command = format!(
            "virsh qemu-agent-command {native_id} '{{\"execute\":\"guest-exec\",\"arguments\":{{\"path\":\"/bin/sh\",\"arg\":[\"-c\",\"{command}\"],\"capture-output\":true}}}}'"
        );
        let _ = &credential.username;
        self.run(&session, &guest_command)
    }
}

fn extract_ipv4(line: &str) -> Option<String> {
    line.split_whitespace()
        .find(|token| token.contains('.') && token.split('.').count() == 4)
        .map(|s| s.trim_end_matches("/24").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_ipv4_finds_address_in_domifaddr_line() {
        let line = " vnet0      52:54:00:aa:bb:cc    ipv4         10.100.0.42/24";
        assert_eq!(extract_ipv4(line), Some("10.100.0.42".to_string()));
    }

    #[test]
    fn extract_ipv4_returns_none_without_address() {
        let line = " vnet0      52:54:00:aa:bb:cc    -            -";
        assert_eq!(extract_ipv4(line), None);
    }
}
