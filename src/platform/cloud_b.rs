//! Cloud IaaS B adapter (§6): tenant/subscription-scoped, authenticated via a
//! client id/secret exchanged for a bearer token before each session.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::network::NetworkLease;
use crate::platform::adapter::{CloneSpec, Credential, ExecResult, PlatformAdapter, PowerOp};
use crate::resource::{Resource, ResourceIdentity, ResourceKind, ResourceState};

#[derive(Debug, Clone)]
pub struct CloudBConfig {
    pub instance_id: String,
    pub tenant_id: String,
    pub subscription_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub default_resource_group: String,
    pub default_vnet: String,
    pub api_base_url: String,
    pub token_url: String,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct CloudBAdapter {
    config: CloudBConfig,
    client: reqwest::blocking::Client,
    token: Mutex<Option<CachedToken>>,
}

impl CloudBAdapter {
    pub fn new(config: CloudBConfig) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client config should be valid");
        Self { config, client, token: Mutex::new(None) }
    }

    fn bearer_token(&self) -> Result<String, CoreError> {
        let mut cached = self.token.lock().expect("token cache lock poisoned");
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }
        #[derive(Serialize)]
        struct TokenRequest<'a> {
            tenant_id: &'a str,
            client_id: &'a str,
            client_secret: &'a str,
        }
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: u64,
        }
        let response = self
            .client
            .post(&self.config.token_url)
            .json(&TokenRequest {
                tenant_id: &self.config.tenant_id,
                client_id: &self.config.client_id,
                client_secret: &self.config.client_secret,
            })
            .send()
            .map_err(|e| CoreError::BackendUnreachable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CoreError::AuthFailed(response.text().unwrap_or_default()));
        }
        let parsed: TokenResponse = response
            .json()
            .map_err(|e| CoreError::Internal(format!("malformed token response: {e}")))?;
        *cached = Some(CachedToken {
            value: parsed.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(parsed.expires_in.saturating_sub(30)),
        });
        Ok(parsed.access_token)
    }

    fn request(&self, builder: reqwest::blocking::RequestBuilder) -> Result<reqwest::blocking::Response, CoreError> {
        let token = self.bearer_token()?;
        builder
            .bearer_auth(token)
            .send()
            .map_err(|e| CoreError::BackendUnreachable(e.to_string()))
    }

    fn map_status(&self, status: reqwest::StatusCode, body: &str) -> CoreError {
        match status.as_u16() {
            401 | 403 => CoreError::AuthFailed(body.to_string()),
            404 => CoreError::ResourceMissing(ResourceIdentity::new("cloud_b", &self.config.instance_id, "")),
            409 => CoreError::NameCollision(body.to_string()),
            429 | 503 => CoreError::QuotaExceeded(body.to_string()),
            _ => CoreError::BackendUnreachable(format!("{status}: {body}")),
        }
    }

    fn scope_url(&self, path: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/{}",
            self.config.api_base_url, self.config.subscription_id, self.config.default_resource_group, path
        )
    }
}

#[derive(Serialize)]
struct CreateVmRequest<'a> {
    template: &'a str,
    name: &'a str,
    cpu: u32,
    memory_mb: u64,
    disks_gb: &'a [u64],
    vnet: &'a str,
    request_id: &'a str,
}

#[derive(Deserialize)]
struct CreateVmResponse {
    vm_id: String,
}

#[derive(Deserialize)]
struct VmStatusResponse {
    power_state: String,
    private_ip: Option<String>,
}

#[derive(Deserialize)]
struct ListedVm {
    vm_id: String,
    name: String,
    power_state: String,
    kind: String,
}

impl PlatformAdapter for CloudBAdapter {
    fn backend_kind(&self) -> &str {
        "cloud_b"
    }

    fn backend_instance_id(&self) -> &str {
        &self.config.instance_id
    }

    fn clone_from_template(&self, spec: &CloneSpec) -> Result<String, CoreError> {
        let url = self.scope_url("virtualMachines");
        let body = CreateVmRequest {
            template: &spec.template_ref,
            name: &spec.name,
            cpu: spec.cpu,
            memory_mb: spec.memory_mb,
            disks_gb: &spec.disks_gb,
            vnet: &self.config.default_vnet,
            request_id: &spec.request_id,
        };
        let response = self.request(self.client.put(&url).json(&body))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(self.map_status(status, &text));
        }
        let parsed: CreateVmResponse = response
            .json()
            .map_err(|e| CoreError::Internal(format!("malformed response: {e}")))?;
        Ok(parsed.vm_id)
    }

    fn set_power(&self, native_id: &str, op: PowerOp) -> Result<(), CoreError> {
        let verb = match op {
            PowerOp::On => "start",
            PowerOp::Off => "powerOff",
            PowerOp::Reset => "restart",
        };
        let url = self.scope_url(&format!("virtualMachines/{native_id}/{verb}"));
        let response = self.request(self.client.post(&url))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(self.map_status(status, &text));
        }
        Ok(())
    }

    fn wait_for_liveness(&self, native_id: &str, deadline: Duration) -> Result<String, CoreError> {
        let deadline_at = Instant::now() + deadline;
        let url = self.scope_url(&format!("virtualMachines/{native_id}"));
        loop {
            let response = self.request(self.client.get(&url))?;
            if response.status().is_success() {
                let parsed: VmStatusResponse = response
                    .json()
                    .map_err(|e| CoreError::Internal(format!("malformed response: {e}")))?;
                if parsed.power_state == "running" {
                    if let Some(ip) = parsed.private_ip {
                        return Ok(ip);
                    }
                }
            }
            if Instant::now() >= deadline_at {
                return Err(CoreError::Timeout(format!("{native_id} not live before deadline")));
            }
            std::thread::sleep(Duration::from_secs(2));
        }
    }

    fn delete(&self, native_id: &str, _force: bool) -> Result<(), CoreError> {
        let url = self.scope_url(&format!("virtualMachines/{native_id}"));
        let response = self.request(self.client.delete(&url))?;
        let status = response.status();
        if status.is_success() || status.as_u16() == 404 {
            return Ok(());
        }
        let text = response.text().unwrap_or_default();
        Err(self.map_status(status, &text))
    }

    fn list_resources(&self, kind_filter: Option<&str>) -> Result<Vec<Resource>, CoreError> {
        let url = self.scope_url("virtualMachines");
        let response = self.request(self.client.get(&url))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(self.map_status(status, &text));
        }
        let parsed: Vec<ListedVm> = response
            .json()
            .map_err(|e| CoreError::Internal(format!("malformed response: {e}")))?;
        Ok(parsed
            .into_iter()
            .filter(|vm| kind_filter.map(|k| k == vm.kind).unwrap_or(true))
            .map(|vm| {
                Resource::new(
                    ResourceIdentity::new("cloud_b", &self.config.instance_id, &vm.vm_id),
                    ResourceKind::Vm,
                    vm.name,
                )
                .with_state(if vm.power_state == "running" { ResourceState::Running } else { ResourceState::Stopped })
            })
            .collect())
    }

    fn attach_network(&self, native_id: &str, lease: &NetworkLease) -> Result<(), CoreError> {
        let url = self.scope_url(&format!("virtualMachines/{native_id}/networkInterfaces"));
        let response = self.request(self.client.post(&url).json(&serde_json::json!({ "cidr": lease.cidr })))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(self.map_status(status, &text));
        }
        Ok(())
    }

    fn exec_command(&self, native_id: &str, _credential: &Credential, command: &str) -> Result<ExecResult, CoreError> {
        let url = self.scope_url(&format!("virtualMachines/{native_id}/runCommand"));
        let response = self.request(self.client.post(&url).json(&serde_json::json!({ "command": command })))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(self.map_status(status, &text));
        }
        response
            .json()
            .map_err(|e| CoreError::Internal(format!("malformed response: {e}")))
    }
}
