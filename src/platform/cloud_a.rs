//! Cloud IaaS A adapter (§6): a region-scoped REST client authenticated by
//! either a named credential profile or an explicit access-key/secret-key
//! pair.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::network::NetworkLease;
use crate::platform::adapter::{CloneSpec, Credential, ExecResult, PlatformAdapter, PowerOp};
use crate::resource::{Resource, ResourceIdentity, ResourceKind, ResourceState};

#[derive(Debug, Clone)]
pub enum CloudACredentials {
    Profile(String),
    AccessKey { access_key: String, secret_key: String },
}

#[derive(Debug, Clone)]
pub struct CloudAConfig {
    pub instance_id: String,
    pub region: String,
    pub credentials: CloudACredentials,
    pub default_subnet: String,
    pub default_security_group: String,
    pub api_base_url: String,
}

pub struct CloudAAdapter {
    config: CloudAConfig,
    client: reqwest::blocking::Client,
}

impl CloudAAdapter {
    pub fn new(config: CloudAConfig) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client config should be valid");
        Self { config, client }
    }

    fn authorize(&self, builder: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match &self.config.credentials {
            CloudACredentials::Profile(profile) => builder.header("X-Credential-Profile", profile),
            CloudACredentials::AccessKey { access_key, secret_key } => {
                builder.basic_auth(access_key, Some(secret_key))
            }
        }
    }

    fn map_status(&self, status: reqwest::StatusCode, body: &str) -> CoreError {
        match status.as_u16() {
            401 | 403 => CoreError::AuthFailed(body.to_string()),
            404 => CoreError::ResourceMissing(ResourceIdentity::new("cloud_a", &self.config.instance_id, "")),
            409 => CoreError::NameCollision(body.to_string()),
            429 | 503 => CoreError::QuotaExceeded(body.to_string()),
            _ => CoreError::BackendUnreachable(format!("{status}: {body}")),
        }
    }
}

#[derive(Serialize)]
struct CreateInstanceRequest<'a> {
    template: &'a str,
    name: &'a str,
    cpu: u32,
    memory_mb: u64,
    disks_gb: &'a [u64],
    subnet: &'a str,
    security_group: &'a str,
    request_id: &'a str,
}

#[derive(Deserialize)]
struct CreateInstanceResponse {
    instance_id: String,
}

#[derive(Deserialize)]
struct InstanceStatusResponse {
    state: String,
    public_ip: Option<String>,
}

#[derive(Deserialize)]
struct ListedInstance {
    instance_id: String,
    name: String,
    state: String,
    kind: String,
}

impl PlatformAdapter for CloudAAdapter {
    fn backend_kind(&self) -> &str {
        "cloud_a"
    }

    fn backend_instance_id(&self) -> &str {
        &self.config.instance_id
    }

    fn clone_from_template(&self, spec: &CloneSpec) -> Result<String, CoreError> {
        let url = format!("{}/{}/instances", self.config.api_base_url, self.config.region);
        let body = CreateInstanceRequest {
            template: &spec.template_ref,
            name: &spec.name,
            cpu: spec.cpu,
            memory_mb: spec.memory_mb,
            disks_gb: &spec.disks_gb,
            subnet: &self.config.default_subnet,
            security_group: &self.config.default_security_group,
            request_id: &spec.request_id,
        };
        let response = self
            .authorize(self.client.post(&url).json(&body))
            .send()
            .map_err(|e| CoreError::BackendUnreachable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(self.map_status(status, &text));
        }
        let parsed: CreateInstanceResponse = response
            .json()
            .map_err(|e| CoreError::Internal(format!("malformed response: {e}")))?;
        Ok(parsed.instance_id)
    }

    fn set_power(&self, native_id: &str, op: PowerOp) -> Result<(), CoreError> {
        let verb = match op {
            PowerOp::On => "start",
            PowerOp::Off => "stop",
            PowerOp::Reset => "reboot",
        };
        let url = format!(
            "{}/{}/instances/{native_id}/{verb}",
            self.config.api_base_url, self.config.region
        );
        let response = self
            .authorize(self.client.post(&url))
            .send()
            .map_err(|e| CoreError::BackendUnreachable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(self.map_status(status, &text));
        }
        Ok(())
    }

    fn wait_for_liveness(&self, native_id: &str, deadline: Duration) -> Result<String, CoreError> {
        let deadline_at = std::time::Instant::now() + deadline;
        let url = format!(
            "{}/{}/instances/{native_id}",
            self.config.api_base_url, self.config.region
        );
        loop {
            let response = self
                .authorize(self.client.get(&url))
                .send()
                .map_err(|e| CoreError::BackendUnreachable(e.to_string()))?;
            let status = response.status();
            if status.is_success() {
                let parsed: InstanceStatusResponse = response
                    .json()
                    .map_err(|e| CoreError::Internal(format!("malformed response: {e}")))?;
                if parsed.state == "running" {
                    if let Some(ip) = parsed.public_ip {
                        return Ok(ip);
                    }
                }
            }
            if std::time::Instant::now() >= deadline_at {
                return Err(CoreError::Timeout(format!("{native_id} not live before deadline")));
            }
            std::thread::sleep(Duration::from_secs(2));
        }
    }

    fn delete(&self, native_id: &str, _force: bool) -> Result<(), CoreError> {
        let url = format!(
            "{}/{}/instances/{native_id}",
            self.config.api_base_url, self.config.region
        );
        let response = self
            .authorize(self.client.delete(&url))
            .send()
            .map_err(|e| CoreError::BackendUnreachable(e.to_string()))?;
        let status = response.status();
        if status.is_success() || status.as_u16() == 404 {
            return Ok(());
        }
        let text = response.text().unwrap_or_default();
        Err(self.map_status(status, &text))
    }

    fn list_resources(&self, kind_filter: Option<&str>) -> Result<Vec<Resource>, CoreError> {
        let url = format!("{}/{}/instances", self.config.api_base_url, self.config.region);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .map_err(|e| CoreError::BackendUnreachable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(self.map_status(status, &text));
        }
        let parsed: Vec<ListedInstance> = response
            .json()
            .map_err(|e| CoreError::Internal(format!("malformed response: {e}")))?;
        Ok(parsed
            .into_iter()
            .filter(|i| kind_filter.map(|k| k == i.kind).unwrap_or(true))
            .map(|i| {
                Resource::new(
                    ResourceIdentity::new("cloud_a", &self.config.instance_id, &i.instance_id),
                    ResourceKind::Vm,
                    i.name,
                )
                .with_state(if i.state == "running" { ResourceState::Running } else { ResourceState::Stopped })
            })
            .collect())
    }

    fn attach_network(&self, native_id: &str, lease: &NetworkLease) -> Result<(), CoreError> {
        let url = format!(
            "{}/{}/instances/{native_id}/interfaces",
            self.config.api_base_url, self.config.region
        );
        let response = self
            .authorize(self.client.post(&url).json(&serde_json::json!({ "cidr": lease.cidr })))
            .send()
            .map_err(|e| CoreError::BackendUnreachable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(self.map_status(status, &text));
        }
        Ok(())
    }

    fn exec_command(&self, native_id: &str, _credential: &Credential, command: &str) -> Result<ExecResult, CoreError> {
        let url = format!(
            "{}/{}/instances/{native_id}/run-command",
            self.config.api_base_url, self.config.region
        );
        let response = self
            .authorize(self.client.post(&url).json(&serde_json::json!({ "command": command })))
            .send()
            .map_err(|e| CoreError::BackendUnreachable(e.to_string()))?;
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
