//! Layered YAML configuration (§10.3): one file per process, loaded once at
//! startup, with environment variables able to override secret-adjacent
//! fields rather than the secret oracle being reimplemented per field.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::network::AllocatorConfig;
use crate::platform::adapter::PlatformAdapter;
use crate::platform::cloud_a::{CloudAAdapter, CloudACredentials, CloudAConfig};
use crate::platform::cloud_b::{CloudBAdapter, CloudBConfig};
use crate::platform::onprem::{OnPremAdapter, OnPremConfig};

fn default_grace_multiplier() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(deserialize_with = "crate::utils::deserialize_duration")]
    pub vm_period: Duration,
    #[serde(deserialize_with = "crate::utils::deserialize_duration")]
    pub inventory_period: Duration,
    #[serde(deserialize_with = "crate::utils::deserialize_duration")]
    pub discovery_period: Duration,
    /// Grace window, expressed as a multiple of a tier's period, before an
    /// absent resource is marked `unknown` (§4.4, §9's open question on this
    /// being configurable rather than fixed across all backends).
    #[serde(default = "default_grace_multiplier")]
    pub grace_multiplier: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            vm_period: Duration::from_secs(10),
            inventory_period: Duration::from_secs(60),
            discovery_period: Duration::from_secs(15),
            grace_multiplier: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub max_concurrent_clones: usize,
    #[serde(deserialize_with = "crate::utils::deserialize_duration")]
    pub deploy_deadline: Duration,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self { max_concurrent_clones: 6, deploy_deadline: Duration::from_secs(1800) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionConfig {
    #[serde(deserialize_with = "crate::utils::deserialize_duration")]
    pub exploit_step_deadline: Duration,
    #[serde(deserialize_with = "crate::utils::deserialize_duration")]
    pub probe_deadline: Duration,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self { exploit_step_deadline: Duration::from_secs(600), probe_deadline: Duration::from_secs(30) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum PlatformAdapterConfig {
    Onprem {
        instance_id: String,
        host: String,
        user: String,
        #[serde(default)]
        password: String,
        #[serde(default)]
        verify_tls: bool,
        #[serde(default)]
        template_id_map: std::collections::HashMap<String, String>,
        storage_pool: String,
        node_name: String,
    },
    CloudA {
        instance_id: String,
        region: String,
        credential_profile: Option<String>,
        access_key: Option<String>,
        secret_key: Option<String>,
        default_subnet: String,
        default_security_group: String,
        api_base_url: String,
    },
    CloudB {
        instance_id: String,
        tenant_id: String,
        subscription_id: String,
        client_id: String,
        #[serde(default)]
        client_secret: String,
        default_resource_group: String,
        default_vnet: String,
        api_base_url: String,
        token_url: String,
    },
}

impl PlatformAdapterConfig {
    pub fn backend_kind(&self) -> &'static str {
        match self {
            PlatformAdapterConfig::Onprem { .. } => "onprem",
            PlatformAdapterConfig::CloudA { .. } => "cloud_a",
            PlatformAdapterConfig::CloudB { .. } => "cloud_b",
        }
    }

    pub fn instance_id(&self) -> &str {
        match self {
            PlatformAdapterConfig::Onprem { instance_id, .. }
            | PlatformAdapterConfig::CloudA { instance_id, .. }
            | PlatformAdapterConfig::CloudB { instance_id, .. } => instance_id,
        }
    }

    /// Builds the concrete adapter plus the `(backend_kind, backend_instance_id)`
    /// key it should be dispatched under, per §6's recognized option sets.
    pub fn build(&self) -> (String, String, Arc<dyn PlatformAdapter>) {
        match self {
            PlatformAdapterConfig::Onprem { instance_id, host, user, password, verify_tls, storage_pool, node_name, .. } => {
                let adapter = OnPremAdapter::new(OnPremConfig {
                    instance_id: instance_id.clone(),
                    host: host.clone(),
                    user: user.clone(),
                    password: password.clone(),
                    verify_tls: *verify_tls,
                    storage_pool: storage_pool.clone(),
                    node_name: node_name.clone(),
                });
                ("onprem".to_string(), instance_id.clone(), Arc::new(adapter))
            }
            PlatformAdapterConfig::CloudA {
                instance_id,
                region,
                credential_profile,
                access_key,
                secret_key,
                default_subnet,
                default_security_group,
                api_base_url,
            } => {
                let credentials = match (credential_profile, access_key, secret_key) {
                    (Some(profile), _, _) => CloudACredentials::Profile(profile.clone()),
                    (None, Some(access_key), Some(secret_key)) => {
                        CloudACredentials::AccessKey { access_key: access_key.clone(), secret_key: secret_key.clone() }
                    }
                    _ => CloudACredentials::Profile("default".to_string()),
                };
                let adapter = CloudAAdapter::new(CloudAConfig {
                    instance_id: instance_id.clone(),
                    region: region.clone(),
                    credentials,
                    default_subnet: default_subnet.clone(),
                    default_security_group: default_security_group.clone(),
                    api_base_url: api_base_url.clone(),
                });
                ("cloud_a".to_string(), instance_id.clone(), Arc::new(adapter))
            }
            PlatformAdapterConfig::CloudB {
                instance_id,
                tenant_id,
                subscription_id,
                client_id,
                client_secret,
                default_resource_group,
                default_vnet,
                api_base_url,
                token_url,
            } => {
                let adapter = CloudBAdapter::new(CloudBConfig {
                    instance_id: instance_id.clone(),
                    tenant_id: tenant_id.clone(),
                    subscription_id: subscription_id.clone(),
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                    default_resource_group: default_resource_group.clone(),
                    default_vnet: default_vnet.clone(),
                    api_base_url: api_base_url.clone(),
                    token_url: token_url.clone(),
                });
                ("cloud_b".to_string(), instance_id.clone(), Arc::new(adapter))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub allocator: AllocatorConfigFile,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub deployment: DeploymentConfig,
    #[serde(default)]
    pub mission: MissionConfig,
    #[serde(default)]
    pub adapters: Vec<PlatformAdapterConfig>,
}

/// Mirrors [`AllocatorConfig`] but with a plain `Duration` field the way
/// config structs are written in this crate (serde-friendly), converted once
/// at startup rather than threading `duration-str` deserialization through
/// the allocator's own hot-path type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorConfigFile {
    pub vlan_low: u16,
    pub vlan_high: u16,
    pub cidr_template: String,
    pub gateway_suffix: String,
    #[serde(deserialize_with = "crate::utils::deserialize_duration")]
    pub release_cooldown: Duration,
}

impl Default for AllocatorConfigFile {
    fn default() -> Self {
        let defaults = AllocatorConfig::default();
        Self {
            vlan_low: defaults.vlan_low,
            vlan_high: defaults.vlan_high,
            cidr_template: defaults.cidr_template,
            gateway_suffix: defaults.gateway_suffix,
            release_cooldown: defaults.release_cooldown,
        }
    }
}

impl From<AllocatorConfigFile> for AllocatorConfig {
    fn from(file: AllocatorConfigFile) -> Self {
        AllocatorConfig {
            vlan_low: file.vlan_low,
            vlan_high: file.vlan_high,
            cidr_template: file.cidr_template,
            gateway_suffix: file.gateway_suffix,
            release_cooldown: file.release_cooldown,
        }
    }
}

impl From<DeploymentConfig> for crate::deploy::DeploymentConfig {
    fn from(file: DeploymentConfig) -> Self {
        crate::deploy::DeploymentConfig {
            max_concurrent_clones: file.max_concurrent_clones,
            deploy_deadline: file.deploy_deadline,
        }
    }
}

impl From<MissionConfig> for crate::mission::MissionConfig {
    fn from(file: MissionConfig) -> Self {
        crate::mission::MissionConfig {
            exploit_step_deadline: file.exploit_step_deadline,
            probe_deadline: file.probe_deadline,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CoreError::ConfigInvalid(format!("reading {}: {e}", path.display())))?;
        let mut config: AppConfig = serde_yaml::from_str(&contents)
            .map_err(|e| CoreError::ConfigInvalid(format!("parsing {}: {e}", path.display())))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Lets secret-adjacent adapter fields (passwords, client secrets) come
    /// from the environment instead of the YAML file on disk, per §10.3.
    fn apply_env_overrides(&mut self) {
        for adapter in &mut self.adapters {
            match adapter {
                PlatformAdapterConfig::Onprem { instance_id, password, .. } => {
                    if let Ok(value) = std::env::var(format!("RANGECTL_ONPREM_{instance_id}_PASSWORD")) {
                        *password = value;
                    }
                }
                PlatformAdapterConfig::CloudA { instance_id, secret_key, .. } => {
                    if let Ok(value) = std::env::var(format!("RANGECTL_CLOUD_A_{instance_id}_SECRET_KEY")) {
                        *secret_key = Some(value);
                    }
                }
                PlatformAdapterConfig::CloudB { instance_id, client_secret, .. } => {
                    if let Ok(value) = std::env::var(format!("RANGECTL_CLOUD_B_{instance_id}_CLIENT_SECRET")) {
                        *client_secret = value;
                    }
                }
            }
        }
    }
}
