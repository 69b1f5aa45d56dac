//! Deployment configuration.
//!
//! Layers, lowest precedence first: built-in defaults, the TOML file
//! (`Erc8004.toml`), `ERC8004_*` environment variables (nested keys split on
//! `__`, e.g. `ERC8004_NETWORK__RPC_URL`), then command line overrides.
//!
//! The signing key is deliberately not part of the configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::{
    Figment, Metadata, Profile, Provider,
    providers::{Env, Format, Serialized, Toml},
    value::{Dict, Map, Value},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    deployer::ConfirmationPolicy,
    error::PlanError,
    orchestrator::DEFAULT_PROXY_ARTIFACT,
    plan::{ContractSpec, DeploymentPlan},
};

/// Default configuration file name.
pub const CONFIG_FILENAME: &str = "Erc8004.toml";

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "ERC8004_";

/// Environment variables sharing the prefix that are not configuration keys.
const NON_CONFIG_ENV: &[&str] = &["config", "private_key", "verbosity"];

/// Known target networks.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Network {
    #[default]
    TaikoHoodi,
    TaikoMainnet,
    Sepolia,
    Custom,
}

impl Network {
    pub fn chain_id(&self) -> Option<u64> {
        match self {
            Network::TaikoHoodi => Some(167013),
            Network::TaikoMainnet => Some(167000),
            Network::Sepolia => Some(11155111),
            Network::Custom => None,
        }
    }

    /// Public RPC endpoint, for networks that have a well-known one.
    pub fn default_rpc_url(&self) -> Option<&'static str> {
        match self {
            Network::TaikoHoodi => Some("https://rpc.hoodi.taiko.xyz"),
            Network::TaikoMainnet => Some("https://rpc.mainnet.taiko.xyz"),
            Network::Sepolia | Network::Custom => None,
        }
    }
}

/// Target chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub name: Network,
    /// Overrides the network's public endpoint. Required for `sepolia` and
    /// `custom`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<Url>,
    /// Overrides the network's chain id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
}

impl NetworkConfig {
    /// The endpoint to connect to.
    pub fn rpc_url(&self) -> Result<Url> {
        if let Some(url) = &self.rpc_url {
            return Ok(url.clone());
        }

        match self.name.default_rpc_url() {
            Some(url) => Url::parse(url).context(format!("Invalid RPC URL for {}", self.name)),
            None => anyhow::bail!(
                "Network {} has no public RPC endpoint, set network.rpc_url or {}NETWORK__RPC_URL",
                self.name,
                ENV_PREFIX
            ),
        }
    }

    /// The chain id the endpoint must report, if known.
    pub fn expected_chain_id(&self) -> Option<u64> {
        self.chain_id.or_else(|| self.name.chain_id())
    }
}

/// Full deployment configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Directory holding the compiled contract artifacts.
    pub artifacts_dir: PathBuf,
    /// Artifact of the proxy deployed in front of each implementation.
    pub proxy_artifact: String,
    /// Where to save the deployment file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    pub network: NetworkConfig,
    pub confirmation: ConfirmationPolicy,
    /// Contracts to deploy.
    pub contracts: Vec<ContractSpec>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from("artifacts"),
            proxy_artifact: DEFAULT_PROXY_ARTIFACT.to_string(),
            output: None,
            network: NetworkConfig::default(),
            confirmation: ConfirmationPolicy::default(),
            contracts: DeploymentPlan::erc8004().specs().to_vec(),
        }
    }
}

impl DeployConfig {
    /// Defaults, then `path` if it exists, then the environment.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(DeployConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).ignore(NON_CONFIG_ENV).split("__"))
    }

    /// Load the layered configuration, with `overrides` on top.
    pub fn load(path: &Path, overrides: impl Provider) -> Result<Self> {
        let config: Self = Self::figment(path)
            .merge(overrides)
            .extract()
            .context("Failed to load configuration")?;
        tracing::debug!(
            path = %path.display(),
            network = %config.network.name,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// The validated deployment plan.
    pub fn plan(&self) -> Result<DeploymentPlan, PlanError> {
        DeploymentPlan::new(self.contracts.clone())
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Load a configuration from a TOML file only, without other layers.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Configuration file not found: {}", path.display());
        }

        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config from {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse config file as TOML")
    }
}

/// Command line values that take precedence over every other layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub network: Option<Network>,
    pub rpc_url: Option<Url>,
    pub chain_id: Option<u64>,
    pub artifacts_dir: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

impl Provider for ConfigOverrides {
    fn metadata(&self) -> Metadata {
        Metadata::named("command line arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        let mut network = Dict::new();
        if let Some(name) = self.network {
            network.insert("name".to_string(), name.to_string().into());
        }
        if let Some(url) = &self.rpc_url {
            network.insert("rpc_url".to_string(), url.to_string().into());
        }
        if let Some(chain_id) = self.chain_id {
            network.insert("chain_id".to_string(), chain_id.into());
        }

        let mut dict = Dict::new();
        if !network.is_empty() {
            dict.insert("network".to_string(), Value::from(network));
        }
        if let Some(dir) = &self.artifacts_dir {
            dict.insert(
                "artifacts_dir".to_string(),
                dir.to_string_lossy().into_owned().into(),
            );
        }
        if let Some(output) = &self.output {
            dict.insert(
                "output".to_string(),
                output.to_string_lossy().into_owned().into(),
            );
        }

        Ok(Map::from([(Profile::Default, dict)]))
    }
}
