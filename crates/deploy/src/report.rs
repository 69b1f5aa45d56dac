//! Deployment reporting and the persisted deployment file.

use std::{collections::BTreeMap, path::Path};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use serde::{Deserialize, Serialize};

use crate::{orchestrator::DeploymentResult, plan::DeploymentPlan, verify::VerificationReport};

/// The `{proxies, implementations}` summary printed on success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSummary {
    pub proxies: BTreeMap<String, Address>,
    pub implementations: BTreeMap<String, Address>,
}

impl From<&DeploymentResult> for DeploymentSummary {
    fn from(result: &DeploymentResult) -> Self {
        Self {
            proxies: result.proxies.clone(),
            implementations: result.implementations.clone(),
        }
    }
}

impl From<DeploymentSummary> for DeploymentResult {
    fn from(summary: DeploymentSummary) -> Self {
        Self {
            implementations: summary.implementations,
            proxies: summary.proxies,
        }
    }
}

impl DeploymentSummary {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize deployment summary")
    }
}

/// Everything needed to find a deployment again.
///
/// Written after every run, including aborted ones, so the addresses of
/// contracts that are already on-chain are never lost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentFile {
    #[serde(flatten)]
    pub summary: DeploymentSummary,
    pub network: String,
    pub chain_id: u64,
    pub deployer: Address,
    /// False when the run aborted before every contract was deployed.
    pub complete: bool,
    pub deployed_at: DateTime<Utc>,
    /// erc8004 version that wrote this file.
    pub tool_version: String,
}

impl DeploymentFile {
    pub fn new(
        result: &DeploymentResult,
        network: impl Into<String>,
        chain_id: u64,
        deployer: Address,
        complete: bool,
    ) -> Self {
        Self {
            summary: result.into(),
            network: network.into(),
            chain_id,
            deployer,
            complete,
            deployed_at: Utc::now(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Save as formatted JSON.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize deployment file")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create directory {}", parent.display()))?;
        }

        std::fs::write(path, json)
            .context(format!("Failed to write deployment to {}", path.display()))?;

        Ok(())
    }

    /// Load a previously saved deployment.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Deployment file does not exist: {}", path.display());
        }

        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read deployment from {}", path.display()))?;

        serde_json::from_str(&content).context("Failed to parse deployment file JSON")
    }

    pub fn result(&self) -> DeploymentResult {
        self.summary.clone().into()
    }
}

/// One row per contract in the plan, in execution order.
pub fn render_table(
    plan: &DeploymentPlan,
    result: &DeploymentResult,
    verification: Option<&VerificationReport>,
) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Contract", "Implementation", "Proxy", "Version", "Status"]);

    for spec in plan.execution_order() {
        let implementation = result.implementation(&spec.name);
        let proxy = result.proxy(&spec.name);

        let version = verification
            .and_then(|report| report.versions.get(&spec.name))
            .cloned()
            .unwrap_or_else(|| "-".to_string());

        let status = match (implementation, proxy, verification) {
            (Some(_), Some(_), Some(report)) => match report.issues_for(&spec.name).count() {
                0 => "verified".to_string(),
                n => format!("{n} issue(s)"),
            },
            (Some(_), Some(_), None) => "deployed".to_string(),
            (Some(_), None, _) => "implementation only".to_string(),
            (None, _, _) => "not deployed".to_string(),
        };

        let address = |a: Option<Address>| a.map_or_else(|| "-".to_string(), |a| a.to_string());
        table.add_row(vec![
            spec.name.clone(),
            address(implementation),
            address(proxy),
            version,
            status,
        ]);
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn sample_result() -> DeploymentResult {
        let mut result = DeploymentResult::default();
        for (i, name) in ["identity", "reputation", "validation"].into_iter().enumerate() {
            result
                .implementations
                .insert(name.to_string(), Address::with_last_byte(i as u8 + 1));
            result
                .proxies
                .insert(name.to_string(), Address::with_last_byte(i as u8 + 0x10));
        }
        result
    }

    #[test]
    fn test_summary_json_shape() {
        let summary = DeploymentSummary::from(&sample_result());
        let json: serde_json::Value =
            serde_json::from_str(&summary.to_json().expect("serializes")).expect("valid json");

        assert_eq!(
            json["proxies"]["identity"],
            Address::with_last_byte(0x10).to_string()
        );
        assert_eq!(json["implementations"].as_object().map(|o| o.len()), Some(3));
    }

    #[test]
    fn test_deployment_file_save_and_load() {
        let temp_dir = TempDir::new("erc8004-test").expect("Failed to create temp dir");
        let path = temp_dir.path().join("deployments").join("taiko-hoodi.json");

        let original = DeploymentFile::new(
            &sample_result(),
            "taiko-hoodi",
            167013,
            Address::with_last_byte(0xde),
            true,
        );
        original.save_to_file(&path).expect("Failed to save deployment");

        let loaded = DeploymentFile::load_from_file(&path).expect("Failed to load deployment");
        assert_eq!(original, loaded, "Loaded deployment should match original");
        assert_eq!(loaded.result(), sample_result());
    }

    #[test]
    fn test_deployment_file_load_missing() {
        let temp_dir = TempDir::new("erc8004-test").expect("Failed to create temp dir");
        let result = DeploymentFile::load_from_file(&temp_dir.path().join("missing.json"));
        assert!(result.is_err(), "Loading missing file should return error");
    }

    #[test]
    fn test_deployment_file_load_corrupted() {
        let temp_dir = TempDir::new("erc8004-test").expect("Failed to create temp dir");
        let path = temp_dir.path().join("deployment.json");
        std::fs::write(&path, "{ invalid json }").expect("Failed to write corrupted file");

        assert!(DeploymentFile::load_from_file(&path).is_err());
    }

    #[test]
    fn test_render_table_partial_result() {
        let mut result = DeploymentResult::default();
        result
            .implementations
            .insert("identity".to_string(), Address::with_last_byte(1));

        let rendered = render_table(&DeploymentPlan::erc8004(), &result, None).to_string();
        assert!(rendered.contains("implementation only"));
        assert!(rendered.contains("not deployed"));
    }

    #[test]
    fn test_render_table_with_verification() {
        let mut report = VerificationReport::default();
        report.versions.insert("identity".to_string(), "1.0.0".to_string());

        let rendered =
            render_table(&DeploymentPlan::erc8004(), &sample_result(), Some(&report)).to_string();
        assert!(rendered.contains("verified"));
        assert!(rendered.contains("1.0.0"));
    }
}
