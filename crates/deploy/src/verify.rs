//! Post-deployment invariant checks.
//!
//! Verification only reads from the chain. Every issue is collected into the
//! report; nothing here aborts, since the contracts are live regardless.

use std::{collections::BTreeMap, fmt};

use alloy_core::primitives::Address;

use crate::{
    artifacts::ArtifactProvider,
    binder::{BoundContract, bind},
    calldata::build_init_calldata,
    chain::ChainClient,
    error::{ArtifactError, ChainError, VerificationError},
    orchestrator::DeploymentResult,
    plan::{ContractSpec, DeploymentPlan},
};

/// Outcome of verifying a deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    /// Version read from each proxy.
    pub versions: BTreeMap<String, String>,
    /// Back-reference read from each dependent proxy.
    pub back_references: BTreeMap<String, Address>,
    pub issues: Vec<VerificationError>,
}

impl VerificationReport {
    /// True when no invariant failed.
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Issues found on `contract`.
    pub fn issues_for<'a>(
        &'a self,
        contract: &'a str,
    ) -> impl Iterator<Item = &'a VerificationError> + 'a {
        self.issues
            .iter()
            .filter(move |issue| issue.contract() == contract)
    }

    fn record(&mut self, issue: VerificationError) {
        tracing::warn!(contract = %issue.contract(), issue = %issue, "Verification issue");
        self.issues.push(issue);
    }
}

/// Bind the implementation ABI of every plan node to its recorded proxy.
pub fn bind_proxies<A: ArtifactProvider>(
    plan: &DeploymentPlan,
    artifacts: &A,
    result: &DeploymentResult,
) -> Result<Vec<BoundContract>, ArtifactError> {
    let mut bound = Vec::with_capacity(plan.len());
    for spec in plan.execution_order() {
        if let Some(proxy) = result.proxy(&spec.name) {
            let artifact = artifacts.artifact(&spec.artifact)?;
            bound.push(bind(spec.name.clone(), artifact.abi, proxy));
        }
    }
    Ok(bound)
}

/// Check the invariants of a deployment.
///
/// For every node:
/// - the version accessor is read twice through the proxy and once from the
///   implementation; all three must agree,
/// - the back-reference accessor, if declared, must return the dependency's
///   proxy address,
/// - simulating the initializer again must revert.
pub async fn verify_deployment<C: ChainClient>(
    client: &C,
    plan: &DeploymentPlan,
    contracts: &[BoundContract],
    result: &DeploymentResult,
) -> VerificationReport {
    let mut report = VerificationReport::default();

    for spec in plan.execution_order() {
        let Some(contract) = contracts.iter().find(|c| c.name() == spec.name) else {
            report.record(VerificationError::ReadCallFailure {
                contract: spec.name.clone(),
                accessor: spec.version_accessor.clone(),
                reason: "contract has no recorded proxy".to_string(),
            });
            continue;
        };

        check_version(client, spec, contract, result, &mut report).await;
        check_back_reference(client, spec, contract, result, &mut report).await;
        check_reinitialization(client, spec, contract, result, &mut report).await;
    }

    if report.is_clean() {
        tracing::info!(contracts = contracts.len(), "Deployment verified");
    } else {
        tracing::warn!(issues = report.issues.len(), "Deployment verified with issues");
    }
    report
}

async fn check_version<C: ChainClient>(
    client: &C,
    spec: &ContractSpec,
    contract: &BoundContract,
    result: &DeploymentResult,
    report: &mut VerificationReport,
) {
    let accessor = spec.version_accessor.as_str();
    let mismatch = |expected: &str, actual: &str| VerificationError::VerificationMismatch {
        contract: spec.name.clone(),
        accessor: accessor.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    };

    let first = match contract.read_version(client, accessor).await {
        Ok(version) => version,
        Err(issue) => return report.record(issue),
    };

    match contract.read_version(client, accessor).await {
        Ok(second) if second != first => report.record(mismatch(&first, &second)),
        Ok(_) => {}
        Err(issue) => report.record(issue),
    }

    if let Some(implementation) = result.implementation(&spec.name) {
        let direct = bind(spec.name.clone(), contract.abi().clone(), implementation);
        match direct.read_version(client, accessor).await {
            Ok(declared) if declared != first => report.record(mismatch(&declared, &first)),
            Ok(_) => {}
            Err(issue) => report.record(issue),
        }
    }

    tracing::debug!(contract = %spec.name, version = %first, "Read version");
    report.versions.insert(spec.name.clone(), first);
}

async fn check_back_reference<C: ChainClient>(
    client: &C,
    spec: &ContractSpec,
    contract: &BoundContract,
    result: &DeploymentResult,
    report: &mut VerificationReport,
) {
    // The plan guarantees a single dependency wherever an accessor is checked.
    let (Some(accessor), Some(dependency)) =
        (spec.checked_back_reference(), spec.sole_dependency())
    else {
        if !spec.depends_on.is_empty() {
            tracing::debug!(contract = %spec.name, "No back reference to check");
        }
        return;
    };

    let Some(expected) = result.proxy(dependency) else {
        return report.record(VerificationError::ReadCallFailure {
            contract: spec.name.clone(),
            accessor: accessor.to_string(),
            reason: format!("dependency {dependency} has no recorded proxy"),
        });
    };

    match contract.read_address(client, accessor).await {
        Ok(actual) => {
            report.back_references.insert(spec.name.clone(), actual);
            if actual != expected {
                report.record(VerificationError::VerificationMismatch {
                    contract: spec.name.clone(),
                    accessor: accessor.to_string(),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }
        Err(issue) => report.record(issue),
    }
}

/// A second initializer call must revert on an initialized proxy.
async fn check_reinitialization<C: ChainClient>(
    client: &C,
    spec: &ContractSpec,
    contract: &BoundContract,
    result: &DeploymentResult,
    report: &mut VerificationReport,
) {
    let accessor = spec.init.signature();
    let failure = |reason: String| VerificationError::ReadCallFailure {
        contract: spec.name.clone(),
        accessor: accessor.to_string(),
        reason,
    };

    let calldata = match result
        .init_arguments(spec)
        .map_err(|e| e.to_string())
        .and_then(|args| build_init_calldata(spec.init, &args).map_err(|e| e.to_string()))
    {
        Ok(calldata) => calldata,
        Err(reason) => return report.record(failure(reason)),
    };

    match client.call(contract.address(), calldata).await {
        Err(ChainError::Reverted(reason)) => {
            tracing::debug!(contract = %spec.name, reason = %reason, "Re-initialization rejected");
        }
        Ok(_) => report.record(VerificationError::ReinitializationPossible {
            contract: spec.name.clone(),
            proxy: contract.address(),
        }),
        Err(e) => report.record(failure(e.to_string())),
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.is_clean() { "VERIFIED" } else { "ISSUES FOUND" };
        writeln!(f, "Verification: {}", status)?;

        for (name, version) in &self.versions {
            write!(f, "  [ok] {} version={}", name, version)?;
            if let Some(back_reference) = self.back_references.get(name) {
                write!(f, " identity={}", back_reference)?;
            }
            writeln!(f)?;
        }

        for issue in &self.issues {
            writeln!(f, "  [!!] {}", issue)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        artifacts::InMemoryArtifacts,
        deployer::ConfirmationPolicy,
        orchestrator::{DeploymentOutcome, Orchestrator},
        plan::IDENTITY_BACK_REFERENCE_ACCESSOR,
        testing::{SimulatedChain, registry_fixture},
    };

    async fn deployed() -> (SimulatedChain, InMemoryArtifacts, DeploymentResult) {
        let (chain, artifacts) = registry_fixture();
        let policy = ConfirmationPolicy {
            timeout_secs: 1,
            poll_interval_ms: 1,
            retries: 0,
            retry_delay_ms: 0,
        };
        let outcome = Orchestrator::new(&chain, &artifacts, DeploymentPlan::erc8004())
            .with_policy(policy)
            .run()
            .await;
        let DeploymentOutcome::Completed { result, .. } = outcome else {
            panic!("fixture deployment should complete");
        };
        (chain, artifacts, result)
    }

    async fn reverify(
        chain: &SimulatedChain,
        artifacts: &InMemoryArtifacts,
        result: &DeploymentResult,
    ) -> VerificationReport {
        let plan = DeploymentPlan::erc8004();
        let bound = bind_proxies(&plan, artifacts, result).expect("artifacts present");
        verify_deployment(chain, &plan, &bound, result).await
    }

    #[tokio::test]
    async fn test_clean_deployment_verifies() {
        let (chain, artifacts, result) = deployed().await;
        let report = reverify(&chain, &artifacts, &result).await;

        assert!(report.is_clean(), "{report}");
        assert_eq!(report.versions.len(), 3);
        assert!(report.versions.values().all(|v| v == "1.0.0"));
        let identity = result.proxy("identity");
        assert_eq!(report.back_references.get("reputation").copied(), identity);
        assert_eq!(report.back_references.get("validation").copied(), identity);
        assert!(!report.back_references.contains_key("identity"));
    }

    #[tokio::test]
    async fn test_tampered_back_reference_is_mismatch() {
        let (chain, artifacts, result) = deployed().await;
        let validation = result.proxy("validation").expect("validation proxy");
        chain.set_back_reference(validation, Address::with_last_byte(0xbb));

        let report = reverify(&chain, &artifacts, &result).await;
        let issues: Vec<_> = report.issues_for("validation").collect();
        assert_eq!(issues.len(), 1, "{report}");
        assert!(matches!(
            issues[0],
            VerificationError::VerificationMismatch { accessor, .. }
                if accessor == "getIdentityRegistry"
        ));
        assert_eq!(report.issues_for("reputation").count(), 0);
    }

    #[tokio::test]
    async fn test_bound_node_checked_without_configured_accessor() {
        let (chain, artifacts, result) = deployed().await;
        let reputation = result.proxy("reputation").expect("reputation proxy");
        chain.set_back_reference(reputation, Address::with_last_byte(0xbb));

        let specs = DeploymentPlan::erc8004()
            .iter()
            .cloned()
            .map(|mut spec| {
                spec.back_reference_accessor = None;
                spec
            })
            .collect();
        let plan = DeploymentPlan::new(specs).expect("valid plan");
        let bound = bind_proxies(&plan, &artifacts, &result).expect("artifacts present");
        let report = verify_deployment(&chain, &plan, &bound, &result).await;

        assert_eq!(report.back_references.len(), 2, "{report}");
        let issues: Vec<_> = report.issues_for("reputation").collect();
        assert!(matches!(
            issues.as_slice(),
            [VerificationError::VerificationMismatch { accessor, .. }]
                if accessor == IDENTITY_BACK_REFERENCE_ACCESSOR
        ));
    }

    #[tokio::test]
    async fn test_uninitialized_proxy_is_flagged() {
        let (chain, artifacts, result) = deployed().await;
        let identity = result.proxy("identity").expect("identity proxy");
        chain.reset_initialized(identity);

        let report = reverify(&chain, &artifacts, &result).await;
        assert_eq!(
            report.issues,
            vec![VerificationError::ReinitializationPossible {
                contract: "identity".to_string(),
                proxy: identity,
            }]
        );
    }

    #[tokio::test]
    async fn test_missing_proxy_is_read_failure() {
        let (chain, artifacts, mut result) = deployed().await;
        let plan = DeploymentPlan::erc8004();
        let bound = bind_proxies(&plan, &artifacts, &result).expect("artifacts present");
        result.proxies.remove("reputation");
        let bound: Vec<_> = bound.into_iter().filter(|c| c.name() != "reputation").collect();

        let report = verify_deployment(&chain, &plan, &bound, &result).await;
        assert!(matches!(
            report.issues_for("reputation").next(),
            Some(VerificationError::ReadCallFailure { .. })
        ));
    }

    #[test]
    fn test_report_display() {
        let mut report = VerificationReport::default();
        report.versions.insert("identity".to_string(), "1.0.0".to_string());
        assert!(report.to_string().contains("VERIFIED"));

        report.issues.push(VerificationError::ReinitializationPossible {
            contract: "identity".to_string(),
            proxy: Address::with_last_byte(1),
        });
        let rendered = report.to_string();
        assert!(rendered.contains("ISSUES FOUND"));
        assert!(rendered.contains("[!!] identity proxy"));
    }
}
