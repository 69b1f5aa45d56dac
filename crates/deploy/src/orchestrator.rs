//! Deployment orchestrator.
//!
//! Walks the plan in topological order. For every contract it deploys the
//! implementation, builds the initializer calldata from the dependencies'
//! proxy addresses, deploys an ERC1967 proxy whose constructor runs that
//! initializer, and binds the implementation ABI to the proxy. Once every
//! node is live the deployment is verified.
//!
//! A deployment-phase failure stops the run immediately. Whatever was already
//! confirmed stays on-chain and is returned as a partial result.

use std::collections::BTreeMap;

use alloy_core::{dyn_abi::DynSolValue, primitives::Address};
use serde::{Deserialize, Serialize};

use crate::{
    artifacts::ArtifactProvider,
    binder::{BoundContract, bind},
    calldata::build_init_calldata,
    chain::ChainClient,
    deployer::{ConfirmationPolicy, ContractDeployer},
    error::{DeployError, PlanError},
    plan::{ContractSpec, DeploymentPlan},
    verify::{VerificationReport, verify_deployment},
};

/// Default name of the proxy artifact.
pub const DEFAULT_PROXY_ARTIFACT: &str = "ERC1967Proxy";

/// Addresses produced by a run, keyed by logical contract name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub implementations: BTreeMap<String, Address>,
    pub proxies: BTreeMap<String, Address>,
}

impl DeploymentResult {
    pub fn is_empty(&self) -> bool {
        self.implementations.is_empty() && self.proxies.is_empty()
    }

    pub fn implementation(&self, name: &str) -> Option<Address> {
        self.implementations.get(name).copied()
    }

    pub fn proxy(&self, name: &str) -> Option<Address> {
        self.proxies.get(name).copied()
    }

    /// Initializer arguments for `spec`: the proxy address of each dependency.
    ///
    /// Fails if a dependency has no recorded proxy yet.
    pub fn init_arguments(&self, spec: &ContractSpec) -> Result<Vec<Address>, PlanError> {
        if spec.init.arity() == 0 {
            return Ok(Vec::new());
        }

        spec.depends_on
            .iter()
            .map(|dependency| {
                self.proxy(dependency)
                    .ok_or_else(|| PlanError::UnknownDependency {
                        contract: spec.name.clone(),
                        dependency: dependency.clone(),
                    })
            })
            .collect()
    }
}

/// Terminal state of a run.
#[derive(Debug)]
pub enum DeploymentOutcome {
    /// Every contract is deployed; verification results are attached.
    Completed {
        result: DeploymentResult,
        verification: VerificationReport,
    },
    /// A deployment step failed. `partial` holds what is already on-chain.
    Aborted {
        partial: DeploymentResult,
        error: DeployError,
    },
}

impl DeploymentOutcome {
    /// Addresses recorded by the run, complete or not.
    pub fn result(&self) -> &DeploymentResult {
        match self {
            DeploymentOutcome::Completed { result, .. } => result,
            DeploymentOutcome::Aborted { partial, .. } => partial,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, DeploymentOutcome::Completed { .. })
    }

    pub fn verification(&self) -> Option<&VerificationReport> {
        match self {
            DeploymentOutcome::Completed { verification, .. } => Some(verification),
            DeploymentOutcome::Aborted { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&DeployError> {
        match self {
            DeploymentOutcome::Completed { .. } => None,
            DeploymentOutcome::Aborted { error, .. } => Some(error),
        }
    }
}

/// Sequences the deployment of a [`DeploymentPlan`].
pub struct Orchestrator<'a, C, A> {
    client: &'a C,
    artifacts: &'a A,
    plan: DeploymentPlan,
    proxy_artifact: String,
    policy: ConfirmationPolicy,
}

impl<'a, C: ChainClient, A: ArtifactProvider> Orchestrator<'a, C, A> {
    pub fn new(client: &'a C, artifacts: &'a A, plan: DeploymentPlan) -> Self {
        Self {
            client,
            artifacts,
            plan,
            proxy_artifact: DEFAULT_PROXY_ARTIFACT.to_string(),
            policy: ConfirmationPolicy::default(),
        }
    }

    pub fn with_proxy_artifact(mut self, name: impl Into<String>) -> Self {
        self.proxy_artifact = name.into();
        self
    }

    pub fn with_policy(mut self, policy: ConfirmationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn plan(&self) -> &DeploymentPlan {
        &self.plan
    }

    /// Deploy every contract, then verify.
    pub async fn run(&self) -> DeploymentOutcome {
        let mut result = DeploymentResult::default();
        let mut bound = Vec::with_capacity(self.plan.len());

        tracing::info!(
            contracts = self.plan.len(),
            sender = %self.client.sender(),
            "Starting deployment"
        );

        for spec in self.plan.execution_order() {
            match self.deploy_node(spec, &mut result).await {
                Ok(contract) => bound.push(contract),
                Err(error) => {
                    tracing::error!(
                        contract = %spec.name,
                        error = %error,
                        implementations = result.implementations.len(),
                        proxies = result.proxies.len(),
                        "Deployment aborted"
                    );
                    return DeploymentOutcome::Aborted {
                        partial: result,
                        error,
                    };
                }
            }
        }

        tracing::info!("All contracts deployed, verifying");
        let verification = verify_deployment(self.client, &self.plan, &bound, &result).await;

        DeploymentOutcome::Completed {
            result,
            verification,
        }
    }

    /// Deploy one node. The implementation address is recorded as soon as it
    /// is confirmed so a proxy failure still reports it.
    async fn deploy_node(
        &self,
        spec: &ContractSpec,
        result: &mut DeploymentResult,
    ) -> Result<BoundContract, DeployError> {
        // Resolve both artifacts before any transaction for this node.
        let artifact = self.artifacts.artifact(&spec.artifact)?;
        let proxy_artifact = self.artifacts.artifact(&self.proxy_artifact)?;
        let deployer = ContractDeployer::new(self.client, self.policy);

        let implementation = deployer
            .deploy_as(&format!("{} implementation", spec.name), &artifact, &[])
            .await?
            .contract_address();
        result
            .implementations
            .insert(spec.name.clone(), implementation);

        let init_args = result.init_arguments(spec)?;
        let init_calldata = build_init_calldata(spec.init, &init_args)?;
        tracing::debug!(
            contract = %spec.name,
            init = %spec.init,
            calldata = ?init_calldata,
            "Built initializer calldata"
        );

        let proxy = deployer
            .deploy_as(
                &format!("{} proxy", spec.name),
                &proxy_artifact,
                &[
                    DynSolValue::Address(implementation),
                    DynSolValue::Bytes(init_calldata.to_vec()),
                ],
            )
            .await?
            .contract_address();

        let contract = bind(spec.name.clone(), artifact.abi, proxy);
        result.proxies.insert(spec.name.clone(), proxy);

        tracing::info!(
            contract = %spec.name,
            implementation = %implementation,
            proxy = %proxy,
            "Contract ready"
        );
        Ok(contract)
    }
}
