//! Deployment plan: which contracts to deploy and in which order.
//!
//! The plan is a DAG of [`ContractSpec`] nodes. Execution order is a
//! topological sort that breaks ties by declaration order, so the same plan
//! always deploys in the same sequence.

use std::collections::{BTreeSet, HashMap};

use derive_more::Deref;
use serde::{Deserialize, Serialize};

use crate::{calldata::InitStyle, error::PlanError};

/// Accessor every registry exposes for its version.
pub const DEFAULT_VERSION_ACCESSOR: &str = "getVersion";

/// Accessor dependent registries expose for the identity registry address.
pub const IDENTITY_BACK_REFERENCE_ACCESSOR: &str = "getIdentityRegistry";

fn default_version_accessor() -> String {
    DEFAULT_VERSION_ACCESSOR.to_string()
}

/// One contract in the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSpec {
    /// Logical name, used as the key in results.
    pub name: String,
    /// Artifact holding the implementation.
    pub artifact: String,
    /// Contracts whose proxies must exist before this proxy is constructed.
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    /// Initializer invoked by the proxy constructor.
    pub init: InitStyle,
    #[serde(default = "default_version_accessor")]
    pub version_accessor: String,
    /// Accessor returning the dependency's proxy address. Defaults to
    /// [`IDENTITY_BACK_REFERENCE_ACCESSOR`] for `single-address` nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back_reference_accessor: Option<String>,
}

impl ContractSpec {
    pub fn new(name: impl Into<String>, artifact: impl Into<String>, init: InitStyle) -> Self {
        Self {
            name: name.into(),
            artifact: artifact.into(),
            depends_on: BTreeSet::new(),
            init,
            version_accessor: default_version_accessor(),
            back_reference_accessor: None,
        }
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.depends_on.insert(dependency.into());
        self
    }

    pub fn back_reference(mut self, accessor: impl Into<String>) -> Self {
        self.back_reference_accessor = Some(accessor.into());
        self
    }

    /// Accessor checked against the dependency's proxy after deployment.
    ///
    /// A node initialized with its dependency's address is bound to it and
    /// is checked even when no accessor is configured. Nodes that only
    /// depend on others for ordering have nothing to check.
    pub fn checked_back_reference(&self) -> Option<&str> {
        match (&self.back_reference_accessor, self.init) {
            (Some(accessor), _) => Some(accessor),
            (None, InitStyle::SingleAddress) => Some(IDENTITY_BACK_REFERENCE_ACCESSOR),
            (None, InitStyle::NoArg) => None,
        }
    }

    /// The single dependency, for specs that have exactly one.
    pub fn sole_dependency(&self) -> Option<&str> {
        match self.depends_on.len() {
            1 => self.depends_on.iter().next().map(String::as_str),
            _ => None,
        }
    }
}

/// A validated, acyclic set of contracts with a fixed execution order.
#[derive(Debug, Clone, PartialEq, Eq, Deref)]
pub struct DeploymentPlan {
    #[deref]
    contracts: Vec<ContractSpec>,
    order: Vec<usize>,
}

impl DeploymentPlan {
    /// Validate `contracts` and compute the execution order.
    pub fn new(contracts: Vec<ContractSpec>) -> Result<Self, PlanError> {
        let mut index = HashMap::new();
        for (i, spec) in contracts.iter().enumerate() {
            if index.insert(spec.name.as_str(), i).is_some() {
                return Err(PlanError::DuplicateContract(spec.name.clone()));
            }
        }

        for spec in &contracts {
            for dependency in &spec.depends_on {
                if !index.contains_key(dependency.as_str()) {
                    return Err(PlanError::UnknownDependency {
                        contract: spec.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }

            // Initializer arguments are the dependencies' proxy addresses.
            if spec.init.arity() > 0 && spec.depends_on.len() != spec.init.arity() {
                return Err(PlanError::InitArity {
                    contract: spec.name.clone(),
                    style: spec.init.to_string(),
                    expected: spec.init.arity(),
                    found: spec.depends_on.len(),
                });
            }

            if spec.back_reference_accessor.is_some() && spec.sole_dependency().is_none() {
                return Err(PlanError::AmbiguousBackReference(spec.name.clone()));
            }
        }

        let order = topological_order(&contracts, &index)?;
        Ok(Self { contracts, order })
    }

    /// The identity, reputation and validation registries.
    pub fn erc8004() -> Self {
        let identity =
            ContractSpec::new("identity", "IdentityRegistryUpgradeable", InitStyle::NoArg);
        let reputation = ContractSpec::new(
            "reputation",
            "ReputationRegistryUpgradeable",
            InitStyle::SingleAddress,
        )
        .depends_on("identity")
        .back_reference(IDENTITY_BACK_REFERENCE_ACCESSOR);
        let validation = ContractSpec::new(
            "validation",
            "ValidationRegistryUpgradeable",
            InitStyle::SingleAddress,
        )
        .depends_on("identity")
        .back_reference(IDENTITY_BACK_REFERENCE_ACCESSOR);

        Self {
            contracts: vec![identity, reputation, validation],
            order: vec![0, 1, 2],
        }
    }

    /// Contracts in the order they must be deployed.
    pub fn execution_order(&self) -> impl Iterator<Item = &ContractSpec> {
        self.order.iter().map(|&i| &self.contracts[i])
    }

    pub fn get(&self, name: &str) -> Option<&ContractSpec> {
        self.contracts.iter().find(|spec| spec.name == name)
    }

    /// Contracts as declared.
    pub fn specs(&self) -> &[ContractSpec] {
        &self.contracts
    }
}

impl Default for DeploymentPlan {
    fn default() -> Self {
        Self::erc8004()
    }
}

impl TryFrom<Vec<ContractSpec>> for DeploymentPlan {
    type Error = PlanError;

    fn try_from(contracts: Vec<ContractSpec>) -> Result<Self, Self::Error> {
        Self::new(contracts)
    }
}

/// Kahn's algorithm, always picking the earliest-declared ready node.
fn topological_order(
    contracts: &[ContractSpec],
    index: &HashMap<&str, usize>,
) -> Result<Vec<usize>, PlanError> {
    let mut remaining: Vec<usize> = contracts.iter().map(|spec| spec.depends_on.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); contracts.len()];
    for (i, spec) in contracts.iter().enumerate() {
        for dependency in &spec.depends_on {
            dependents[index[dependency.as_str()]].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..contracts.len()).filter(|&i| remaining[i] == 0).collect();
    let mut order = Vec::with_capacity(contracts.len());

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &dependent in &dependents[next] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() != contracts.len() {
        let stuck = (0..contracts.len())
            .filter(|i| !order.contains(i))
            .map(|i| contracts[i].name.clone())
            .collect();
        return Err(PlanError::Cycle(stuck));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(plan: &DeploymentPlan) -> Vec<&str> {
        plan.execution_order().map(|spec| spec.name.as_str()).collect()
    }

    #[test]
    fn test_default_plan_order() {
        let plan = DeploymentPlan::erc8004();
        assert_eq!(names(&plan), vec!["identity", "reputation", "validation"]);
        assert_eq!(
            DeploymentPlan::new(plan.specs().to_vec()).expect("default plan is valid"),
            plan
        );
    }

    #[test]
    fn test_dependencies_come_first_regardless_of_declaration() {
        let plan = DeploymentPlan::new(vec![
            ContractSpec::new("validation", "V", InitStyle::SingleAddress).depends_on("identity"),
            ContractSpec::new("reputation", "R", InitStyle::SingleAddress).depends_on("identity"),
            ContractSpec::new("identity", "I", InitStyle::NoArg),
        ])
        .expect("plan should be valid");

        assert_eq!(names(&plan), vec!["identity", "validation", "reputation"]);
    }

    #[test]
    fn test_fourth_contract_needs_no_control_flow_change() {
        let mut specs = DeploymentPlan::erc8004().specs().to_vec();
        specs.push(
            ContractSpec::new("audit", "AuditRegistryUpgradeable", InitStyle::SingleAddress)
                .depends_on("reputation"),
        );
        let plan = DeploymentPlan::new(specs).expect("plan should be valid");

        let order = names(&plan);
        let position = |name| order.iter().position(|n| *n == name).expect("present");
        assert!(position("reputation") < position("audit"));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let err = DeploymentPlan::new(vec![
            ContractSpec::new("identity", "I", InitStyle::NoArg),
            ContractSpec::new("identity", "I2", InitStyle::NoArg),
        ])
        .expect_err("duplicate names must be rejected");
        assert_eq!(err, PlanError::DuplicateContract("identity".to_string()));
    }

    #[test]
    fn test_rejects_unknown_dependency() {
        let err = DeploymentPlan::new(vec![
            ContractSpec::new("reputation", "R", InitStyle::SingleAddress).depends_on("identity"),
        ])
        .expect_err("unknown dependency must be rejected");
        assert!(matches!(err, PlanError::UnknownDependency { .. }));
    }

    #[test]
    fn test_rejects_cycles() {
        let err = DeploymentPlan::new(vec![
            ContractSpec::new("a", "A", InitStyle::SingleAddress).depends_on("b"),
            ContractSpec::new("b", "B", InitStyle::SingleAddress).depends_on("a"),
            ContractSpec::new("c", "C", InitStyle::NoArg),
        ])
        .expect_err("cycle must be rejected");
        assert_eq!(err, PlanError::Cycle(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_rejects_init_arity_mismatch() {
        let err = DeploymentPlan::new(vec![
            ContractSpec::new("identity", "I", InitStyle::NoArg),
            ContractSpec::new("reputation", "R", InitStyle::SingleAddress),
        ])
        .expect_err("single-address init without dependency must be rejected");
        assert!(matches!(err, PlanError::InitArity { found: 0, .. }));
    }

    #[test]
    fn test_no_arg_contract_may_depend_for_ordering_only() {
        let plan = DeploymentPlan::new(vec![
            ContractSpec::new("late", "L", InitStyle::NoArg).depends_on("early"),
            ContractSpec::new("early", "E", InitStyle::NoArg),
        ])
        .expect("plan should be valid");
        assert_eq!(names(&plan), vec!["early", "late"]);
    }

    #[test]
    fn test_rejects_back_reference_without_single_dependency() {
        let err = DeploymentPlan::new(vec![
            ContractSpec::new("identity", "I", InitStyle::NoArg)
                .back_reference(IDENTITY_BACK_REFERENCE_ACCESSOR),
        ])
        .expect_err("back reference needs a dependency");
        assert_eq!(err, PlanError::AmbiguousBackReference("identity".to_string()));
    }

    #[test]
    fn test_checked_back_reference() {
        let bound = ContractSpec::new("reputation", "R", InitStyle::SingleAddress)
            .depends_on("identity");
        assert_eq!(bound.checked_back_reference(), Some(IDENTITY_BACK_REFERENCE_ACCESSOR));

        let custom = bound.clone().back_reference("getParent");
        assert_eq!(custom.checked_back_reference(), Some("getParent"));

        let ordering_only = ContractSpec::new("late", "L", InitStyle::NoArg).depends_on("early");
        assert_eq!(ordering_only.checked_back_reference(), None);
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let spec: ContractSpec = toml::from_str(
            r#"
            name = "reputation"
            artifact = "ReputationRegistryUpgradeable"
            depends_on = ["identity"]
            init = "single-address"
            back_reference_accessor = "getIdentityRegistry"
            "#,
        )
        .expect("spec should parse");

        assert_eq!(spec.version_accessor, DEFAULT_VERSION_ACCESSOR);
        assert_eq!(spec.sole_dependency(), Some("identity"));
        assert_eq!(spec.init, InitStyle::SingleAddress);
    }
}
