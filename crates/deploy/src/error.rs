//! Error taxonomy for the deployment and verification phases.

use alloy_core::primitives::{Address, TxHash};

/// Errors raised while resolving a contract artifact.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// No artifact exists for the requested contract name.
    #[error("artifact not found: {0}")]
    NotFound(String),
    /// The artifact file exists but could not be read.
    #[error("failed to read artifact {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
    /// The artifact file is not a valid `{abi, bytecode}` document.
    #[error("failed to parse artifact {name}: {reason}")]
    Parse { name: String, reason: String },
    /// The bytecode still carries library link placeholders.
    #[error("artifact {0} has unlinked library references in its bytecode")]
    UnlinkedBytecode(String),
}

/// Errors reported by a [`ChainClient`](crate::ChainClient).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// Transport or node-side failure.
    #[error("rpc error: {0}")]
    Rpc(String),
    /// The call executed and reverted.
    #[error("execution reverted: {0}")]
    Reverted(String),
    /// No receipt was observed before the wait deadline.
    #[error("timed out waiting for receipt of {0}")]
    Timeout(TxHash),
}

impl ChainError {
    /// Whether the error is a bounded-wait expiry that may be retried.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ChainError::Timeout(_))
    }
}

/// Errors in the shape of a deployment plan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("contract {0} is declared more than once")]
    DuplicateContract(String),
    #[error("contract {contract} depends on unknown contract {dependency}")]
    UnknownDependency { contract: String, dependency: String },
    #[error("dependency cycle through {0:?}")]
    Cycle(Vec<String>),
    #[error("contract {contract} uses {style} which needs exactly {expected} dependencies, found {found}")]
    InitArity {
        contract: String,
        style: String,
        expected: usize,
        found: usize,
    },
    #[error("contract {0} declares a back-reference accessor but does not have exactly one dependency")]
    AmbiguousBackReference(String),
}

/// Failures during the deployment phase. Any of these aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),
    #[error(transparent)]
    Artifact(ArtifactError),
    /// A creation transaction was mined but produced no contract.
    #[error("deployment of {contract} failed in tx {tx_hash}: {reason}")]
    DeploymentFailure {
        contract: String,
        tx_hash: TxHash,
        reason: String,
    },
    #[error("tx {tx_hash} for {contract} not confirmed after {attempts} attempts")]
    ConfirmationTimeout {
        contract: String,
        tx_hash: TxHash,
        attempts: usize,
    },
    #[error("failed to encode {context}: {reason}")]
    Encoding { context: String, reason: String },
    #[error("chain error while deploying {contract}: {source}")]
    Chain {
        contract: String,
        #[source]
        source: ChainError,
    },
    #[error(transparent)]
    Plan(#[from] PlanError),
}

impl From<ArtifactError> for DeployError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::NotFound(name) => DeployError::ArtifactNotFound(name),
            other => DeployError::Artifact(other),
        }
    }
}

/// Post-deployment invariant failures. These never roll anything back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("{contract}.{accessor}() returned {actual}, expected {expected}")]
    VerificationMismatch {
        contract: String,
        accessor: String,
        expected: String,
        actual: String,
    },
    #[error("{contract}.{accessor}() failed: {reason}")]
    ReadCallFailure {
        contract: String,
        accessor: String,
        reason: String,
    },
    #[error("{contract} proxy at {proxy} accepted a second initializer call")]
    ReinitializationPossible { contract: String, proxy: Address },
}

impl VerificationError {
    /// Name of the contract the issue was found on.
    pub fn contract(&self) -> &str {
        match self {
            VerificationError::VerificationMismatch { contract, .. }
            | VerificationError::ReadCallFailure { contract, .. }
            | VerificationError::ReinitializationPossible { contract, .. } => contract,
        }
    }
}
