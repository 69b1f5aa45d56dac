//! Contract creation: submit, confirm, and check that a contract came out.

use std::time::Duration;

use alloy_core::{
    dyn_abi::{DynSolValue, JsonAbiExt},
    primitives::{Address, Bytes, TxHash},
};
use backon::{ConstantBuilder, Retryable};
use serde::{Deserialize, Serialize};

use crate::{
    artifacts::ContractArtifact,
    chain::{ChainClient, CreationReceipt},
    error::{ChainError, DeployError},
};

/// Bounds on how long a creation transaction may take to confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationPolicy {
    /// Maximum wait for a single receipt, in seconds.
    pub timeout_secs: u64,
    /// Interval between receipt polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Additional waits on the same transaction after a timeout.
    pub retries: usize,
    /// Delay before each additional wait, in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            poll_interval_ms: 1_000,
            retries: 3,
            retry_delay_ms: 2_000,
        }
    }
}

impl ConfirmationPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Total number of waits before giving up.
    pub fn max_attempts(&self) -> usize {
        self.retries + 1
    }
}

/// A confirmed contract creation.
///
/// Only built from a successful receipt that carries a non-zero contract
/// address, so `confirmed` always holds for a record that exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentRecord {
    contract_address: Address,
    transaction_hash: TxHash,
    confirmed: bool,
}

impl DeploymentRecord {
    /// Validate a mined receipt for the creation of `contract`.
    ///
    /// A mined transaction may still have failed to create a contract, so the
    /// status and the resulting address are both checked.
    pub fn from_receipt(contract: &str, receipt: &CreationReceipt) -> Result<Self, DeployError> {
        let failure = |reason: &str| DeployError::DeploymentFailure {
            contract: contract.to_string(),
            tx_hash: receipt.transaction_hash,
            reason: reason.to_string(),
        };

        if !receipt.status {
            return Err(failure("creation transaction reverted"));
        }

        match receipt.contract_address {
            None => Err(failure("no contract address in receipt")),
            Some(address) if address.is_zero() => Err(failure("zero contract address in receipt")),
            Some(address) => Ok(Self {
                contract_address: address,
                transaction_hash: receipt.transaction_hash,
                confirmed: true,
            }),
        }
    }

    pub fn contract_address(&self) -> Address {
        self.contract_address
    }

    pub fn transaction_hash(&self) -> TxHash {
        self.transaction_hash
    }

    pub fn confirmed(&self) -> bool {
        self.confirmed
    }
}

/// Encode constructor arguments against the artifact's constructor ABI.
pub fn encode_constructor_args(
    artifact: &ContractArtifact,
    args: &[DynSolValue],
) -> Result<Vec<u8>, DeployError> {
    match artifact.abi.constructor() {
        Some(constructor) => constructor
            .abi_encode_input(args)
            .map_err(|e| DeployError::Encoding {
                context: format!("{} constructor", artifact.name),
                reason: e.to_string(),
            }),
        None if args.is_empty() => Ok(Vec::new()),
        None => Err(DeployError::Encoding {
            context: format!("{} constructor", artifact.name),
            reason: format!("no constructor in ABI but {} argument(s) given", args.len()),
        }),
    }
}

/// Drives contract creation through a [`ChainClient`].
pub struct ContractDeployer<'a, C> {
    client: &'a C,
    policy: ConfirmationPolicy,
}

impl<'a, C: ChainClient> ContractDeployer<'a, C> {
    pub fn new(client: &'a C, policy: ConfirmationPolicy) -> Self {
        Self { client, policy }
    }

    /// Deploy `artifact` with `constructor_args` and block until confirmed.
    pub async fn deploy(
        &self,
        artifact: &ContractArtifact,
        constructor_args: &[DynSolValue],
    ) -> Result<DeploymentRecord, DeployError> {
        self.deploy_as(&artifact.name, artifact, constructor_args)
            .await
    }

    /// Same as [`deploy`](Self::deploy), attributing logs and errors to `label`.
    pub async fn deploy_as(
        &self,
        label: &str,
        artifact: &ContractArtifact,
        constructor_args: &[DynSolValue],
    ) -> Result<DeploymentRecord, DeployError> {
        let mut init_code = artifact.bytecode.to_vec();
        init_code.extend(encode_constructor_args(artifact, constructor_args)?);

        tracing::info!(contract = %label, artifact = %artifact.name, "Deploying contract");

        let tx_hash = self
            .client
            .submit_creation(Bytes::from(init_code))
            .await
            .map_err(|source| DeployError::Chain {
                contract: label.to_string(),
                source,
            })?;
        tracing::info!(
            contract = %label,
            tx_hash = %tx_hash,
            "Waiting for transaction to be mined"
        );

        let receipt = self.confirm(label, tx_hash).await?;
        tracing::debug!(
            contract = %label,
            tx_hash = %tx_hash,
            block_number = ?receipt.block_number,
            gas_used = receipt.gas_used,
            "Transaction mined"
        );

        let record = DeploymentRecord::from_receipt(label, &receipt)?;
        tracing::info!(
            contract = %label,
            address = %record.contract_address(),
            "Contract deployed"
        );
        Ok(record)
    }

    /// Wait for `tx_hash`, re-waiting on timeouts as the policy allows.
    /// The transaction itself is never resubmitted.
    async fn confirm(&self, label: &str, tx_hash: TxHash) -> Result<CreationReceipt, DeployError> {
        let timeout = self.policy.timeout();
        let backoff = ConstantBuilder::default()
            .with_delay(self.policy.retry_delay())
            .with_max_times(self.policy.retries);

        (|| self.client.wait_for_receipt(tx_hash, timeout))
            .retry(backoff)
            .sleep(tokio::time::sleep)
            .when(ChainError::is_timeout)
            .notify(|err: &ChainError, delay: Duration| {
                tracing::warn!(
                    contract = %label,
                    tx_hash = %tx_hash,
                    error = %err,
                    retry_in = ?delay,
                    "Confirmation wait expired, waiting again"
                );
            })
            .await
            .map_err(|err| match err {
                ChainError::Timeout(tx_hash) => DeployError::ConfirmationTimeout {
                    contract: label.to_string(),
                    tx_hash,
                    attempts: self.policy.max_attempts(),
                },
                source => DeployError::Chain {
                    contract: label.to_string(),
                    source,
                },
            })
    }
}
