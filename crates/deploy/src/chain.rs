//! Chain capability interface.
//!
//! The orchestrator only needs to submit contract-creation transactions, wait
//! for their receipts and perform read-only calls. Everything else about the
//! endpoint (transport, signing, nonce and fee management) stays behind this
//! trait so a simulated chain can stand in for tests.

use std::{future::Future, time::Duration};

use alloy_core::primitives::{Address, Bytes, TxHash};

use crate::error::ChainError;

/// The subset of a mined receipt the deployer cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationReceipt {
    pub transaction_hash: TxHash,
    /// Whether execution succeeded.
    pub status: bool,
    /// Address of the created contract, when one was created.
    pub contract_address: Option<Address>,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

/// Submit, confirm and read against a single chain with a single signer.
pub trait ChainClient: Send + Sync {
    /// Chain id reported by the endpoint.
    fn chain_id(&self) -> impl Future<Output = Result<u64, ChainError>> + Send;

    /// Address of the signing account.
    fn sender(&self) -> Address;

    /// Submit a contract-creation transaction carrying `init_code`
    /// (creation bytecode followed by encoded constructor arguments).
    fn submit_creation(
        &self,
        init_code: Bytes,
    ) -> impl Future<Output = Result<TxHash, ChainError>> + Send;

    /// Wait until `tx_hash` is mined, or fail with [`ChainError::Timeout`]
    /// once `timeout` elapses.
    fn wait_for_receipt(
        &self,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> impl Future<Output = Result<CreationReceipt, ChainError>> + Send;

    /// Execute a read-only call against `to`.
    fn call(&self, to: Address, calldata: Bytes)
    -> impl Future<Output = Result<Bytes, ChainError>> + Send;
}
