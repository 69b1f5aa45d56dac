//! JSON-RPC backed [`ChainClient`].

use std::time::Duration;

use alloy::{
    network::{EthereumWallet, TransactionBuilder},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::TransactionRequest,
    transports::{RpcError, TransportErrorKind},
};
use alloy_core::primitives::{Address, Bytes, TxHash};
use alloy_signer_local::PrivateKeySigner;
use tokio::time::Instant;
use url::Url;

use crate::{
    chain::{ChainClient, CreationReceipt},
    error::ChainError,
};

/// Default interval between receipt polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// JSON-RPC error code geth uses for reverted calls.
const EXECUTION_REVERTED_CODE: i64 = 3;

/// Consecutive transport failures tolerated while polling for a receipt.
const MAX_TRANSPORT_FAILURES: u32 = 3;

/// Chain client over an HTTP JSON-RPC endpoint, signing with a local key.
#[derive(Clone)]
pub struct RpcChainClient {
    provider: DynProvider,
    sender: Address,
    poll_interval: Duration,
}

impl RpcChainClient {
    /// Connect to `rpc_url`, signing transactions with `signer`.
    pub fn connect(rpc_url: Url, signer: PrivateKeySigner) -> Self {
        let sender = signer.address();
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(rpc_url)
            .erased();

        Self {
            provider,
            sender,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Connect to `rpc_url` for reads only. Submitting a creation through
    /// this client fails at the node, since there is no signer.
    pub fn read_only(rpc_url: Url) -> Self {
        let provider = ProviderBuilder::new().connect_http(rpc_url).erased();

        Self {
            provider,
            sender: Address::ZERO,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the receipt polling interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

fn rpc_error(err: RpcError<TransportErrorKind>) -> ChainError {
    ChainError::Rpc(err.to_string())
}

/// Classify an `eth_call` failure: node-reported reverts are distinguished
/// from transport failures so a revert is never mistaken for an outage.
fn call_error(err: RpcError<TransportErrorKind>) -> ChainError {
    match err.as_error_resp() {
        Some(payload)
            if payload.code == EXECUTION_REVERTED_CODE
                || payload.message.to_lowercase().contains("revert") =>
        {
            ChainError::Reverted(payload.message.to_string())
        }
        _ => ChainError::Rpc(err.to_string()),
    }
}

impl ChainClient for RpcChainClient {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.provider.get_chain_id().await.map_err(rpc_error)
    }

    fn sender(&self) -> Address {
        self.sender
    }

    async fn submit_creation(&self, init_code: Bytes) -> Result<TxHash, ChainError> {
        let tx = TransactionRequest::default()
            .with_from(self.sender)
            .with_deploy_code(init_code);

        let pending = self.provider.send_transaction(tx).await.map_err(rpc_error)?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> Result<CreationReceipt, ChainError> {
        let deadline = Instant::now() + timeout;
        let mut transport_failures = 0;

        loop {
            // A node that never answers must not outlive the deadline.
            let remaining = deadline.saturating_duration_since(Instant::now());
            let query = self.provider.get_transaction_receipt(tx_hash);
            let Ok(response) = tokio::time::timeout(remaining, query).await else {
                return Err(ChainError::Timeout(tx_hash));
            };

            match response {
                Ok(Some(receipt)) => {
                    return Ok(CreationReceipt {
                        transaction_hash: receipt.transaction_hash,
                        status: receipt.status(),
                        contract_address: receipt.contract_address,
                        block_number: receipt.block_number,
                        gas_used: receipt.gas_used,
                    });
                }
                Ok(None) => {
                    tracing::trace!(tx_hash = %tx_hash, "Receipt not available yet");
                    transport_failures = 0;
                }
                Err(e) if e.as_error_resp().is_some() => return Err(rpc_error(e)),
                Err(e) => {
                    transport_failures += 1;
                    if transport_failures >= MAX_TRANSPORT_FAILURES {
                        return Err(rpc_error(e));
                    }
                    tracing::debug!(
                        tx_hash = %tx_hash,
                        error = %e,
                        attempt = transport_failures,
                        "Receipt query failed, retrying..."
                    );
                }
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(ChainError::Timeout(tx_hash));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError> {
        let tx = TransactionRequest::default()
            .with_from(self.sender)
            .with_to(to)
            .with_input(calldata);

        self.provider.call(tx).await.map_err(call_error)
    }
}
