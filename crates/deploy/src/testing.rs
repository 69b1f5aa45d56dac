//! In-memory chain simulation for tests.
//!
//! [`SimulatedChain`] models just enough EVM behaviour for the deployment flow:
//! implementation contracts identified by their creation bytecode, ERC1967
//! proxies whose constructor delegatecalls the init data exactly once, and the
//! `getVersion()` / `getIdentityRegistry()` accessors behind a proxy.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use alloy_core::{
    json_abi::JsonAbi,
    primitives::{Address, Bytes, Selector, TxHash, keccak256},
    sol_types::SolValue,
};

use crate::{
    artifacts::{ContractArtifact, InMemoryArtifacts},
    calldata::{NO_ARG_INIT_SELECTOR, SINGLE_ADDRESS_INIT_SELECTOR},
    chain::{ChainClient, CreationReceipt},
    error::ChainError,
};

/// Chain id reported by the simulation.
pub const SIMULATED_CHAIN_ID: u64 = 31337;

/// Account used as transaction sender.
pub const SIMULATED_SENDER: Address = Address::with_last_byte(0xde);

const REGISTRY_ABI: &str = r#"[
    {"type": "function", "name": "initialize", "inputs": [], "outputs": [], "stateMutability": "nonpayable"},
    {"type": "function", "name": "initialize", "inputs": [{"name": "identityRegistry", "type": "address"}], "outputs": [], "stateMutability": "nonpayable"},
    {"type": "function", "name": "getVersion", "inputs": [], "outputs": [{"name": "", "type": "string"}], "stateMutability": "pure"},
    {"type": "function", "name": "getIdentityRegistry", "inputs": [], "outputs": [{"name": "", "type": "address"}], "stateMutability": "view"}
]"#;

const PROXY_ABI: &str = r#"[
    {"type": "constructor", "inputs": [
        {"name": "implementation", "type": "address"},
        {"name": "_data", "type": "bytes"}
    ], "stateMutability": "payable"},
    {"type": "fallback", "stateMutability": "payable"}
]"#;

/// Name of the proxy artifact in fixtures.
pub const PROXY_ARTIFACT: &str = "ERC1967Proxy";

fn fixture_bytecode(name: &str) -> Bytes {
    let mut code = vec![0x60, 0x80, 0x60, 0x40, 0x52];
    code.extend_from_slice(&keccak256(name.as_bytes())[..8]);
    code.into()
}

/// A registry artifact exposing the initializers and accessors.
pub fn registry_artifact(name: &str, version: &str) -> ContractArtifact {
    let abi: JsonAbi = match serde_json::from_str(REGISTRY_ABI) {
        Ok(abi) => abi,
        Err(e) => panic!("invalid registry fixture ABI: {e}"),
    };
    let mut bytecode = fixture_bytecode(name).to_vec();
    bytecode.extend_from_slice(version.as_bytes());
    ContractArtifact {
        name: name.to_string(),
        abi,
        bytecode: bytecode.into(),
    }
}

/// The `ERC1967Proxy(address implementation, bytes _data)` artifact.
pub fn proxy_artifact() -> ContractArtifact {
    let abi: JsonAbi = match serde_json::from_str(PROXY_ABI) {
        Ok(abi) => abi,
        Err(e) => panic!("invalid proxy fixture ABI: {e}"),
    };
    ContractArtifact {
        name: PROXY_ARTIFACT.to_string(),
        abi,
        bytecode: fixture_bytecode(PROXY_ARTIFACT),
    }
}

/// Artifacts for the identity/reputation/validation registries and the proxy,
/// registered on a fresh [`SimulatedChain`].
pub fn registry_fixture() -> (SimulatedChain, InMemoryArtifacts) {
    let chain = SimulatedChain::new();
    let mut artifacts = InMemoryArtifacts::new();

    for (name, version) in [
        ("IdentityRegistryUpgradeable", "1.0.0"),
        ("ReputationRegistryUpgradeable", "1.0.0"),
        ("ValidationRegistryUpgradeable", "1.0.0"),
    ] {
        let artifact = registry_artifact(name, version);
        chain.register_implementation(&artifact, version);
        artifacts.insert(artifact);
    }

    let proxy = proxy_artifact();
    chain.register_proxy(&proxy);
    artifacts.insert(proxy);

    (chain, artifacts)
}

fn selector_of(signature: &str) -> Selector {
    Selector::from_slice(&keccak256(signature.as_bytes())[..4])
}

#[derive(Debug, Clone)]
enum Account {
    Implementation {
        version: Option<String>,
    },
    Proxy {
        implementation: Address,
        initialized: bool,
        back_reference: Option<Address>,
    },
}

/// One contract creation as observed by the simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Creation {
    Implementation {
        address: Address,
    },
    Proxy {
        address: Address,
        implementation: Address,
        init_data: Bytes,
    },
}

impl Creation {
    pub fn address(&self) -> Address {
        match self {
            Creation::Implementation { address } | Creation::Proxy { address, .. } => *address,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    submitted: usize,
    receipt_waits: usize,
    next_address: u64,
    implementations: HashMap<Bytes, String>,
    proxy_bytecode: Option<Bytes>,
    accounts: HashMap<Address, Account>,
    receipts: HashMap<TxHash, (usize, CreationReceipt)>,
    creations: Vec<Creation>,
    failing: HashSet<usize>,
    stalls: HashMap<usize, usize>,
    calls: usize,
}

/// Deterministic in-memory [`ChainClient`].
///
/// Clones share state, so a test can keep a handle while the orchestrator
/// owns another.
#[derive(Debug, Clone, Default)]
pub struct SimulatedChain {
    state: Arc<Mutex<State>>,
}

impl SimulatedChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Creations of `artifact`'s bytecode report `version` from `getVersion()`.
    pub fn register_implementation(&self, artifact: &ContractArtifact, version: &str) {
        self.state()
            .implementations
            .insert(artifact.bytecode.clone(), version.to_string());
    }

    /// Creations starting with `artifact`'s bytecode are ERC1967 proxies.
    pub fn register_proxy(&self, artifact: &ContractArtifact) {
        self.state().proxy_bytecode = Some(artifact.bytecode.clone());
    }

    /// The `index`-th creation (0-based) is mined without a contract address.
    pub fn fail_creation(&self, index: usize) {
        self.state().failing.insert(index);
    }

    /// The receipt of the `index`-th creation times out `times` times.
    pub fn stall_receipts(&self, index: usize, times: usize) {
        self.state().stalls.insert(index, times);
    }

    /// Overwrite the back reference stored in a proxy.
    pub fn set_back_reference(&self, proxy: Address, value: Address) {
        if let Some(Account::Proxy { back_reference, .. }) = self.state().accounts.get_mut(&proxy) {
            *back_reference = Some(value);
        }
    }

    /// Make a proxy accept its initializer again.
    pub fn reset_initialized(&self, proxy: Address) {
        if let Some(Account::Proxy { initialized, .. }) = self.state().accounts.get_mut(&proxy) {
            *initialized = false;
        }
    }

    pub fn submitted_creations(&self) -> usize {
        self.state().submitted
    }

    pub fn receipt_waits(&self) -> usize {
        self.state().receipt_waits
    }

    pub fn read_calls(&self) -> usize {
        self.state().calls
    }

    pub fn creations(&self) -> Vec<Creation> {
        self.state().creations.clone()
    }

    pub fn is_deployed(&self, address: Address) -> bool {
        self.state().accounts.contains_key(&address)
    }

    fn allocate_address(state: &mut State) -> Address {
        state.next_address += 1;
        Address::left_padding_from(&(0x1000 + state.next_address).to_be_bytes())
    }

    /// Run the proxy constructor: store the implementation and delegatecall
    /// the init data. Returns `None` if the constructor reverts.
    fn construct_proxy(state: &mut State, args: &[u8]) -> Option<(Address, Account, Bytes)> {
        let (implementation, init_data) = <(Address, Bytes)>::abi_decode_params(args).ok()?;
        if !matches!(
            state.accounts.get(&implementation),
            Some(Account::Implementation { .. })
        ) {
            return None;
        }

        let (initialized, back_reference) = if init_data.is_empty() {
            (false, None)
        } else if init_data.len() == 4 && init_data[..4] == NO_ARG_INIT_SELECTOR[..] {
            (true, None)
        } else if init_data.len() == 36 && init_data[..4] == SINGLE_ADDRESS_INIT_SELECTOR[..] {
            (true, Some(Address::from_slice(&init_data[16..36])))
        } else {
            return None;
        };

        let account = Account::Proxy {
            implementation,
            initialized,
            back_reference,
        };
        Some((implementation, account, init_data))
    }

    fn read(state: &State, to: Address, calldata: &[u8]) -> Result<Bytes, ChainError> {
        let Some(account) = state.accounts.get(&to) else {
            // Calls to accounts without code succeed with empty output.
            return Ok(Bytes::new());
        };
        if calldata.len() < 4 {
            return Err(ChainError::Reverted("missing selector".to_string()));
        }
        let selector = Selector::from_slice(&calldata[..4]);

        let version_of = |implementation: &Address| match state.accounts.get(implementation) {
            Some(Account::Implementation { version }) => version.clone(),
            _ => None,
        };

        let (version, initialized, back_reference) = match account {
            Account::Implementation { version } => (version.clone(), true, None),
            Account::Proxy {
                implementation,
                initialized,
                back_reference,
            } => (version_of(implementation), *initialized, *back_reference),
        };

        if selector == selector_of("getVersion()") {
            return match version {
                Some(version) => Ok((version,).abi_encode_params().into()),
                None => Err(ChainError::Reverted("unknown function".to_string())),
            };
        }
        if selector == selector_of("getIdentityRegistry()") {
            let value = back_reference.unwrap_or(Address::ZERO);
            return Ok((value,).abi_encode_params().into());
        }
        if selector == NO_ARG_INIT_SELECTOR || selector == SINGLE_ADDRESS_INIT_SELECTOR {
            return if initialized {
                Err(ChainError::Reverted("InvalidInitialization()".to_string()))
            } else {
                Ok(Bytes::new())
            };
        }
        Err(ChainError::Reverted("unknown function".to_string()))
    }
}

impl ChainClient for SimulatedChain {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(SIMULATED_CHAIN_ID)
    }

    fn sender(&self) -> Address {
        SIMULATED_SENDER
    }

    async fn submit_creation(&self, init_code: Bytes) -> Result<TxHash, ChainError> {
        let mut state = self.state();
        let index = state.submitted;
        state.submitted += 1;
        let tx_hash = TxHash::left_padding_from(&(index as u64 + 1).to_be_bytes());

        let mut receipt = CreationReceipt {
            transaction_hash: tx_hash,
            status: true,
            contract_address: None,
            block_number: Some(index as u64 + 1),
            gas_used: 500_000,
        };

        if !state.failing.contains(&index) {
            let proxy_args = state
                .proxy_bytecode
                .as_ref()
                .and_then(|code| init_code.strip_prefix(&code[..]))
                .map(<[u8]>::to_vec);

            match proxy_args {
                Some(args) => match Self::construct_proxy(&mut state, &args) {
                    Some((implementation, account, init_data)) => {
                        let address = Self::allocate_address(&mut state);
                        state.accounts.insert(address, account);
                        state.creations.push(Creation::Proxy {
                            address,
                            implementation,
                            init_data,
                        });
                        receipt.contract_address = Some(address);
                    }
                    None => receipt.status = false,
                },
                None => {
                    let version = state.implementations.get(&init_code).cloned();
                    let address = Self::allocate_address(&mut state);
                    state
                        .accounts
                        .insert(address, Account::Implementation { version });
                    state.creations.push(Creation::Implementation { address });
                    receipt.contract_address = Some(address);
                }
            }
        }

        state.receipts.insert(tx_hash, (index, receipt));
        Ok(tx_hash)
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: TxHash,
        _timeout: Duration,
    ) -> Result<CreationReceipt, ChainError> {
        let mut state = self.state();
        state.receipt_waits += 1;

        let (index, receipt) = state
            .receipts
            .get(&tx_hash)
            .cloned()
            .ok_or_else(|| ChainError::Rpc(format!("unknown transaction {tx_hash}")))?;

        if let Some(remaining) = state.stalls.get_mut(&index) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ChainError::Timeout(tx_hash));
            }
        }
        Ok(receipt)
    }

    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError> {
        let mut state = self.state();
        state.calls += 1;
        Self::read(&state, to, &calldata)
    }
}
