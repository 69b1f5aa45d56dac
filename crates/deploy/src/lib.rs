//! erc8004-deploy - Deployment library for the ERC-8004 registries.
//!
//! This crate deploys the Identity, Reputation and Validation registries as
//! implementation contracts behind ERC1967 proxies, initializes each proxy
//! atomically at construction, and verifies the cross-registry references
//! once everything is live.

mod artifacts;
pub use artifacts::{
    ArtifactProvider, ContractArtifact, HardhatArtifacts, InMemoryArtifacts, parse_artifact,
};

mod binder;
pub use binder::{BoundContract, bind, render_value};

mod calldata;
pub use calldata::{
    InitStyle, NO_ARG_INIT_SELECTOR, ProxyInitSpec, SINGLE_ADDRESS_INIT_SELECTOR,
    build_init_calldata, build_init_spec,
};

mod chain;
pub use chain::{ChainClient, CreationReceipt};

mod config;
pub use config::{
    CONFIG_FILENAME, ConfigOverrides, DeployConfig, ENV_PREFIX, Network, NetworkConfig,
};

mod deployer;
pub use deployer::{ConfirmationPolicy, ContractDeployer, DeploymentRecord, encode_constructor_args};

mod error;
pub use error::{ArtifactError, ChainError, DeployError, PlanError, VerificationError};

mod orchestrator;
pub use orchestrator::{DEFAULT_PROXY_ARTIFACT, DeploymentOutcome, DeploymentResult, Orchestrator};

mod plan;
pub use plan::{
    ContractSpec, DEFAULT_VERSION_ACCESSOR, DeploymentPlan, IDENTITY_BACK_REFERENCE_ACCESSOR,
};

mod report;
pub use report::{DeploymentFile, DeploymentSummary, render_table};

mod rpc;
pub use rpc::{DEFAULT_POLL_INTERVAL, RpcChainClient};

mod verify;
pub use verify::{VerificationReport, bind_proxies, verify_deployment};

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
