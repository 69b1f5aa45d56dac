//! Proxy initializer calldata.
//!
//! Selectors come from `sol!` declarations of the initializer signatures, so
//! they are computed at compile time as `keccak256(signature)[..4]` and can
//! never drift from the Solidity declaration.

use alloy::sol;
use alloy_core::{
    primitives::{Address, Bytes, Selector},
    sol_types::{SolCall, SolValue},
};
use serde::{Deserialize, Serialize};

use crate::error::DeployError;

sol! {
    /// Initializer of registries without dependencies.
    interface INoArgInitializer {
        function initialize() external;
    }

    /// Initializer of registries bound to the identity registry.
    interface IAddressInitializer {
        function initialize(address identityRegistry) external;
    }
}

/// `initialize()`.
pub const NO_ARG_INIT_SELECTOR: Selector =
    Selector::new(INoArgInitializer::initializeCall::SELECTOR);

/// `initialize(address)`.
pub const SINGLE_ADDRESS_INIT_SELECTOR: Selector =
    Selector::new(IAddressInitializer::initializeCall::SELECTOR);

/// How a proxy's implementation is initialized at construction.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum InitStyle {
    /// `initialize()`.
    NoArg,
    /// `initialize(address)`, bound to the single dependency's proxy.
    SingleAddress,
}

impl InitStyle {
    pub fn selector(&self) -> Selector {
        match self {
            InitStyle::NoArg => NO_ARG_INIT_SELECTOR,
            InitStyle::SingleAddress => SINGLE_ADDRESS_INIT_SELECTOR,
        }
    }

    pub fn signature(&self) -> &'static str {
        match self {
            InitStyle::NoArg => INoArgInitializer::initializeCall::SIGNATURE,
            InitStyle::SingleAddress => IAddressInitializer::initializeCall::SIGNATURE,
        }
    }

    /// Number of address arguments the initializer takes.
    pub fn arity(&self) -> usize {
        match self {
            InitStyle::NoArg => 0,
            InitStyle::SingleAddress => 1,
        }
    }
}

/// Calldata passed to the proxy constructor, split at the selector boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyInitSpec {
    pub selector: Selector,
    pub encoded_args: Bytes,
}

impl ProxyInitSpec {
    /// Selector followed by the encoded arguments.
    pub fn calldata(&self) -> Bytes {
        let mut data = Vec::with_capacity(4 + self.encoded_args.len());
        data.extend_from_slice(self.selector.as_slice());
        data.extend_from_slice(&self.encoded_args);
        data.into()
    }
}

/// Build the initializer spec for `style` from its address arguments.
pub fn build_init_spec(style: InitStyle, args: &[Address]) -> Result<ProxyInitSpec, DeployError> {
    if args.len() != style.arity() {
        return Err(DeployError::Encoding {
            context: style.signature().to_string(),
            reason: format!("expected {} argument(s), got {}", style.arity(), args.len()),
        });
    }

    let encoded_args = match style {
        InitStyle::NoArg => Bytes::new(),
        InitStyle::SingleAddress => args[0].abi_encode().into(),
    };

    Ok(ProxyInitSpec {
        selector: style.selector(),
        encoded_args,
    })
}

/// Build the raw initializer calldata for `style`.
pub fn build_init_calldata(style: InitStyle, args: &[Address]) -> Result<Bytes, DeployError> {
    build_init_spec(style, args).map(|spec| spec.calldata())
}
