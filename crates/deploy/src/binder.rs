//! Proxy binding: a proxy address paired with its implementation's ABI.
//!
//! A proxy delegates every call, so reads against it are encoded with the
//! implementation ABI. Binding is purely local; nothing is sent on-chain.

use alloy_core::{
    dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt},
    json_abi::{Function, JsonAbi},
    primitives::{Address, Bytes, hex},
};

use crate::{chain::ChainClient, error::VerificationError};

/// Bind `abi` to `proxy` under the logical contract `name`.
pub fn bind(name: impl Into<String>, abi: JsonAbi, proxy: Address) -> BoundContract {
    BoundContract {
        name: name.into(),
        address: proxy,
        abi,
    }
}

/// A handle on one deployed proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundContract {
    name: String,
    address: Address,
    abi: JsonAbi,
}

impl BoundContract {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    fn failure(&self, accessor: &str, reason: impl ToString) -> VerificationError {
        VerificationError::ReadCallFailure {
            contract: self.name.clone(),
            accessor: accessor.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Look up the overload of `function` taking `arity` inputs.
    fn function(&self, function: &str, arity: usize) -> Result<&Function, VerificationError> {
        self.abi
            .function(function)
            .and_then(|overloads| overloads.iter().find(|f| f.inputs.len() == arity))
            .ok_or_else(|| self.failure(function, format!("not in ABI with {arity} input(s)")))
    }

    /// Encode a call to `function` (selector included).
    pub fn calldata(
        &self,
        function: &str,
        args: &[DynSolValue],
    ) -> Result<Bytes, VerificationError> {
        self.function(function, args.len())?
            .abi_encode_input(args)
            .map(Bytes::from)
            .map_err(|e| self.failure(function, e))
    }

    /// Call `function` read-only and decode its outputs.
    pub async fn read<C: ChainClient>(
        &self,
        client: &C,
        function: &str,
        args: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>, VerificationError> {
        let abi_function = self.function(function, args.len())?;
        let calldata = abi_function
            .abi_encode_input(args)
            .map_err(|e| self.failure(function, e))?;

        tracing::trace!(contract = %self.name, address = %self.address, function, "Read call");

        let output = client
            .call(self.address, calldata.into())
            .await
            .map_err(|e| self.failure(function, e))?;

        if output.is_empty() && !abi_function.outputs.is_empty() {
            return Err(self.failure(function, "empty return data"));
        }

        abi_function
            .abi_decode_output(&output)
            .map_err(|e| self.failure(function, e))
    }

    /// Read a single value.
    pub async fn read_one<C: ChainClient>(
        &self,
        client: &C,
        function: &str,
    ) -> Result<DynSolValue, VerificationError> {
        self.read(client, function, &[])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| self.failure(function, "no return value"))
    }

    /// Read an `address` accessor.
    pub async fn read_address<C: ChainClient>(
        &self,
        client: &C,
        function: &str,
    ) -> Result<Address, VerificationError> {
        match self.read_one(client, function).await? {
            DynSolValue::Address(address) => Ok(address),
            other => Err(self.failure(function, format!("expected address, got {other:?}"))),
        }
    }

    /// Read a version accessor and render it as text.
    ///
    /// Versions are implementation-defined, so strings, integers and
    /// fixed bytes are all accepted.
    pub async fn read_version<C: ChainClient>(
        &self,
        client: &C,
        function: &str,
    ) -> Result<String, VerificationError> {
        let value = self.read_one(client, function).await?;
        Ok(render_value(&value))
    }
}

/// Human-readable rendering of a decoded ABI value.
pub fn render_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::String(s) => s.clone(),
        DynSolValue::Uint(v, _) => v.to_string(),
        DynSolValue::Int(v, _) => v.to_string(),
        DynSolValue::Address(a) => a.to_string(),
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Bytes(b) => hex::encode_prefixed(b),
        DynSolValue::FixedBytes(word, size) => hex::encode_prefixed(&word[..*size]),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{SimulatedChain, registry_artifact};
    use alloy_core::primitives::U256;

    #[test]
    fn test_bind_is_local() {
        let artifact = registry_artifact("IdentityRegistryUpgradeable", "1.0.0");
        let proxy = Address::with_last_byte(9);
        let bound = bind("identity", artifact.abi.clone(), proxy);

        assert_eq!(bound.name(), "identity");
        assert_eq!(bound.address(), proxy);
        assert_eq!(bound.abi(), &artifact.abi);
    }

    #[test]
    fn test_calldata_picks_overload_by_arity() {
        let artifact = registry_artifact("ReputationRegistryUpgradeable", "1.0.0");
        let bound = bind("reputation", artifact.abi, Address::with_last_byte(9));

        let no_arg = bound.calldata("initialize", &[]).expect("no-arg overload");
        assert_eq!(no_arg.to_vec(), vec![0x81, 0x29, 0xfc, 0x1c]);

        let single = bound
            .calldata(
                "initialize",
                &[DynSolValue::Address(Address::with_last_byte(1))],
            )
            .expect("address overload");
        assert_eq!(&single[..4], &[0xc4, 0xd6, 0x6d, 0xe8]);
        assert_eq!(single.len(), 36);

        assert!(bound.calldata("missing", &[]).is_err());
    }

    #[tokio::test]
    async fn test_read_from_code_less_address_fails() {
        let chain = SimulatedChain::new();
        let artifact = registry_artifact("IdentityRegistryUpgradeable", "1.0.0");
        let bound = bind("identity", artifact.abi, Address::with_last_byte(0x77));

        let err = bound
            .read_version(&chain, "getVersion")
            .await
            .expect_err("no code at address");
        assert!(matches!(err, VerificationError::ReadCallFailure { .. }), "{err}");
    }

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(&DynSolValue::String("1.0.0".into())), "1.0.0");
        assert_eq!(render_value(&DynSolValue::Uint(U256::from(2), 256)), "2");
        assert_eq!(render_value(&DynSolValue::Bytes(vec![0xab])), "0xab");
    }
}
