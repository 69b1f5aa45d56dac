//! Compiled contract artifacts.
//!
//! Artifacts are produced by an external build step (Hardhat or Foundry) and
//! consumed here as opaque `{abi, bytecode}` pairs keyed by contract name.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use alloy_core::{json_abi::JsonAbi, primitives::Bytes};
use serde::Deserialize;

use crate::error::ArtifactError;

/// A compiled contract: its ABI and creation bytecode.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractArtifact {
    pub name: String,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
}

/// Source of compiled artifacts, keyed by contract name.
pub trait ArtifactProvider {
    fn artifact(&self, name: &str) -> Result<ContractArtifact, ArtifactError>;
}

/// Bytecode as emitted by Hardhat (plain hex string) or Foundry (`{ "object": ... }`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBytecode {
    Hex(String),
    Object { object: String },
}

impl RawBytecode {
    fn as_hex(&self) -> &str {
        match self {
            RawBytecode::Hex(s) => s,
            RawBytecode::Object { object } => object,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawArtifact {
    abi: JsonAbi,
    bytecode: RawBytecode,
}

/// Parse an artifact document.
pub fn parse_artifact(name: &str, content: &str) -> Result<ContractArtifact, ArtifactError> {
    let raw: RawArtifact = serde_json::from_str(content).map_err(|e| ArtifactError::Parse {
        name: name.to_string(),
        reason: e.to_string(),
    })?;

    let hex_code = raw.bytecode.as_hex();
    // Hardhat and solc mark unresolved library addresses as `__$<hash>$__`.
    if hex_code.contains("__") {
        return Err(ArtifactError::UnlinkedBytecode(name.to_string()));
    }

    let bytecode = hex::decode(hex_code.trim_start_matches("0x")).map_err(|e| {
        ArtifactError::Parse {
            name: name.to_string(),
            reason: format!("invalid bytecode hex: {e}"),
        }
    })?;
    if bytecode.is_empty() {
        return Err(ArtifactError::Parse {
            name: name.to_string(),
            reason: "empty bytecode (abstract contract or interface?)".to_string(),
        });
    }

    Ok(ContractArtifact {
        name: name.to_string(),
        abi: raw.abi,
        bytecode: bytecode.into(),
    })
}

/// Reads artifacts from a Hardhat `artifacts/` (or Foundry `out/`) directory.
///
/// A contract `Foo` is looked up as any `Foo.json` below the root, skipping
/// debug files and `build-info/`.
#[derive(Debug, Clone)]
pub struct HardhatArtifacts {
    root: PathBuf,
}

impl HardhatArtifacts {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn find(&self, name: &str) -> Result<PathBuf, ArtifactError> {
        let file_name = format!("{name}.json");
        let mut matches = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if dir == self.root => {
                    return Err(ArtifactError::Io {
                        name: name.to_string(),
                        source: e,
                    });
                }
                Err(e) => {
                    tracing::debug!(
                        dir = %dir.display(),
                        error = %e,
                        "Skipping unreadable directory"
                    );
                    continue;
                }
            };

            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    if path.file_name().is_some_and(|n| n == "build-info") {
                        continue;
                    }
                    pending.push(path);
                } else if path.file_name().is_some_and(|n| n == file_name.as_str()) {
                    matches.push(path);
                }
            }
        }

        match matches.len() {
            0 => Err(ArtifactError::NotFound(name.to_string())),
            1 => Ok(matches.remove(0)),
            _ => {
                matches.sort();
                Err(ArtifactError::Parse {
                    name: name.to_string(),
                    reason: format!("ambiguous artifact name, candidates: {matches:?}"),
                })
            }
        }
    }
}

impl ArtifactProvider for HardhatArtifacts {
    fn artifact(&self, name: &str) -> Result<ContractArtifact, ArtifactError> {
        let path = self.find(name)?;
        tracing::debug!(contract = %name, path = %path.display(), "Reading artifact");

        let content = std::fs::read_to_string(&path).map_err(|source| ArtifactError::Io {
            name: name.to_string(),
            source,
        })?;
        parse_artifact(name, &content)
    }
}

/// Map-backed artifact provider.
#[derive(Debug, Clone, Default)]
pub struct InMemoryArtifacts {
    artifacts: HashMap<String, ContractArtifact>,
}

impl InMemoryArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, artifact: ContractArtifact) {
        self.artifacts.insert(artifact.name.clone(), artifact);
    }

    pub fn with(mut self, artifact: ContractArtifact) -> Self {
        self.insert(artifact);
        self
    }
}

impl ArtifactProvider for InMemoryArtifacts {
    fn artifact(&self, name: &str) -> Result<ContractArtifact, ArtifactError> {
        self.artifacts
            .get(name)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    const HARDHAT_ARTIFACT: &str = r#"{
        "_format": "hh-sol-artifact-1",
        "contractName": "IdentityRegistryUpgradeable",
        "abi": [
            {"type": "function", "name": "getVersion", "inputs": [],
             "outputs": [{"name": "", "type": "string", "internalType": "string"}],
             "stateMutability": "pure"}
        ],
        "bytecode": "0x6080604052"
    }"#;

    const FOUNDRY_ARTIFACT: &str = r#"{
        "abi": [],
        "bytecode": {"object": "0x6080604052", "linkReferences": {}}
    }"#;

    #[test]
    fn test_parse_hardhat_artifact() {
        let artifact = parse_artifact("IdentityRegistryUpgradeable", HARDHAT_ARTIFACT)
            .expect("Hardhat artifact should parse");
        assert_eq!(artifact.bytecode.to_vec(), vec![0x60u8, 0x80, 0x60, 0x40, 0x52]);
        assert!(artifact.abi.function("getVersion").is_some());
    }

    #[test]
    fn test_parse_foundry_artifact() {
        let artifact =
            parse_artifact("Proxy", FOUNDRY_ARTIFACT).expect("Foundry artifact should parse");
        assert_eq!(artifact.bytecode.len(), 5);
    }

    #[test]
    fn test_parse_rejects_unlinked_bytecode() {
        let content = r#"{"abi": [], "bytecode": "0x6080__$0123456789abcdef0123456789abcdef01$__"}"#;
        assert!(matches!(
            parse_artifact("Linked", content),
            Err(ArtifactError::UnlinkedBytecode(_))
        ));
    }

    #[test]
    fn test_parse_rejects_empty_bytecode() {
        let content = r#"{"abi": [], "bytecode": "0x"}"#;
        assert!(matches!(
            parse_artifact("IFoo", content),
            Err(ArtifactError::Parse { .. })
        ));
    }

    #[test]
    fn test_hardhat_artifacts_lookup() {
        let temp_dir = TempDir::new("erc8004-artifacts").expect("Failed to create temp dir");
        let contract_dir = temp_dir
            .path()
            .join("contracts/IdentityRegistryUpgradeable.sol");
        std::fs::create_dir_all(&contract_dir).expect("Failed to create artifact dir");
        std::fs::write(
            contract_dir.join("IdentityRegistryUpgradeable.json"),
            HARDHAT_ARTIFACT,
        )
        .expect("Failed to write artifact");
        std::fs::write(
            contract_dir.join("IdentityRegistryUpgradeable.dbg.json"),
            "{}",
        )
        .expect("Failed to write debug file");

        let provider = HardhatArtifacts::new(temp_dir.path());
        let artifact = provider
            .artifact("IdentityRegistryUpgradeable")
            .expect("Artifact should be found");
        assert_eq!(artifact.name, "IdentityRegistryUpgradeable");

        assert!(matches!(
            provider.artifact("ReputationRegistryUpgradeable"),
            Err(ArtifactError::NotFound(name)) if name == "ReputationRegistryUpgradeable"
        ));
    }

    #[test]
    fn test_hardhat_artifacts_missing_root() {
        let provider = HardhatArtifacts::new("/nonexistent/erc8004/artifacts");
        assert!(matches!(
            provider.artifact("Anything"),
            Err(ArtifactError::Io { .. })
        ));
    }

    #[test]
    fn test_in_memory_artifacts() {
        let artifact = parse_artifact("Proxy", FOUNDRY_ARTIFACT).expect("Artifact should parse");
        let provider = InMemoryArtifacts::new().with(artifact.clone());
        assert_eq!(provider.artifact("Proxy").expect("present"), artifact);
        assert!(provider.artifact("Missing").is_err());
    }
}
