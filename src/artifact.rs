//! Compiled token contract bundle (ABI + creation bytecode)

use crate::error::{DeployerError, DeployerResult};

use ethers::abi::{Abi, Token};
use ethers::types::{Address, Bytes};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Contract interface and bytecode, loaded once at startup
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub contract_name: Option<String>,
    pub abi: Abi,
    pub bytecode: Bytes,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactFile {
    contract_name: Option<String>,
    abi: Abi,
    bytecode: BytecodeField,
}

/// Hardhat/Truffle store a hex string, Foundry nests it under `object`
#[derive(Deserialize)]
#[serde(untagged)]
enum BytecodeField {
    Hex(String),
    Object { object: String },
}

impl ContractArtifact {
    pub fn load(path: &Path) -> DeployerResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DeployerError::Config(format!("Failed to read artifact {:?}: {}", path, e))
        })?;
        let artifact = Self::from_json(&contents)?;

        info!(
            "Loaded contract artifact {} ({} bytes of bytecode)",
            artifact.contract_name.as_deref().unwrap_or("<unnamed>"),
            artifact.bytecode.len()
        );
        Ok(artifact)
    }

    pub fn from_json(contents: &str) -> DeployerResult<Self> {
        let file: ArtifactFile = serde_json::from_str(contents)
            .map_err(|e| DeployerError::Config(format!("Malformed contract artifact: {}", e)))?;

        let hex_code = match file.bytecode {
            BytecodeField::Hex(s) => s,
            BytecodeField::Object { object } => object,
        };
        let hex_code = hex_code.trim();
        let hex_code = hex_code.strip_prefix("0x").unwrap_or(hex_code);

        let bytecode = hex::decode(hex_code)
            .map_err(|e| DeployerError::Config(format!("Invalid artifact bytecode: {}", e)))?;
        if bytecode.is_empty() {
            return Err(DeployerError::Config(
                "Artifact bytecode is empty (abstract contract or interface?)".to_string(),
            ));
        }

        Ok(Self {
            contract_name: file.contract_name,
            abi: file.abi,
            bytecode: bytecode.into(),
        })
    }

    /// Creation bytecode with the ABI-encoded owner constructor argument
    pub fn deployment_data(&self, owner: Address) -> DeployerResult<Bytes> {
        let constructor = self.abi.constructor().ok_or_else(|| {
            DeployerError::Precondition(
                "Contract ABI has no constructor taking the owner address".to_string(),
            )
        })?;

        constructor
            .encode_input(self.bytecode.to_vec(), &[Token::Address(owner)])
            .map(Bytes::from)
            .map_err(|e| {
                DeployerError::Precondition(format!(
                    "Constructor does not accept a single owner address: {}",
                    e
                ))
            })
    }

    /// Calldata for `function(args...)`
    pub fn encode_call(&self, function: &str, args: &[Token]) -> DeployerResult<Bytes> {
        let f = self.abi.function(function).map_err(|_| {
            DeployerError::Precondition(format!("Contract ABI has no function {}", function))
        })?;

        f.encode_input(args).map(Bytes::from).map_err(|e| {
            DeployerError::Precondition(format!("Invalid arguments for {}: {}", function, e))
        })
    }
}
