//! Configuration management for the token deployer
//!
//! Loads configuration from a TOML file with environment variable substitution.
//! Every `${VAR}` reference must resolve; a missing variable is a startup error.

use crate::fees::FeeTier;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub deployer: DeployerConfig,
    pub fee_oracle: FeeOracleConfig,
    pub chain: ChainConfig,
    pub wallet: WalletConfig,
    pub contract: ContractConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeployerConfig {
    #[serde(default = "default_fee_poll_interval_ms")]
    pub fee_poll_interval_ms: u64,
    #[serde(default = "default_tier_name")]
    pub default_tier: String,
    /// Upper bound on waiting for a receipt; unset waits until the network resolves
    pub confirmation_timeout_secs: Option<u64>,
    #[serde(default = "default_mint_function")]
    pub mint_function: String,
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeeOracleConfig {
    pub url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    /// JSON-RPC endpoint. Contains the access key, never log it.
    pub rpc_url: String,
    pub confirmation_blocks: Option<u64>,
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    #[serde(default = "default_dropped_after_polls")]
    pub dropped_after_polls: u32,
    #[serde(default = "default_gas_limit_buffer_percent")]
    pub gas_limit_buffer_percent: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractConfig {
    pub artifact_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            fee_poll_interval_ms: default_fee_poll_interval_ms(),
            default_tier: default_tier_name(),
            confirmation_timeout_secs: None,
            mint_function: default_mint_function(),
            token_decimals: default_token_decimals(),
        }
    }
}

fn default_fee_poll_interval_ms() -> u64 {
    30_000
}

fn default_tier_name() -> String {
    "standard".to_string()
}

fn default_mint_function() -> String {
    "mint".to_string()
}

fn default_token_decimals() -> u32 {
    18
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_receipt_poll_interval_ms() -> u64 {
    1_000
}

fn default_dropped_after_polls() -> u32 {
    120
}

fn default_gas_limit_buffer_percent() -> u64 {
    20
}

fn default_private_key_env() -> String {
    "ACCOUNT_PRIVATE_KEY".to_string()
}

fn default_log_filter() -> String {
    "info,token_deployer=debug,hyper=warn,reqwest=warn".to_string()
}

impl Settings {
    /// Load settings from the configuration file
    pub fn load() -> Result<Self> {
        let config_path = env::var("TOKEN_DEPLOYER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config_str = substitute_env_vars(input)?;

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.deployer.fee_poll_interval_ms == 0 {
            anyhow::bail!("deployer.fee_poll_interval_ms must be greater than zero");
        }
        if self.chain.receipt_poll_interval_ms == 0 {
            anyhow::bail!("chain.receipt_poll_interval_ms must be greater than zero");
        }
        if self.chain.rpc_url.trim().is_empty() {
            anyhow::bail!("chain.rpc_url is empty");
        }
        if self.fee_oracle.url.trim().is_empty() {
            anyhow::bail!("fee_oracle.url is empty");
        }
        if self.wallet.private_key_env.trim().is_empty() {
            anyhow::bail!("wallet.private_key_env is empty");
        }
        if self.deployer.mint_function.trim().is_empty() {
            anyhow::bail!("deployer.mint_function is empty");
        }

        self.deployer
            .default_tier
            .parse::<FeeTier>()
            .with_context(|| "Invalid deployer.default_tier")?;

        Ok(())
    }
}

impl DeployerConfig {
    pub fn default_tier(&self) -> FeeTier {
        FeeTier::from_name_lossy(&self.default_tier)
    }

    pub fn fee_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fee_poll_interval_ms)
    }

    pub fn confirmation_timeout(&self) -> Option<Duration> {
        self.confirmation_timeout_secs.map(Duration::from_secs)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}.
/// Full-line comments are left untouched. Fails listing every referenced
/// variable that is not set.
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")?;
    let mut missing = Vec::new();

    let lines: Vec<String> = input
        .lines()
        .map(|line| {
            if line.trim_start().starts_with('#') {
                return line.to_string();
            }
            re.replace_all(line, |cap: &regex::Captures| match env::var(&cap[1]) {
                Ok(value) => value,
                Err(_) => {
                    missing.push(cap[1].to_string());
                    String::new()
                }
            })
            .into_owned()
        })
        .collect();

    if !missing.is_empty() {
        missing.sort();
        missing.dedup();
        anyhow::bail!(
            "Missing required environment variables: {}",
            missing.join(", ")
        );
    }

    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [deployer]
        fee_poll_interval_ms = 30000
        default_tier = "fast"
        confirmation_timeout_secs = 600

        [fee_oracle]
        url = "https://gasstation.polygon.technology/amoy"

        [chain]
        chain_id = 80002
        name = "polygon-amoy"
        rpc_url = "https://polygon-amoy.infura.io/v3/${TD_TEST_ACCESS_KEY}"
        confirmation_blocks = 1

        [wallet]
        private_key_env = "ACCOUNT_PRIVATE_KEY"

        [contract]
        artifact_path = "contracts/MyToken.json"

        [api]
        host = "127.0.0.1"
        port = 8080

        [metrics]
        enabled = false
        port = 9090
    "#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TD_TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TD_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_missing_env_var_is_an_error() {
        env::remove_var("TD_TEST_UNSET_VAR");
        let err = substitute_env_vars("key = \"${TD_TEST_UNSET_VAR}\"").unwrap_err();
        assert!(err.to_string().contains("TD_TEST_UNSET_VAR"));
    }

    #[test]
    fn test_commented_placeholders_ignored() {
        env::set_var("TD_TEST_VAR", "test_value");
        env::remove_var("TD_TEST_COMMENTED_VAR");
        let input = "# url = \"${TD_TEST_COMMENTED_VAR}\"\nurl = \"${TD_TEST_VAR}\"";
        let result = substitute_env_vars(input).unwrap();
        assert!(result.ends_with("url = \"test_value\""));
    }

    #[test]
    fn test_missing_env_vars_listed_once() {
        env::remove_var("TD_TEST_MISSING_A");
        env::remove_var("TD_TEST_MISSING_B");
        let input = "a = \"${TD_TEST_MISSING_B}\"\nb = \"${TD_TEST_MISSING_A}\"\nc = \"${TD_TEST_MISSING_B}\"";
        let err = substitute_env_vars(input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing required environment variables: TD_TEST_MISSING_A, TD_TEST_MISSING_B"
        );
    }

    #[test]
    fn test_sample_settings_parse() {
        env::set_var("TD_TEST_ACCESS_KEY", "abc123");
        let settings = Settings::from_toml_str(SAMPLE).unwrap();

        assert_eq!(settings.chain.chain_id, 80002);
        assert!(settings.chain.rpc_url.ends_with("/abc123"));
        assert_eq!(settings.deployer.default_tier(), FeeTier::Fast);
        assert_eq!(settings.deployer.mint_function, "mint");
        assert_eq!(settings.deployer.token_decimals, 18);
        assert_eq!(
            settings.deployer.confirmation_timeout(),
            Some(Duration::from_secs(600))
        );
        assert_eq!(settings.chain.receipt_poll_interval_ms, 1_000);
        assert_eq!(settings.chain.gas_limit_buffer_percent, 20);
        assert!(!settings.logging.json);
    }

    #[test]
    fn test_invalid_default_tier_rejected() {
        env::set_var("TD_TEST_ACCESS_KEY", "abc123");
        let input = SAMPLE.replace("default_tier = \"fast\"", "default_tier = \"turbo\"");
        assert!(Settings::from_toml_str(&input).is_err());
    }

    #[test]
    fn test_bundled_config_parses() {
        env::set_var("RPC_ACCESS_KEY", "bundled-key");
        let settings = Settings::from_toml_str(include_str!("../config/default.toml")).unwrap();

        assert_eq!(settings.chain.confirmation_blocks, Some(1));
        assert_eq!(settings.deployer.default_tier(), FeeTier::Standard);
        assert_eq!(settings.wallet.private_key_env, "ACCOUNT_PRIVATE_KEY");
    }
}
