use std::path::PathBuf;

use alloy_signer_local::PrivateKeySigner;
use clap::{Args, Parser, Subcommand};
use erc8004_deploy::{CONFIG_FILENAME, ConfigOverrides, Network};
use tracing::level_filters::LevelFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "erc8004")]
#[command(
    author,
    version,
    about = "Deploy the ERC-8004 registries behind upgradeable proxies"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(
        short,
        long,
        env = "ERC8004_VERBOSITY",
        default_value_t = LevelFilter::INFO,
        global = true
    )]
    pub verbosity: LevelFilter,

    /// Path to the configuration file.
    ///
    /// Missing files are fine: defaults and environment variables apply.
    #[arg(short, long, env = "ERC8004_CONFIG", default_value = CONFIG_FILENAME, global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy every contract of the plan, then verify the deployment.
    Deploy(DeployArgs),
    /// Re-run verification against a saved deployment. Sends no transactions.
    Verify(VerifyArgs),
    /// Write the default configuration file.
    Init(InitArgs),
}

/// Values that override the configuration file and environment.
#[derive(Args, Clone, Default)]
pub struct ConfigArgs {
    /// Target network.
    #[arg(short, long)]
    pub network: Option<Network>,

    /// JSON-RPC endpoint, required for networks without a public one.
    #[arg(long)]
    pub rpc_url: Option<Url>,

    /// Expected chain id, checked against the endpoint before deploying.
    #[arg(long)]
    pub chain_id: Option<u64>,

    /// Directory holding the compiled contract artifacts.
    #[arg(long)]
    pub artifacts_dir: Option<PathBuf>,
}

#[derive(Args)]
pub struct DeployArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Hex-encoded key of the deploying account.
    #[arg(long, env = "ERC8004_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: PrivateKeySigner,

    /// Where to save the deployment file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Deployment file written by a previous `deploy`.
    #[arg(short, long)]
    pub deployment: PathBuf,
}

#[derive(Args)]
pub struct InitArgs {
    /// Network to preset in the generated file.
    #[arg(short, long)]
    pub network: Option<Network>,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

impl ConfigArgs {
    pub fn overrides(&self, output: Option<PathBuf>) -> ConfigOverrides {
        ConfigOverrides {
            network: self.network,
            rpc_url: self.rpc_url.clone(),
            chain_id: self.chain_id,
            artifacts_dir: self.artifacts_dir.clone(),
            output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_deploy() {
        let cli = Cli::try_parse_from([
            "erc8004",
            "deploy",
            "--network",
            "taiko-mainnet",
            "--private-key",
            "0x0000000000000000000000000000000000000000000000000000000000000001",
            "--output",
            "deployments/mainnet.json",
        ])
        .expect("valid arguments");

        let Command::Deploy(args) = cli.command else {
            panic!("expected deploy");
        };
        assert_eq!(args.config.network, Some(Network::TaikoMainnet));
        let overrides = args.config.overrides(args.output);
        assert_eq!(overrides.output, Some(PathBuf::from("deployments/mainnet.json")));
        assert_eq!(cli.config, PathBuf::from(CONFIG_FILENAME));
    }

    #[test]
    fn test_parse_rejects_bad_private_key() {
        let result = Cli::try_parse_from(["erc8004", "deploy", "--private-key", "not-a-key"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_verify_with_global_flags() {
        let cli = Cli::try_parse_from([
            "erc8004",
            "verify",
            "--deployment",
            "out.json",
            "--rpc-url",
            "http://localhost:8545",
            "-v",
            "debug",
        ])
        .expect("valid arguments");

        assert_eq!(cli.verbosity, LevelFilter::DEBUG);
        let Command::Verify(args) = cli.command else {
            panic!("expected verify");
        };
        assert_eq!(args.deployment, PathBuf::from("out.json"));
        assert!(args.config.rpc_url.is_some());
    }
}
