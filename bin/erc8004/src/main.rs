//! erc8004 deploys the ERC-8004 Identity, Reputation and Validation registries
//! behind upgradeable proxies.

mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Command, DeployArgs, InitArgs, VerifyArgs};
use erc8004_deploy::{
    ChainClient, DeployConfig, DeploymentFile, DeploymentOutcome, DeploymentSummary,
    HardhatArtifacts, NetworkConfig, Orchestrator, RpcChainClient, bind_proxies, render_table,
    verify_deployment,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr, stdout only carries the summary.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Deploy(args) => deploy(&cli.config, args).await,
        Command::Verify(args) => verify(&cli.config, args).await,
        Command::Init(args) => init(&cli.config, args),
    }
}

async fn deploy(config_path: &Path, args: DeployArgs) -> Result<()> {
    let config = DeployConfig::load(config_path, args.config.overrides(args.output))?;
    let plan = config.plan().context("Invalid deployment plan")?;
    let rpc_url = config.network.rpc_url()?;

    tracing::info!(
        network = %config.network.name,
        rpc_url = %rpc_url,
        artifacts_dir = %config.artifacts_dir.display(),
        contracts = plan.len(),
        "Deploying ERC-8004 registries"
    );

    let client = RpcChainClient::connect(rpc_url, args.private_key)
        .with_poll_interval(config.confirmation.poll_interval());
    let chain_id = check_chain_id(&client, &config.network).await?;
    let artifacts = HardhatArtifacts::new(&config.artifacts_dir);

    let outcome = Orchestrator::new(&client, &artifacts, plan.clone())
        .with_proxy_artifact(config.proxy_artifact.clone())
        .with_policy(config.confirmation)
        .run()
        .await;

    eprintln!(
        "{}",
        render_table(&plan, outcome.result(), outcome.verification())
    );

    // Saved even on abort: contracts already deployed must not be lost.
    if let Some(path) = &config.output {
        DeploymentFile::new(
            outcome.result(),
            config.network.name.to_string(),
            chain_id,
            client.sender(),
            outcome.is_completed(),
        )
        .save_to_file(path)?;
        tracing::info!(path = %path.display(), "Deployment saved");
    }

    match outcome {
        DeploymentOutcome::Completed {
            result,
            verification,
        } => {
            if !verification.is_clean() {
                tracing::warn!(
                    issues = verification.issues.len(),
                    "Contracts are deployed but failed verification"
                );
                eprintln!("{verification}");
            }
            println!("{}", DeploymentSummary::from(&result).to_json()?);
            Ok(())
        }
        DeploymentOutcome::Aborted { partial, error } => {
            if !partial.is_empty() {
                eprintln!(
                    "Already deployed:\n{}",
                    DeploymentSummary::from(&partial).to_json()?
                );
            }
            Err(anyhow::Error::new(error).context("Deployment aborted"))
        }
    }
}

async fn verify(config_path: &Path, args: VerifyArgs) -> Result<()> {
    let config = DeployConfig::load(config_path, args.config.overrides(None))?;
    let plan = config.plan().context("Invalid deployment plan")?;
    let deployment = DeploymentFile::load_from_file(&args.deployment)?;

    let client = RpcChainClient::read_only(config.network.rpc_url()?);
    let chain_id = check_chain_id(&client, &config.network).await?;
    if chain_id != deployment.chain_id {
        anyhow::bail!(
            "Deployment was made on chain {} but the endpoint reports chain {}",
            deployment.chain_id,
            chain_id
        );
    }

    let artifacts = HardhatArtifacts::new(&config.artifacts_dir);
    let result = deployment.result();
    let bound = bind_proxies(&plan, &artifacts, &result)?;
    let report = verify_deployment(&client, &plan, &bound, &result).await;

    eprintln!("{}", render_table(&plan, &result, Some(&report)));
    eprintln!("{report}");

    if !report.is_clean() {
        anyhow::bail!("Verification found {} issue(s)", report.issues.len());
    }
    Ok(())
}

fn init(config_path: &Path, args: InitArgs) -> Result<()> {
    if config_path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists, use --force to overwrite it",
            config_path.display()
        );
    }

    let mut config = DeployConfig::default();
    if let Some(network) = args.network {
        config.network.name = network;
    }
    config.save_to_file(config_path)
}

/// Refuse to continue when the endpoint is not on the configured chain.
async fn check_chain_id<C: ChainClient>(client: &C, network: &NetworkConfig) -> Result<u64> {
    let chain_id = client
        .chain_id()
        .await
        .context("Failed to query the endpoint's chain id")?;

    match network.expected_chain_id() {
        Some(expected) if expected != chain_id => anyhow::bail!(
            "Endpoint reports chain id {} but network {} expects {}",
            chain_id,
            network.name,
            expected
        ),
        Some(_) => tracing::info!(chain_id, "Chain id matches"),
        None => tracing::warn!(chain_id, "No expected chain id configured, skipping check"),
    }

    Ok(chain_id)
}
