//! armsweep: tear down Azure VMs and everything they own
//!
//! Deletes a VM, its NICs and public IPs, its disk storage, and the resource
//! group once nothing is left in it.

use anyhow::{Context, Result};
use armsweep::arm::{ArmClient, ArmContext, FromArmContext, classify_anyhow_error};
use armsweep::config::{ArmConfig, RunConfig, TeardownConfig};
use armsweep::storage::BlobClientFactory;
use armsweep::teardown::ResourceTeardown;
use armsweep::wait::WaitConfig;
use armsweep_common::RegionAndId;
use armsweep_common::defaults::{
    DEFAULT_ARM_ENDPOINT, DEFAULT_DELETE_TIMEOUT_SECS, DEFAULT_GROUP_PREFIX,
};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "armsweep")]
#[command(about = "Tear down Azure Resource Manager virtual machines and their resources")]
#[command(version)]
struct Args {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Command,
}

/// Connection and teardown options shared by every command
#[derive(clap::Args, Debug)]
struct ConnectionArgs {
    /// Subscription owning the resource groups
    #[arg(long, env = "AZURE_SUBSCRIPTION_ID", global = true)]
    subscription_id: Option<String>,

    /// Bearer token for the management endpoint
    #[arg(long, env = "AZURE_ACCESS_TOKEN", global = true, hide_env_values = true)]
    access_token: Option<String>,

    /// ARM management endpoint
    #[arg(long, default_value = DEFAULT_ARM_ENDPOINT, global = true)]
    endpoint: String,

    /// Resource groups are named `{prefix}-{region}`
    #[arg(long, env = "ARMSWEEP_GROUP_PREFIX", default_value = DEFAULT_GROUP_PREFIX, global = true)]
    group_prefix: String,

    /// Seconds to wait for each deletion to complete
    #[arg(long, default_value_t = DEFAULT_DELETE_TIMEOUT_SECS, global = true)]
    delete_timeout: u64,
}

impl From<ConnectionArgs> for RunConfig {
    fn from(args: ConnectionArgs) -> Self {
        Self {
            arm: ArmConfig {
                endpoint: args.endpoint,
                subscription_id: args.subscription_id.unwrap_or_default(),
                access_token: args.access_token.unwrap_or_default(),
                ..Default::default()
            },
            teardown: TeardownConfig {
                group_prefix: args.group_prefix,
                wait: WaitConfig::default().with_timeout(Duration::from_secs(args.delete_timeout)),
                ..Default::default()
            },
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Destroy a VM and the resources it owns
    Destroy {
        /// Slash-encoded id, e.g. "eastus/vm1"
        id: RegionAndId,
    },

    /// Delete the region's resource group if nothing tracked is left in it
    DeleteGroupIfEmpty {
        /// Region whose resource group should be checked
        region: String,
    },

    /// Print the slash-encoded id of a VM
    Encode { region: String, id: String },
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            print_error(&e);
            std::process::exit(2);
        }
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if let Some(suggestion) = classify_anyhow_error(e).and_then(|err| err.suggestion()) {
        let _ = writeln!(stderr, "\n\x1b[36mHint:\x1b[0m {suggestion}");
    }
}

async fn run() -> Result<bool> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    if let Command::Encode { region, id } = &args.command {
        let id = RegionAndId::new(region.as_str(), id.as_str())?;
        println!("{id}");
        return Ok(true);
    }

    let config: RunConfig = args.connection.into();
    let teardown = build_teardown(&config)?.with_cancellation(cancel_on_ctrl_c());

    match args.command {
        Command::Destroy { id } => {
            let deleted = teardown.teardown_id(&id).await?;
            if deleted {
                info!(resource = %id, "Destroyed");
            } else {
                warn!(resource = %id, "Virtual machine deletion failed");
            }
            Ok(deleted)
        }
        Command::DeleteGroupIfEmpty { region } => {
            let group = teardown.resource_group(&region);
            let deleted = teardown.delete_resource_group_if_empty(&group).await?;
            info!(group = %group, deleted, "Resource group check complete");
            Ok(true)
        }
        Command::Encode { .. } => Ok(true),
    }
}

fn build_teardown(config: &RunConfig) -> Result<ResourceTeardown<ArmClient, BlobClientFactory>> {
    let arm = ArmContext::new(&config.arm).context(
        "ARM credentials missing: set --subscription-id/AZURE_SUBSCRIPTION_ID and \
         --access-token/AZURE_ACCESS_TOKEN",
    )?;
    info!(endpoint = %arm.endpoint(), subscription = %arm.subscription_id(), "Connected");

    Ok(ResourceTeardown::new(
        ArmClient::from_context(&arm),
        BlobClientFactory::from_context(&arm),
        config.teardown.clone(),
    ))
}

/// Token cancelled on the first Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling pending waits");
            child.cancel();
        }
    });
    token
}
