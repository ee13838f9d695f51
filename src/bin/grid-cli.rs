use alloy::primitives::{Address, U256};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use microgrid_orchestrator::config::{load_config, GridConfig};
use microgrid_orchestrator::contracts::{
    ArtifactDir, ArtifactSource, ClientContext, GridClients, GridSetup, SetupPlan,
    DEVICE_REGISTRY, MICROGRID_EXCHANGE, OPERATORS_AGREEMENT,
};
use microgrid_orchestrator::ledger::{InMemoryLedger, LedgerClient, RpcLedger, TransactionReceipt};
use microgrid_orchestrator::observability::logging;
use microgrid_orchestrator::pipeline::{ClaimJournal, ClaimState};

#[derive(Parser)]
#[command(name = "grid-cli")]
#[command(about = "Administrative CLI for the microgrid marketplace contracts", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "grid.toml")]
    config: PathBuf,

    /// Run against a fresh in-process ledger with the contracts already set up.
    #[arg(long)]
    simulate: bool,

    /// Send from this account instead of the configured one.
    #[arg(long)]
    from: Option<Address>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the Device Registry CEO
    Owner,
    /// Show a meter's Device Registry record
    Device { address: Address },
    /// Deploy one contract
    Deploy { contract: String },
    /// Deploy and wire all contracts, then enrol the given accounts
    Setup {
        #[arg(long = "asset")]
        assets: Vec<Address>,
        #[arg(long = "producer")]
        producers: Vec<Address>,
        #[arg(long = "consumer")]
        consumers: Vec<Address>,
    },
    /// Point the Operators Agreement at an Exchange
    SetExchange { address: Address },
    /// Point the Exchange at an Operators Agreement
    SetOperatorsAgreement { address: Address },
    /// Whitelist an asset on the Exchange and the Operators Agreement
    Whitelist { address: Address },
    /// Grant the producer role
    DesignateProducer { address: Address },
    /// Grant the consumer role
    DesignateConsumer { address: Address },
    /// Hand the Device Registry to a new CEO
    TransferOwnership { address: Address },
    /// Report production to the Operators Agreement (sent by the asset)
    GenerateKwh { amount: U256 },
    /// Mint credits to an asset
    ApproveMint { asset: Address, amount: U256 },
    /// Show an account's credit balance
    Balance { address: Address },
    /// Dump the claim journal
    Claims {
        #[arg(long)]
        state: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = if cli.simulate && !cli.config.exists() {
        GridConfig::default()
    } else {
        load_config(&cli.config)?
    };
    logging::init_logging(&config.observability);

    if let Commands::Claims { state } = &cli.command {
        let path = config.pipeline.journal_path.as_deref().map(Path::new);
        let journal = ClaimJournal::open(path)?;
        let records: Vec<_> = [
            ClaimState::Observed,
            ClaimState::Validating,
            ClaimState::Approved,
            ClaimState::Rejected,
            ClaimState::Failed,
        ]
        .into_iter()
        .filter(|s| state.as_deref().map_or(true, |name| s.as_str() == name))
        .flat_map(|s| journal.in_state(s))
        .collect();
        return print_json(&records);
    }

    let (ledger, artifacts): (Arc<dyn LedgerClient>, Box<dyn ArtifactSource>) = if cli.simulate {
        (
            Arc::new(InMemoryLedger::new()) as Arc<dyn LedgerClient>,
            Box::new(InMemoryLedger::new()) as Box<dyn ArtifactSource>,
        )
    } else {
        (
            Arc::new(RpcLedger::new(config.ledger.clone()).await?) as Arc<dyn LedgerClient>,
            Box::new(ArtifactDir::new(&config.contracts.artifacts_dir)) as Box<dyn ArtifactSource>,
        )
    };

    let ctx = ClientContext::connect(ledger, &config).await?;

    let bootstrap = cli.simulate && !matches!(cli.command, Commands::Deploy { .. } | Commands::Setup { .. });
    let mut clients = if bootstrap {
        let (clients, _) = GridSetup::new(ctx.clone(), artifacts.as_ref())
            .run(&SetupPlan::default())
            .await?;
        clients
    } else {
        GridClients::from_config(ctx.clone(), &config.contracts)?
    };
    if let Some(from) = cli.from {
        clients = clients.acting_as(from);
    }

    match cli.command {
        Commands::Owner => {
            let ceo = clients.registry.owner_address().await?;
            println!("{}", ceo);
        }
        Commands::Device { address } => {
            let device = clients.registry.get_device(address).await?;
            print_json(&device)?;
        }
        Commands::Deploy { contract } => {
            let artifact = artifacts.load(&contract)?;
            let binding = match contract.as_str() {
                DEVICE_REGISTRY => clients.registry.deploy(&artifact).await?,
                MICROGRID_EXCHANGE => clients.exchange.deploy(&artifact).await?,
                OPERATORS_AGREEMENT => clients.operators.deploy(&artifact).await?,
                other => return Err(format!("unknown contract '{}'", other).into()),
            };
            println!("{} deployed at {}", binding.name, binding.address);
        }
        Commands::Setup {
            assets,
            producers,
            consumers,
        } => {
            let plan = SetupPlan {
                assets,
                producers,
                consumers,
            };
            let mut ctx = ctx;
            if let Some(from) = cli.from {
                ctx.sender = from;
            }
            match GridSetup::new(ctx, artifacts.as_ref()).run(&plan).await {
                Ok((_, steps)) => print_json(&steps)?,
                Err(e) => {
                    eprintln!("Completed before failure:");
                    print_json(&e.completed)?;
                    return Err(e.into());
                }
            }
        }
        Commands::SetExchange { address } => {
            print_receipt(&clients.operators.set_exchange_address(address).await?);
        }
        Commands::SetOperatorsAgreement { address } => {
            print_receipt(&clients.exchange.set_operators_agreement_address(address).await?);
        }
        Commands::Whitelist { address } => {
            print_receipt(&clients.exchange.whitelist_asset(address).await?);
            print_receipt(&clients.operators.whitelist_asset(address).await?);
        }
        Commands::DesignateProducer { address } => {
            print_receipt(&clients.registry.designate_producer(address).await?);
        }
        Commands::DesignateConsumer { address } => {
            print_receipt(&clients.registry.designate_consumer(address).await?);
        }
        Commands::TransferOwnership { address } => {
            print_receipt(&clients.registry.transfer_ownership(address).await?);
        }
        Commands::GenerateKwh { amount } => {
            print_receipt(&clients.operators.generate_kwh(amount).await?);
        }
        Commands::ApproveMint { asset, amount } => {
            print_receipt(&clients.exchange.approve_mint(asset, amount).await?);
        }
        Commands::Balance { address } => {
            println!("{}", clients.exchange.balance_of(address).await?);
        }
        Commands::Claims { .. } => {}
    }

    Ok(())
}

fn print_receipt(receipt: &TransactionReceipt) {
    println!(
        "{} {:?} block {}",
        receipt.tx_hash,
        receipt.status,
        receipt.block_number.map(|b| b.to_string()).unwrap_or_else(|| "-".to_string())
    );
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
