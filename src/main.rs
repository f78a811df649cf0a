use clap::{Args, Parser, Subcommand};
use edubit_core::{BlockVerifier, HonestVerifier, SelfishVerifier, Transaction, TxOutput};
use shared::{KeyHash, KeyPair};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};

mod coordinator;
mod miner;
mod wire;

use coordinator::{Coordinator, RoundOutcome};
use miner::MinerNode;

#[derive(Parser)]
#[command(name = "edubit")]
#[command(about = "EduBit - Blockchain educacional com coordenador central e mineradores PoW")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inicia o coordenador e o console de comandos
    Coordinator(CoordinatorArgs),
    /// Inicia um nó minerador conectado ao coordenador
    Miner(MinerArgs),
}

#[derive(Args)]
struct CoordinatorArgs {
    /// Porta TCP de escuta
    #[arg(short, long, default_value_t = wire::DEFAULT_PORT)]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Args)]
struct MinerArgs {
    /// Endereço do coordenador (HOST:PORTA)
    #[arg(short, long, default_value = "127.0.0.1:65432")]
    coordinator: String,

    /// Estratégia egoísta: vota não em todo bloco alheio
    #[arg(long)]
    selfish: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> shared::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Coordinator(args) => run_coordinator(args).await,
        Commands::Miner(args) => run_miner(args).await,
    }
}

fn init_logging(log_level: &str) {
    let level = match log_level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    tracing_subscriber::fmt().with_max_level(level).init();
}

async fn run_miner(args: MinerArgs) -> shared::Result<()> {
    init_logging(&args.log_level);

    let keypair = KeyPair::generate();
    let verifier: Box<dyn BlockVerifier> = if args.selfish {
        Box::new(SelfishVerifier)
    } else {
        Box::new(HonestVerifier)
    };

    info!(
        "⛏️ minerador iniciado ({}); carteira {}",
        if args.selfish { "egoísta" } else { "honesto" },
        keypair.keyhash()
    );

    let (node, solutions) = MinerNode::new(keypair, verifier)?;
    node.run(args.coordinator, solutions).await
}

async fn run_coordinator(args: CoordinatorArgs) -> shared::Result<()> {
    init_logging(&args.log_level);

    let (coordinator, _addr) = Coordinator::bind(args.port).await?;
    console(coordinator).await
}

const CONSOLE_USAGE: &str = "comandos: mine | tx <dados> | pay <destino> <valor> [taxa] | \
     balance <keyhash> | integrity | chain | keys | quit";

/// Console de comandos do coordenador. Fino de propósito: só traduz
/// linhas digitadas em chamadas às operações públicas.
async fn console(coordinator: Coordinator) -> shared::Result<()> {
    println!("{CONSOLE_USAGE}");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["mine"] => match coordinator.mine().await {
                Ok(RoundOutcome::Accepted(block)) => {
                    println!("bloco aceito: {}", block.hash());
                }
                Ok(RoundOutcome::NoConsensus) => {
                    println!("nenhum bloco minerado nesta rodada");
                }
                Err(e) => println!("erro: {e}"),
            },
            ["tx", payload @ ..] if !payload.is_empty() => {
                let tx = Transaction::new(
                    vec![],
                    vec![TxOutput::data(payload.join(" "), KeyHash::zero())],
                );
                coordinator.submit_transaction(tx);
                println!("transação enviada aos mineradores");
            }
            ["pay", to, amount] => pay(&coordinator, to, amount, "0"),
            ["pay", to, amount, fee] => pay(&coordinator, to, amount, fee),
            ["balance", keyhash] => match keyhash.parse::<KeyHash>() {
                Ok(keyhash) => println!(
                    "saldo de {keyhash}: {} satoshis",
                    coordinator.balance(&keyhash)
                ),
                Err(e) => println!("erro: {e}"),
            },
            ["integrity"] => {
                coordinator.integrity();
                println!("verificação de integridade disparada");
            }
            ["chain"] => {
                let stats = coordinator.stats();
                println!(
                    "altura {}: {} blocos, {} transações, {} UTXOs ({} mineradores conectados)",
                    stats.height,
                    stats.total_blocks,
                    stats.total_transactions,
                    stats.total_utxos,
                    coordinator.miner_count()
                );
                for (index, block) in coordinator.chain_snapshot().iter().enumerate() {
                    println!(
                        "  #{index} {} ({} transações)",
                        block.hash(),
                        block.transactions.len()
                    );
                }
            }
            ["keys"] => {
                coordinator.request_keys();
                // As respostas chegam de forma assíncrona
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                for (id, (_private, public)) in coordinator.keys_snapshot() {
                    println!("  {id}: pub {}...", &public[..public.len().min(16)]);
                }
            }
            ["quit"] | ["exit"] => {
                coordinator.shutdown();
                break;
            }
            [] => {}
            _ => println!("{CONSOLE_USAGE}"),
        }
    }

    Ok(())
}

/// Traduz o comando `pay` em um pagamento montado sobre as carteiras
/// coletadas e o envia aos mineradores
fn pay(coordinator: &Coordinator, to: &str, amount: &str, fee: &str) {
    let (Ok(to), Ok(amount), Ok(fee)) = (
        to.parse::<KeyHash>(),
        amount.parse::<u64>(),
        fee.parse::<u64>(),
    ) else {
        println!("uso: pay <keyhash-destino> <valor> [taxa]");
        return;
    };

    match coordinator.build_payment(to, amount, fee) {
        Ok(tx) => {
            coordinator.submit_transaction(tx);
            println!("pagamento enviado aos mineradores");
        }
        Err(e) => println!("erro: {e}"),
    }
}
