use clap::{Parser, Subcommand};

use coordinator_cli::commands::{ack, peek, register, send, wait};

#[derive(Parser)]
#[command(name = "coordinator-ctl", version, about = "Command-line client for the coordinator broker.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register this machine/project as an agent.
    Register(register::RegisterArgs),
    /// Peek (or drain) an agent's inbox.
    Peek(peek::PeekArgs),
    /// Send a message to another agent.
    Send(send::SendArgs),
    /// Block until a message or a specific reply arrives.
    Wait(wait::WaitArgs),
    /// Acknowledge processed messages.
    Ack(ack::AckArgs),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Command::Register(args) => register::run(args).await,
        Command::Peek(args) => peek::run(args).await,
        Command::Send(args) => send::run(args).await,
        Command::Wait(args) => wait::run(args).await,
        Command::Ack(args) => ack::run(args).await,
    };

    std::process::exit(code as i32);
}
