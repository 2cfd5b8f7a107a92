use clap::Args;

use crate::client::{Client, ExitCode};
use crate::config::Connection;

#[derive(Debug, Args)]
pub struct PeekArgs {
    #[command(flatten)]
    pub conn: Connection,

    /// Agent whose inbox to inspect.
    #[arg(long)]
    pub agent_id: String,

    /// Drain instead of peek (removes acked/expired entries on the way out).
    #[arg(long)]
    pub drain: bool,
}

pub async fn run(args: PeekArgs) -> ExitCode {
    let client = Client::new(args.conn);
    let method = if args.drain { "get_messages" } else { "peek_messages" };
    let body = serde_json::json!({ "agent_id": args.agent_id });

    match client.call(method, body).await {
        Ok(messages) => {
            println!("{}", serde_json::to_string_pretty(&messages).unwrap_or_default());
            ExitCode::Success
        }
        Err((code, message)) => {
            eprintln!("error: {message}");
            code
        }
    }
}
