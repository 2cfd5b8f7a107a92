use clap::Args;

use crate::client::{Client, ExitCode};
use crate::config::Connection;

#[derive(Debug, Args)]
pub struct WaitArgs {
    #[command(flatten)]
    pub conn: Connection,

    /// Agent to wait on.
    #[arg(long)]
    pub agent_id: String,

    /// Max seconds to block.
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// If set, wait for the reply to this specific message id instead of
    /// any new inbox arrival.
    #[arg(long)]
    pub message_id: Option<String>,
}

pub async fn run(args: WaitArgs) -> ExitCode {
    let client = Client::new(args.conn);

    let (method, body) = match &args.message_id {
        Some(message_id) => (
            "wait_for_response",
            serde_json::json!({
                "agent_id": args.agent_id,
                "message_id": message_id,
                "timeout": args.timeout,
            }),
        ),
        None => (
            "wait_for_message",
            serde_json::json!({ "agent_id": args.agent_id, "timeout": args.timeout }),
        ),
    };

    match client.call(method, body).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
            ExitCode::Success
        }
        Err((code, message)) => {
            eprintln!("error: {message}");
            code
        }
    }
}
