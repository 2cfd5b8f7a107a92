use clap::Args;

use crate::client::{Client, ExitCode};
use crate::config::Connection;

#[derive(Debug, Args)]
pub struct AckArgs {
    #[command(flatten)]
    pub conn: Connection,

    /// Agent whose inbox entries are being acknowledged.
    #[arg(long)]
    pub agent_id: String,

    /// Message ids to acknowledge.
    #[arg(required = true)]
    pub ids: Vec<String>,
}

pub async fn run(args: AckArgs) -> ExitCode {
    let client = Client::new(args.conn);
    let body = serde_json::json!({ "agent_id": args.agent_id, "ids": args.ids });

    match client.call("ack_messages", body).await {
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
