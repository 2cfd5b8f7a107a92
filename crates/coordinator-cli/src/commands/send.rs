use clap::Args;

use crate::client::{Client, ExitCode};
use crate::config::Connection;

#[derive(Debug, Args)]
pub struct SendArgs {
    #[command(flatten)]
    pub conn: Connection,

    /// Recipient agent id.
    #[arg(long)]
    pub to: String,

    /// Message body.
    pub message: String,

    /// Optional free-form context.
    #[arg(long)]
    pub context: Option<String>,
}

pub async fn run(args: SendArgs) -> ExitCode {
    let client = Client::new(args.conn);
    let body = serde_json::json!({
        "to": args.to,
        "message": args.message,
        "context": args.context,
    });

    match client.call("send_message", body).await {
        Ok(message) => {
            println!("{}", serde_json::to_string_pretty(&message).unwrap_or_default());
            ExitCode::Success
        }
        Err((code, message)) => {
            eprintln!("error: {message}");
            code
        }
    }
}
