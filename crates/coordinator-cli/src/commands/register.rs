use clap::Args;

use crate::client::{Client, ExitCode};
use crate::config::Connection;

#[derive(Debug, Args)]
pub struct RegisterArgs {
    #[command(flatten)]
    pub conn: Connection,

    /// Explicit agent name. Defaults to the server-derived `machine[/project]` id.
    #[arg(long)]
    pub name: Option<String>,

    /// Comma-separated capability tags.
    #[arg(long, value_delimiter = ',')]
    pub capabilities: Vec<String>,
}

pub async fn run(args: RegisterArgs) -> ExitCode {
    let client = Client::new(args.conn);
    let body = serde_json::json!({
        "name": args.name,
        "capabilities": if args.capabilities.is_empty() { None } else { Some(args.capabilities) },
    });

    match client.call("register_agent", body).await {
        Ok(agent) => {
            println!("{}", serde_json::to_string_pretty(&agent).unwrap_or_default());
            ExitCode::Success
        }
        Err((code, message)) => {
            eprintln!("error: {message}");
            code
        }
    }
}
