use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ledger-cli")]
#[command(about = "CLI client for the proof-of-work ledger node")]
struct Cli {
    /// Node base URL (e.g. http://127.0.0.1:8080)
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the node is up
    Health,
    /// Print the full ledger
    Chain,
    /// Print transactions waiting for a block
    Pending,
    /// Submit a transaction
    Submit {
        /// Free-form transaction text, e.g. "Alice -> Bob : 5"
        tx: String,
    },
    /// Mine the pending transactions into a block (may take a while)
    Mine,
    /// Case-insensitive search over mined transactions
    Search {
        query: String,
    },
}

#[derive(Serialize)]
struct TxIn<'a> {
    tx: &'a str,
}

impl Command {
    fn request(&self, client: &reqwest::Client, node: &str) -> reqwest::RequestBuilder {
        match self {
            Command::Health => client.get(format!("{node}/health")),
            Command::Chain => client.get(format!("{node}/chain")),
            Command::Pending => client.get(format!("{node}/pending")),
            Command::Submit { tx } => client.post(format!("{node}/tx")).json(&TxIn { tx }),
            Command::Mine => client.post(format!("{node}/mine")),
            Command::Search { query } => client
                .get(format!("{node}/search"))
                .query(&[("q", query.as_str())]),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let node = cli.node.trim_end_matches('/');
    let client = reqwest::Client::new();
    debug!("sending {:?} to {node}", cli.cmd);

    let res = cli.cmd.request(&client, node).send().await?;
    let status = res.status();
    let body = res.text().await?;
    println!("status: {}", status);
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{body}"),
    }
    if !status.is_success() {
        anyhow::bail!("node returned {status}");
    }
    Ok(())
}
