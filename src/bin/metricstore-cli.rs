//! metricstore CLI Client
//!
//! Sends a single `put` or `get` to a metricstore server and prints the result.

use anyhow::{bail, Context};
use metricstore::Client;
use std::time::Duration;

const USAGE: &str = r#"
metricstore-cli - Command-line client for metricstore

USAGE:
    metricstore-cli [OPTIONS] put <KEY> <VALUE> [TIMESTAMP]
    metricstore-cli [OPTIONS] get <KEY|*>

OPTIONS:
    -h, --host <HOST>    Server host (default: 127.0.0.1)
    -p, --port <PORT>    Server port (default: 10001)
        --help           Print this help message
"#;

/// What the user asked for
enum Action {
    Put {
        key: String,
        value: f64,
        timestamp: Option<u64>,
    },
    Get {
        key: String,
    },
}

struct Args {
    host: String,
    port: u16,
    action: Action,
}

impl Args {
    /// Parse command-line arguments
    fn parse() -> anyhow::Result<Self> {
        let mut host = metricstore::DEFAULT_HOST.to_string();
        let mut port = metricstore::DEFAULT_PORT;
        let mut rest = Vec::new();

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--host" | "-h" => host = args.next().context("--host requires a value")?,
                "--port" | "-p" => {
                    port = args
                        .next()
                        .context("--port requires a value")?
                        .parse()
                        .context("invalid port number")?
                }
                "--help" => {
                    println!("{}", USAGE);
                    std::process::exit(0);
                }
                _ => rest.push(arg),
            }
        }

        let action = match rest.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
            ["put", key, value] | ["put", key, value, _] => Action::Put {
                key: key.to_string(),
                value: value.parse().context("invalid value")?,
                timestamp: match rest.get(3) {
                    Some(ts) => Some(ts.parse().context("invalid timestamp")?),
                    None => None,
                },
            },
            ["get", key] => Action::Get {
                key: key.to_string(),
            },
            _ => bail!("expected a put or get command{}", USAGE),
        };

        Ok(Self { host, port, action })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse()?;

    let mut client = Client::connect((args.host.as_str(), args.port), Some(Duration::from_secs(5)))
        .await
        .with_context(|| format!("connecting to {}:{}", args.host, args.port))?;

    match args.action {
        Action::Put {
            key,
            value,
            timestamp,
        } => {
            client.put(&key, value, timestamp).await?;
            println!("ok");
        }
        Action::Get { key } => {
            for (key, samples) in client.get(&key).await? {
                for (timestamp, value) in samples {
                    println!("{} {} {}", key, metricstore::protocol::format_value(value), timestamp);
                }
            }
        }
    }

    client.close().await?;
    Ok(())
}
