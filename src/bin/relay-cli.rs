use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Inspect a running gRPC relay through its admin endpoint", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8081")]
    url: String,

    /// Admin API key; omit when the relay runs without one
    #[arg(short, long, env = "RELAY_ADMIN_KEY")]
    key: Option<String>,

    /// Print raw JSON instead of a summary
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check relay status and routing mode
    Status,
    /// List resolved pools with their policy and backends
    Pools {
        /// Only show this service
        #[arg(short, long)]
        service: Option<String>,
    },
    /// Dump the in-process directory snapshots
    Services,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    if let Some(key) = &cli.key {
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {key}"))?);
    }

    let path = match &cli.command {
        Commands::Status => "status",
        Commands::Pools { .. } => "pools",
        Commands::Services => "services",
    };
    let res = client
        .get(format!("{}/admin/{path}", cli.url.trim_end_matches('/')))
        .headers(headers)
        .send()
        .await?;

    let Some(mut json) = read_json(res).await? else {
        std::process::exit(1);
    };
    if let (Commands::Pools { service: Some(service) }, Value::Array(pools)) = (&cli.command, &mut json) {
        pools.retain(|p| p["service"] == service.as_str());
    }

    match (&cli.command, cli.json) {
        (Commands::Pools { .. }, false) => print_pools(&json),
        _ => println!("{}", serde_json::to_string_pretty(&json)?),
    }
    Ok(())
}

/// One line per backend: service, policy, address, health, in-flight calls.
fn print_pools(pools: &Value) {
    let Some(pools) = pools.as_array() else {
        return;
    };
    if pools.is_empty() {
        println!("no pools dialed yet");
        return;
    }
    println!("{:<32} {:<22} {:<24} {:<10} {:>6}", "SERVICE", "POLICY", "ADDRESS", "HEALTH", "CALLS");
    for pool in pools {
        let backends = pool["backends"].as_array().map(Vec::as_slice).unwrap_or_default();
        if backends.is_empty() {
            println!("{:<32} {:<22} {:<24}", text(&pool["service"]), text(&pool["policy"]), "-");
        }
        for backend in backends {
            println!(
                "{:<32} {:<22} {:<24} {:<10} {:>6}",
                text(&pool["service"]),
                text(&pool["policy"]),
                text(&backend["addr"]),
                text(&backend["health"]),
                backend["active_calls"].as_u64().unwrap_or(0),
            );
        }
    }
}

fn text(value: &Value) -> &str {
    value.as_str().unwrap_or("?")
}

async fn read_json(res: reqwest::Response) -> Result<Option<Value>, Box<dyn std::error::Error>> {
    let code = res.status();
    if code.is_success() {
        return Ok(Some(res.json().await?));
    }
    let detail = res.text().await.unwrap_or_default();
    match code.as_u16() {
        401 => eprintln!("relay-cli: admin endpoint rejected the API key"),
        _ => eprintln!("relay-cli: admin endpoint answered {code}: {detail}"),
    }
    Ok(None)
}
