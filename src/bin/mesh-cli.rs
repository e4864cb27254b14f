use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "mesh-cli")]
#[command(about = "Management CLI for the mesh control plane", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "MESH_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check control plane status
    Status,
    /// Show probed health, optionally for one service
    Health { service: Option<String> },
    /// Show the current routing table
    Routing,
    /// Show load balancing stats for a service
    Stats { service: String },
    /// List probe circuit breakers
    Breakers,
    /// Ask the load balancer for an instance
    Select {
        service: String,
        #[arg(long)]
        session: Option<String>,
    },
    /// Report a completed request
    Report {
        service_id: String,
        #[arg(long)]
        failed: bool,
        #[arg(long, default_value_t = 0.0)]
        response_time_ms: f64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::Health { service: None } => client.get(format!("{}/admin/health", base)),
        Commands::Health { service: Some(s) } => client.get(format!("{}/admin/health/{}", base, s)),
        Commands::Routing => client.get(format!("{}/admin/routing", base)),
        Commands::Stats { service } => client.get(format!("{}/admin/stats/{}", base, service)),
        Commands::Breakers => client.get(format!("{}/admin/breakers", base)),
        Commands::Select { service, session } => client
            .post(format!("{}/admin/select/{}", base, service))
            .json(&json!({ "session_id": session })),
        Commands::Report {
            service_id,
            failed,
            response_time_ms,
        } => client.post(format!("{}/admin/results", base)).json(&json!({
            "service_id": service_id,
            "success": !failed,
            "response_time_ms": response_time_ms,
        })),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            if !text.is_empty() {
                eprintln!("Details: {}", text);
            }
        }
        std::process::exit(1);
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
