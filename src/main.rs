use std::path::PathBuf;

use anyhow::{anyhow, bail};
use clap::Parser;
use tracing::{error, info, warn, Level};

use tagwire::control::{message_line, read_descriptors, write_stdout_line};
use tagwire::{ClientBuilder, EndpointConfig, Role, ServerBuilder};

/// Point-to-point TCP messaging endpoint.
///
/// As a client, reads the messages to send as JSON from stdin and prints each
/// response as a JSON line on stdout.
#[derive(Parser)]
#[command(name = "tagwire", version)]
struct Args {
    /// `server` or `client`; defaults to the config section's `type`
    role: Option<Role>,

    /// JSON configuration file keyed by endpoint name
    #[arg(long)]
    config: Option<PathBuf>,

    /// Section of the configuration file; defaults to the role name
    #[arg(long)]
    section: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Dispatcher size
    #[arg(long)]
    workers: Option<usize>,

    /// Listen backlog (server)
    #[arg(long)]
    backlog: Option<u32>,

    /// Register all five categories instead of REQUEST/RESPONSE
    #[arg(long, default_value_t = false)]
    extended: bool,

    /// -v for debug, -vv for trace
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    // stdout carries responses
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let config = load_config(&args)?;
    let role = args
        .role
        .or(config.role)
        .ok_or_else(|| anyhow!("no role given; pass `server` or `client`"))?;

    match role {
        Role::Server => run_server(config).await,
        Role::Client => run_client(config).await,
    }
}

fn load_config(args: &Args) -> anyhow::Result<EndpointConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let section = args
                .section
                .clone()
                .or_else(|| args.role.map(|r| r.to_string()))
                .ok_or_else(|| anyhow!("--section is required when no role is given"))?;
            EndpointConfig::load(path, &section)?
        }
        None => EndpointConfig::default(),
    };

    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(backlog) = args.backlog {
        config.backlog = backlog;
    }
    if args.extended {
        config = config.extended();
    }

    config.validate()?;
    Ok(config)
}

async fn run_server(config: EndpointConfig) -> anyhow::Result<()> {
    let server = ServerBuilder::from_config(&config)?.bind().await?;
    info!(addr = %server.local_addr(), "accepting connections, ctrl-c to stop");

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

async fn run_client(config: EndpointConfig) -> anyhow::Result<()> {
    let descriptors = read_descriptors(tokio::io::stdin()).await?;
    if descriptors.is_empty() {
        warn!("no messages on stdin, nothing to send");
        return Ok(());
    }

    let client = ClientBuilder::from_config(&config)?.connect().await?;
    let reports = client.send_all(&descriptors).await;

    let mut failed = 0;
    for report in &reports {
        match &report.outcome {
            Ok(Some(response)) => write_stdout_line(&message_line(response)?)?,
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "send failed");
                failed += 1;
            }
        }
    }

    client.close().await?;

    if failed > 0 {
        bail!("{} of {} messages failed", failed, reports.len());
    }
    Ok(())
}
