use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use sandbox_relay::{
    Agent, DEFAULT_MODEL, DEFAULT_PORT, EchoHandler, Options, PromptRequest, RelayClient, Server,
    ServerConfig, Workspace, protocol,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sandbox-relay", version, about = "Stream prompt results as NDJSON")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay server (the default).
    Serve(ServeArgs),
    /// Send a prompt to a running relay and print the event stream.
    Prompt(PromptArgs),
}

/// Serve settings for a bare invocation, read from the environment only.
#[derive(Parser)]
struct DefaultServe {
    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Args, Clone)]
struct ServeArgs {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Enable debug logging.
    #[arg(long, env = "DEBUG")]
    debug: bool,

    /// Seconds to wait for open streams on shutdown.
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = 5)]
    shutdown_grace_secs: u64,

    #[arg(long, env = "ANTHROPIC_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Directory the agent's file tools operate in.
    #[arg(long, env = "RELAY_WORKSPACE", default_value = ".")]
    workspace: PathBuf,
}

#[derive(Args)]
struct PromptArgs {
    #[arg(long, env = "RELAY_URL", default_value = "http://127.0.0.1:4001")]
    url: String,

    /// Options object passed through to the handler, as JSON.
    #[arg(long)]
    options: Option<String>,

    #[arg(long, env = "DEBUG")]
    debug: bool,

    prompt: String,
}

type MainResult = Result<(), Box<dyn Error + Send + Sync>>;

#[tokio::main]
async fn main() -> MainResult {
    dotenvy::dotenv().ok();
    let command = match Cli::parse().command {
        Some(command) => command,
        // Bare invocation serves, with settings from the environment.
        None => Command::Serve(DefaultServe::parse_from(["sandbox-relay"]).serve),
    };

    match command {
        Command::Prompt(args) => {
            init_logging(args.debug);
            send_prompt(args).await
        }
        Command::Serve(args) => {
            init_logging(args.debug);
            serve(args).await
        }
    }
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn serve(args: ServeArgs) -> MainResult {
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
    };

    let mut server = match std::env::var("ANTHROPIC_API_KEY") {
        Ok(api_key) => {
            let workspace = Workspace::new(args.workspace);
            tracing::info!(model = %args.model, workspace = %workspace.root().display(), "using Anthropic handler");
            Server::new(config, Agent::new(api_key, workspace).with_model(args.model))
        }
        Err(_) => {
            tracing::warn!("ANTHROPIC_API_KEY not set, serving the echo handler");
            Server::new(config, EchoHandler)
        }
    };

    server.start().await?;
    tokio::signal::ctrl_c().await?;
    tracing::info!("received shutdown signal");
    server.stop().await;
    Ok(())
}

async fn send_prompt(args: PromptArgs) -> MainResult {
    let options: Options = match args.options {
        Some(raw) => serde_json::from_str(&raw)?,
        None => Options::new(),
    };
    let request = PromptRequest::new(args.prompt).with_options(options);
    let client = RelayClient::new(&args.url);

    client
        .stream_prompt(&request, |event| {
            match protocol::to_line(&event) {
                Ok(line) => print!("{}", line),
                Err(err) => tracing::warn!(error = %err, "could not re-encode event"),
            }
            async {}
        })
        .await
}
