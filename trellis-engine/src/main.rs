//! trellis-demo - run one request through the sample application
//!
//! ```text
//! trellis-demo --uri /users/register \
//!     --param user.name=Ada --param user.age=36 \
//!     --param user.address.street="1 Analytical Way" --param accept_terms=yes
//! ```

mod app;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trellis_engine::recovery::StatusFailureHandler;
use trellis_engine::{
    BufferedResponse, Engine, EngineConfig, FailureClass, Parameters, Request, Response,
};

#[derive(Parser, Debug)]
#[command(name = "trellis-demo")]
#[command(about = "Run one request through the Trellis sample application")]
#[command(version)]
struct Args {
    /// Engine configuration file (takes precedence over TRELLIS_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Request method
    #[arg(short, long, default_value = "POST")]
    method: String,

    /// Request URI
    #[arg(short, long, default_value = "/users/register")]
    uri: String,

    /// Request parameter as name=value (repeatable)
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(long, env = "TRELLIS_LOG")]
    log_level: Option<String>,
}

fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = EngineConfig::resolve(args.config.as_deref())
        .context("Failed to load engine configuration")?;

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level)),
        )
        .init();

    info!("Starting trellis-demo v{}", env!("CARGO_PKG_VERSION"));

    let mut builder = Engine::builder(config)
        .routes(Arc::new(app::routes()))
        .renderer(Arc::new(app::TextRenderer))
        .access_policy(Arc::new(app::TokenPolicy::new("letmein")))
        .failure_handler(
            FailureClass::new("registration"),
            Arc::new(StatusFailureHandler::new("input", 422)),
        );
    for descriptor in app::types() {
        builder = builder.register_type(descriptor);
    }
    let engine = builder.build().context("Failed to assemble engine")?;

    let parameters: Parameters = args.params.into_iter().collect();
    let request = Request::new(args.method, args.uri).with_parameters(parameters);

    let exchange = engine
        .handle(request, Box::new(BufferedResponse::new()))
        .context("Request could not be recovered")?;

    if !exchange.binding.is_clean() {
        warn!(
            failures = %exchange.binding.to_json()["failures"],
            "Request carried unbindable parameters"
        );
    }

    let response = exchange
        .response_as::<BufferedResponse>()
        .context("Response sink is not a buffered response")?;
    println!("HTTP {}", response.status());
    for (name, value) in response.headers() {
        println!("{}: {}", name, value);
    }
    println!();
    print!("{}", response.body());

    Ok(())
}
