//! Egress CLI
//!
//! Checks destinations, fetches through the safe executor and sends single
//! webhook deliveries.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use egress::config::Config;
use egress::dns::DohResolver;
use egress::executor::{OutboundRequest, RequestOptions, SafeRequestExecutor};
use egress::fetch::SafeFetcher;
use egress::net::client_ip::client_ip;
use egress::services::webhook::{WebhookDeliveryService, WebhookTarget};
use egress::validate::Validator;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a URL and print the address it would be dialed at.
    Check {
        url: String,
    },

    /// GET a URL through the safe executor.
    Fetch {
        url: String,

        /// Request deadline in milliseconds (default: FETCH_TIMEOUT_MS).
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Maximum body bytes to print.
        #[arg(long, default_value = "65536")]
        max_bytes: usize,
    },

    /// Deliver one webhook event and print the delivery record as JSON.
    Deliver {
        url: String,

        /// Event name sent in X-Webhook-Event.
        #[arg(long)]
        event: String,

        /// JSON payload wrapped in the event envelope.
        #[arg(long, default_value = "{}")]
        payload: String,

        /// HMAC-SHA256 signing secret.
        #[arg(long)]
        secret: Option<String>,
    },

    /// Resolve the client IP from request headers using the trusted list.
    ClientIp {
        /// Header as `name: value`. Repeatable.
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    let resolver = DohResolver::new(config.doh_endpoint.clone(), config.doh_timeout)
        .context("failed to build DNS resolver")?;
    let validator = Validator::new(Arc::new(resolver))
        .with_restricted_hostnames(&config.restricted_hostnames);
    let executor = SafeRequestExecutor::reqwest().context("failed to build HTTP client")?;

    match args.command {
        Command::Check { url } => {
            let destination = validator.validate_resolved(&url).await?;
            println!(
                "allowed: {} -> {}",
                destination.original_url(),
                destination.ip_host()
            );
        }

        Command::Fetch {
            url,
            timeout_ms,
            max_bytes,
        } => {
            let timeout = timeout_ms.map_or(config.fetch_timeout, Duration::from_millis);
            let fetcher = SafeFetcher::new(validator, executor).default_timeout(timeout);

            let mut response = fetcher
                .fetch(&url, OutboundRequest::get(), RequestOptions::with_timeout(timeout))
                .await?;
            println!("HTTP {}", response.status());

            let mut body = Vec::new();
            response
                .read_capped(max_bytes, &mut body)
                .await
                .context("failed to read response body")?;
            println!("{}", String::from_utf8_lossy(&body));
        }

        Command::Deliver {
            url,
            event,
            payload,
            secret,
        } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("--payload must be valid JSON")?;

            let mut target = WebhookTarget::new(url);
            target.events = vec![event.clone()];
            target.secret = secret;

            let service = WebhookDeliveryService::new(validator, executor)
                .with_user_agent(&config.webhook_user_agent)
                .context("WEBHOOK_USER_AGENT is not a valid header value")?;

            let attempts = service.dispatch(&[target], &event, &payload).await;
            let attempt = attempts
                .first()
                .context("delivery did not complete")?;

            println!("{}", serde_json::to_string_pretty(&attempt.to_record())?);
            if !attempt.result.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }

        Command::ClientIp { headers } => {
            let mut map = HeaderMap::new();
            for header in &headers {
                let (name, value) = header
                    .split_once(':')
                    .with_context(|| format!("header must be `name: value`: {header}"))?;
                map.append(
                    HeaderName::from_bytes(name.trim().as_bytes())
                        .with_context(|| format!("invalid header name: {name}"))?,
                    HeaderValue::from_str(value.trim())
                        .with_context(|| format!("invalid header value: {value}"))?,
                );
            }

            match client_ip(&map, &config.trusted_client_ip_headers) {
                Some(ip) => println!("{ip}"),
                None => {
                    info!(
                        trusted = ?config.trusted_client_ip_headers,
                        "no trusted header carried a client IP"
                    );
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,egress=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
