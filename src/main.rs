use std::{net::SocketAddr, path::PathBuf};

use chat_relay::{
    Decoder, RelayOptions, SegmentOrder,
    config::{self, RelayConfig, UpstreamConfig},
    errors::ConfigError,
    server::{AppState, build_router},
    upstream::OpenAiUpstream,
};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(version, about = "Relays streamed chat completions to browsers as server-sent events")]
struct Args {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:3000", env = "LISTEN_ADDR")]
    addr: SocketAddr,

    /// Provider credential, checked per request
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, default_value = config::DEFAULT_BASE_URL, env = "OPENAI_BASE_URL")]
    base_url: String,

    #[arg(long, default_value = config::DEFAULT_MODEL, env = "OPENAI_MODEL")]
    model: String,

    #[arg(long, default_value = config::DEFAULT_SYSTEM_PROMPT, env = "RELAY_SYSTEM_PROMPT")]
    system_prompt: String,

    /// File sent to the model as an extra system message
    #[arg(long, env = "RELAY_CONTEXT_FILE")]
    context_file: Option<PathBuf>,

    #[arg(long, default_value = config::DEFAULT_CONTEXT_LABEL, env = "RELAY_CONTEXT_LABEL")]
    context_label: String,

    #[arg(long, default_value_t = 0.2, env = "RELAY_TEMPERATURE")]
    temperature: f32,

    #[arg(long, default_value_t = 600, env = "RELAY_STREAM_MAX_TOKENS")]
    stream_max_tokens: u32,

    #[arg(long, default_value_t = 500, env = "RELAY_COMPLETE_MAX_TOKENS")]
    complete_max_tokens: u32,

    /// Seconds without upstream bytes before a relay gives up, 0 waits forever
    #[arg(long, default_value_t = 60, env = "RELAY_IDLE_TIMEOUT_SECS")]
    idle_timeout_secs: u64,

    /// content-first, reasoning-first or content-only
    #[arg(long, default_value_t = SegmentOrder::ContentFirst, env = "RELAY_SEGMENT_ORDER")]
    segment_order: SegmentOrder,

    /// Drop chunks that carry no text instead of relaying them raw
    #[arg(long, env = "RELAY_DROP_EMPTY_ENVELOPES")]
    drop_empty_envelopes: bool,

    /// Emit JSON log lines
    #[arg(long, env = "RELAY_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn into_config(self) -> Result<RelayConfig, ConfigError> {
        let mut upstream = UpstreamConfig {
            api_key: self.api_key,
            base_url: self.base_url,
            model: self.model,
            system_prompt: self.system_prompt,
            context: None,
            temperature: self.temperature,
            stream_max_tokens: self.stream_max_tokens,
            complete_max_tokens: self.complete_max_tokens,
        };
        if let Some(path) = &self.context_file {
            upstream.load_context(path, &self.context_label)?;
        }

        Ok(RelayConfig {
            upstream,
            relay: RelayOptions {
                decoder: Decoder::new(self.segment_order)
                    .drop_empty_envelopes(self.drop_empty_envelopes),
                idle_timeout: config::idle_timeout(self.idle_timeout_secs),
            },
        })
    }
}

fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing("chat_relay=info", args.log_json);

    let addr = args.addr;
    let config = args.into_config()?;
    if !config.upstream.has_credential() {
        tracing::warn!("OPENAI_API_KEY is not set, every request will fail");
    }

    info!(
        %addr,
        model = %config.upstream.model,
        base_url = %config.upstream.base_url,
        segment_order = %config.relay.decoder.order(),
        drop_empty_envelopes = config.relay.decoder.drops_empty_envelopes(),
        idle_timeout = ?config.relay.idle_timeout,
        context = config.upstream.context.is_some(),
        "starting chat-relay"
    );

    let app = build_router(AppState::new(
        OpenAiUpstream::new(config.upstream),
        config.relay,
    ));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
