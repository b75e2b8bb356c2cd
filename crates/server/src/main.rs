//! Voice Bridge entry point
//!
//! Loads settings, then bridges one simulated call from `simulator.input_wav`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voice_bridge_agent::build_bridge;
use voice_bridge_config::{load_settings, Settings};
use voice_bridge_server::{init_metrics, simulate};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env} > config/default > defaults
    let env = std::env::var("VOICE_BRIDGE_ENV").ok();
    let config = match load_settings(env.as_deref()) {
        Ok(settings) => {
            // Tracing not yet initialized
            eprintln!(
                "Loaded configuration from files (env: {})",
                env.as_deref().unwrap_or("default")
            );
            settings
        },
        Err(e) => {
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Settings::default()
        },
    };

    init_tracing(&config);

    tracing::info!("Starting Voice Bridge v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        mode = ?config.bridge.mode,
        telephony_rate = config.bridge.telephony_sample_rate,
        frame_ms = config.bridge.frame_ms,
        config_path = env.as_deref().unwrap_or("default"),
        "Configuration loaded"
    );

    if init_metrics(&config.observability)? {
        tracing::info!(port = config.observability.metrics_port, "Metrics enabled");
    }

    let bridge = build_bridge(&config)?;
    let report = simulate(&config, bridge).await?;

    tracing::info!(
        frames_sent = report.frames_sent,
        frames_played = report.frames_played,
        turns = report.turns,
        inbound_overruns = report.inbound_overruns,
        "Call complete"
    );
    Ok(())
}

fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.observability.log_level;
        format!("voice_bridge={}", level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
