use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;

mod app;
mod chat;
mod config;
mod handler;
mod logging;
mod ollama;
mod plain;
mod render;
mod scanner;
mod session;
mod source;
mod tui;
mod ui;

use app::App;
use chat::GenerationSettings;
use config::Config;
use logging::LoggingConfig;
use ollama::OllamaClient;
use tui::{EventHandler, TerminalGuard};
use ui::ThinkingView;

#[derive(Parser)]
#[command(name = "thinker-chat")]
#[command(version, about = "Chat with a local reasoning model, keeping its <think> output apart from the answer")]
struct Cli {
    /// Ollama model to use (remembered for next time)
    #[arg(long)]
    model: Option<String>,

    /// Maximum tokens to generate per response
    #[arg(short = 'm', long)]
    max_tokens: Option<u32>,

    /// Sampling temperature
    #[arg(long)]
    temp: Option<f32>,

    /// Random seed for generation
    #[arg(long)]
    seed: Option<u64>,

    /// Ollama server address
    #[arg(long)]
    host: Option<String>,

    /// How the reasoning region is shown
    #[arg(long, value_enum)]
    thinking: Option<ThinkingView>,

    /// Plain sequential output instead of the full-screen view
    #[arg(long)]
    plain: bool,

    /// Log level for the log file (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = logging::init_logging(LoggingConfig {
        level: cli.log_level,
        ..LoggingConfig::default()
    });

    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "could not read config, using defaults");
        Config::new()
    });

    let settings = GenerationSettings {
        model: cli
            .model
            .clone()
            .or_else(|| config.default_model.clone())
            .unwrap_or_else(|| config::DEFAULT_MODEL.to_string()),
        max_tokens: cli.max_tokens.or(config.max_tokens).unwrap_or(config::DEFAULT_MAX_TOKENS),
        temperature: cli.temp.or(config.temperature).unwrap_or(config::DEFAULT_TEMP),
        seed: cli.seed.or(config.seed).unwrap_or(config::DEFAULT_SEED),
    };
    let host = cli
        .host
        .clone()
        .or_else(|| config.host.clone())
        .unwrap_or_else(|| config::DEFAULT_HOST.to_string());
    let view = cli.thinking.or(config.thinking_view).unwrap_or_default();
    let frame = Duration::from_millis(config.frame_ms.unwrap_or(config::DEFAULT_FRAME_MS).max(1));

    tracing::info!(
        model = %settings.model,
        %host,
        max_tokens = settings.max_tokens,
        temperature = settings.temperature,
        seed = settings.seed,
        "starting"
    );

    // Fail before the screen is switched, so the message stays visible
    let client = OllamaClient::new(&host);
    let available = client
        .has_model(&settings.model)
        .await
        .with_context(|| format!("Could not reach Ollama at {}. Is `ollama serve` running?", host))?;
    if !available {
        bail!(
            "Model '{}' is not available. Pull it with `ollama pull {}`.",
            settings.model,
            settings.model
        );
    }

    if let Some(model) = &cli.model {
        if let Err(e) = Config::save_default_model(model) {
            tracing::warn!(error = %e, "could not save default model");
        }
    }

    if cli.plain {
        return plain::run(client, settings, view, None).await;
    }

    match TerminalGuard::acquire() {
        Ok(guard) => run_tui(guard, App::new(client, settings, view), frame).await,
        Err(reason) => plain::run(client, settings, view, Some(reason)).await,
    }
}

async fn run_tui(mut guard: TerminalGuard, mut app: App, frame: Duration) -> Result<()> {
    tui::install_panic_hook();

    let result = event_loop(&mut guard, &mut app, frame).await;

    if let Some(outcome) = app.session.shutdown().await {
        app.finish_turn(outcome);
    }
    let released = guard.release();

    if let Err(e) = &result {
        tracing::error!(error = %e, "chat ended with an error");
    }
    tracing::info!(turns = app.conversation.transcript.len(), "exiting");
    result.and(released)
}

async fn event_loop(guard: &mut TerminalGuard, app: &mut App, frame: Duration) -> Result<()> {
    let mut events = EventHandler::new(frame);
    let shutdown = tui::shutdown_signal();
    tokio::pin!(shutdown);

    while !app.should_quit {
        if app.should_draw() {
            guard.terminal().draw(|f| ui::render(app, f))?;
            app.mark_drawn();
        }

        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                app.should_quit = true;
            }
            event = events.next() => match event {
                Some(event) => handler::handle_event(app, event).await?,
                None => app.should_quit = true,
            },
            outcome = app.session.step(), if app.session.is_streaming() => {
                if let Some(outcome) = outcome {
                    app.finish_turn(outcome);
                }
            }
        }
    }

    Ok(())
}
