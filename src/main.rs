use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rhino_voice::{
    create_router, AppState, AudioHostFactory, Config, SessionConfig, SessionState,
    TransportFactory, VoiceSession,
};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rhino-voice")]
#[command(author, version, about = "Realtime voice sessions for RhinoBot", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (extension optional)
    #[arg(short, long, global = true, default_value = "config/rhino-voice")]
    config: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP control API
    Serve,
    /// Run a single session in the foreground, printing the transcript
    Talk {
        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(short, long)]
        duration: Option<u64>,

        /// Session ID (default: generated)
        #[arg(short, long)]
        session_id: Option<String>,

        /// Start muted
        #[arg(long)]
        muted: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // tokio-tungstenite brings rustls without picking a crypto provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("RhinoBot Voice v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    match cli.command {
        Commands::Serve => serve(cfg).await,
        Commands::Talk {
            duration,
            session_id,
            muted,
        } => talk(cfg, duration, session_id, muted).await,
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let audio_host = AudioHostFactory::create(&cfg.audio);
    let connector = TransportFactory::create(&cfg.transport)?;
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);

    let state = AppState::new(cfg, audio_host, connector);
    let app = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await
        .context("HTTP server failed")?;

    let sessions: Vec<_> = state.sessions.read().await.values().cloned().collect();
    for session in sessions {
        session.stop().await?;
    }

    info!("Stopped");
    Ok(())
}

async fn talk(
    cfg: Config,
    duration: Option<u64>,
    session_id: Option<String>,
    muted: bool,
) -> Result<()> {
    let session_id = session_id.unwrap_or_else(|| format!("voice-{}", uuid::Uuid::new_v4()));
    let session = VoiceSession::new(
        SessionConfig::from_config(session_id, &cfg),
        AudioHostFactory::create(&cfg.audio),
        TransportFactory::create(&cfg.transport)?,
    );
    session.set_muted(muted);

    let mut updates = session.subscribe_state();
    session.start().await.context("Failed to start session")?;

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut printed = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = &mut deadline => {
                info!("Duration elapsed");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();

                // Only the newest lines are kept, so print what arrived since last time
                let fresh = snapshot.stats.transcript_lines.saturating_sub(printed) as usize;
                let skip = snapshot.transcript.len().saturating_sub(fresh);
                for line in snapshot.transcript.iter().skip(skip) {
                    println!("{}", line);
                }
                printed = snapshot.stats.transcript_lines;

                if snapshot.state == SessionState::Idle {
                    if let Some(error) = &snapshot.stats.last_error {
                        warn!("Session ended: {}", error);
                    }
                    break;
                }
            }
        }
    }

    let stats = session.stop().await?;
    info!(
        "Session {} done: {} frames sent, {} audio frames played, {} interruptions",
        session.id(),
        stats.frames_sent,
        stats.audio_frames_scheduled,
        stats.interruptions
    );
    Ok(())
}
