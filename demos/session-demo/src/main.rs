//! Scripted walkthrough of a session lifecycle against the in-memory
//! identity provider, with timings shrunk from minutes to seconds.
//!
//! ```text
//! RUST_LOG=debug cargo run -p session-demo
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokenward::prelude::*;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Demo timings
// ---------------------------------------------------------------------------

const TOKEN_LIFETIME: Duration = Duration::from_secs(15);

fn config() -> LifecycleConfig {
    LifecycleConfig {
        schedule: ScheduleConfig {
            refresh_lead_time: Duration::from_secs(10),
            immediate_threshold: Duration::from_secs(1),
            retry_delay: Duration::from_secs(3),
            fallback_interval: Duration::from_secs(10),
        },
        bridge: BridgeConfig {
            grace_window: Duration::from_secs(2),
            ..BridgeConfig::default()
        },
        ..LifecycleConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Walkthrough
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("demo failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), TokenwardError> {
    let provider = Arc::new(MemoryIdentityProvider::new(TOKEN_LIFETIME));
    let lifecycle = SessionLifecycle::builder(Arc::clone(&provider))
        .config(config())
        .build();
    log_events(&lifecycle);

    lifecycle.start();
    lifecycle.set_route("/dashboard");
    pause(100).await;
    info!(state = ?lifecycle.auth_state(), "1. started");

    provider.sign_in(Identity::new("dana").with_email("dana@example.com", false));
    pause(100).await;
    info!(state = ?lifecycle.auth_state(), "2. unverified sign-in kept out");

    provider.sign_in(Identity::new("dana").with_email("dana@example.com", true));
    pause(100).await;
    info!(scheduler = ?lifecycle.scheduler_state(), "3. verified sign-in");

    info!("4. waiting for the scheduled refresh");
    tokio::time::sleep(Duration::from_secs(6)).await;
    info!(metrics = ?lifecycle.schedule_metrics(), "   scheduler");

    provider.lapse();
    pause(800).await;
    provider.sign_in(Identity::new("dana").with_email("dana@example.com", true));
    pause(100).await;
    info!(
        signed_in = lifecycle.current_session().is_some(),
        "5. provider blinked inside the grace window"
    );

    let before = provider.token_requests();
    provider.set_token_delay(Duration::from_millis(500));
    let (a, b, c) = tokio::join!(
        lifecycle.force_refresh(),
        lifecycle.force_refresh(),
        lifecycle.refresh_after_failure(),
    );
    provider.set_token_delay(Duration::ZERO);
    let token = a?;
    let shared = b? == token && c?.as_ref() == Some(&token);
    info!(
        provider_calls = provider.token_requests() - before,
        shared,
        "6. three concurrent refreshes"
    );

    lifecycle.logout().await?;
    pause(100).await;
    info!(state = ?lifecycle.auth_state(), scheduler = ?lifecycle.scheduler_state(), "7. logged out");

    lifecycle.shutdown();
    Ok(())
}

fn log_events<P: IdentityProvider, B: SessionBackend>(lifecycle: &SessionLifecycle<P, B>) {
    let mut events = lifecycle.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!(?event, "session event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event log fell behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn pause(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
