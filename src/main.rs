use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use onboard_flow::config::{FlowConfig, ServiceConfig};
use onboard_flow::identity::{
    GoTrueConfig, GoTrueProvider, Identity, InMemoryIdentityProvider, Session,
};
use onboard_flow::navigation::{HistoryNavigator, Navigator};
use onboard_flow::onboarding::{SessionRouteState, session_routes};
use onboard_flow::profile::{
    InMemoryProfileStore, PostgrestConfig, PostgrestProfileStore, ProfileUpdate, Role,
};
use onboard_flow::runtime::SessionRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = FlowConfig::from_env().context("invalid flow configuration")?;
    let service = ServiceConfig::from_env().context("invalid service configuration")?;

    eprintln!("Onboard Flow v{}", env!("CARGO_PKG_VERSION"));

    match service {
        Some(service) => serve(config, service).await,
        None => simulate(config).await,
    }
}

/// Run against a real auth server and record store, exposing the REST routes.
async fn serve(config: FlowConfig, service: ServiceConfig) -> anyhow::Result<()> {
    eprintln!("   Auth: {}", service.auth_url);
    eprintln!("   Records: {}", service.rest_url);
    eprintln!("   API: http://0.0.0.0:{}/api/session\n", service.port);

    let provider = Arc::new(GoTrueProvider::new(GoTrueConfig {
        base_url: service.auth_url.clone(),
        api_key: service.api_key.clone(),
        request_timeout: config.request_timeout,
    })?);
    let profiles = PostgrestProfileStore::new(PostgrestConfig {
        base_url: service.rest_url.clone(),
        api_key: service.api_key.clone(),
        table: service.profile_table.clone(),
        request_timeout: config.request_timeout,
    })?
    .with_access_tokens(provider.clone());
    let navigator = Arc::new(HistoryNavigator::new(config.routes.landing.clone()));

    let runtime = SessionRuntime::new(provider, Arc::new(profiles), navigator, config);
    runtime.start().await;

    let app = session_routes(SessionRouteState {
        runtime: Arc::clone(&runtime),
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", service.port))
        .await
        .with_context(|| format!("failed to bind port {}", service.port))?;
    tracing::info!(port = service.port, "Session API started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    runtime.shutdown().await;
    Ok(())
}

/// Walk a fresh sign-up through the whole flow with in-memory collaborators.
async fn simulate(config: FlowConfig) -> anyhow::Result<()> {
    eprintln!("   ONBOARD_AUTH_URL not set, running the in-memory walkthrough\n");

    let provider = InMemoryIdentityProvider::new();
    let profiles = InMemoryProfileStore::with_latency(Duration::from_millis(50));
    let navigator = Arc::new(HistoryNavigator::new(config.routes.verify_callback.clone()));
    let runtime = SessionRuntime::new(
        provider.clone(),
        profiles.clone(),
        navigator.clone(),
        config,
    );

    runtime.start().await;

    // The link's credential exchange lands a moment after the page loads.
    let session = Session::new(Identity::generate())
        .with_email("jane@example.com")
        .with_signup_role(Role::Coach);
    let exchange = provider.establish_after(session, Duration::from_millis(1200));

    let mut callback =
        runtime.open_verification_link("/auth/callback#access_token=simulated&type=signup")?;
    let phase = callback.finished().await;
    exchange.await?;
    tracing::info!(%phase, path = %navigator.current_path(), "Verification landing finished");

    let record = runtime
        .profile_form()
        .submit(ProfileUpdate::display_name("Jane"))
        .await?;
    tracing::info!(identity = %record.id, "Profile completed");

    // Give the router a turn to react to the completed profile.
    tokio::time::sleep(Duration::from_millis(10)).await;

    for nav in navigator.navigations() {
        eprintln!("   -> {} (replace: {})", nav.path, nav.replace);
    }
    eprintln!("   Profiles stored: {}", profiles.len().await);

    runtime.shutdown().await;
    Ok(())
}
