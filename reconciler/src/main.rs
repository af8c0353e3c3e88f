use std::sync::Arc;

use chrono::Duration;
use mindify_reconciler::{
    MemoryStore, SessionManager, StaticAuth, StatsReconciler, SystemClock,
};
use serde::Deserialize;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

#[derive(Deserialize)]
struct Env {
    user: Option<String>,
    idle_logout_minutes: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let env = envy::prefixed("MINDIFY_").from_env::<Env>()?;

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;

    let clock = Arc::new(SystemClock);
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let auth = Arc::new(StaticAuth::new());
    let reconciler = StatsReconciler::new(store, clock.clone());
    let manager = Arc::new(SessionManager::new(
        auth.clone(),
        reconciler,
        clock,
        Duration::minutes(env.idle_logout_minutes.unwrap_or(60)),
    ));

    let user = env.user.unwrap_or_else(|| "demo-user".to_owned());
    auth.sign_in(&user);

    // Exercise the session once it is up: a focus pass plus a topic award.
    let demo = {
        let manager = manager.clone();
        async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            match manager.award_xp("topic-atoms", 100).await {
                Ok(outcome) => info!("award outcome: {outcome:?}"),
                Err(e) => warn!("award failed: {e}"),
            }
            info!("current view: {:?}", manager.view().await);
        }
    };
    tokio::spawn(demo);

    tokio::select! {
        res = manager.run() => {
            res?;
        }
        _ = signal::ctrl_c() => {
            warn!("Received SIGINT. Exiting.");
        }
    }

    Ok(())
}
