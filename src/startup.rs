use crate::auth::Authenticator;
use crate::config::Config;
use crate::db::connection::{DbPool, get_pool_stats};
use crate::sse::RealtimeHub;
use tokio::time::{Duration, interval};
use tracing::{debug, error};

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub hub: RealtimeHub,
    pub auth: Authenticator,
}

impl AppState {
    pub fn new(config: &Config, db: DbPool) -> Self {
        let auth = Authenticator::new(&config.jwt_secret, config.jwt_issuer.as_deref());
        let hub = RealtimeHub::with_heartbeat(config.heartbeat_interval);

        let db_clone = db.clone();
        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                match db_clone.acquire().await {
                    Ok(conn) => {
                        drop(conn);
                        debug!("{}", get_pool_stats(&db_clone));
                    }
                    Err(e) => {
                        error!("Database connection health check failed: {}", e);
                    }
                }
            }
        });

        AppState { db, hub, auth }
    }
}
