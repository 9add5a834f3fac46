use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::IdentityGate;
use crate::backend::HandlePool;
use crate::config::ServerConfig;
use crate::handlers::{
    endpoint, DeleteTransaction, GetTransaction, ListAccounts, SaveTransactions, UpdateTransaction,
};

/// Everything a request needs, built once at startup.
#[derive(Clone)]
pub struct AppContext {
    pub gate: Arc<IdentityGate>,
    pub pool: Arc<HandlePool>,
}

impl AppContext {
    pub fn new(gate: IdentityGate, pool: Arc<HandlePool>) -> Self {
        Self {
            gate: Arc::new(gate),
            pool,
        }
    }
}

pub fn router(ctx: AppContext, config: &ServerConfig) -> Router {
    let prefix = config.route_prefix.trim_end_matches('/');

    let routes = Router::new()
        .route(
            &format!("{}/:coa/transactions", prefix),
            post(endpoint(SaveTransactions)),
        )
        .route(
            &format!("{}/:coa/transactions/:txid", prefix),
            get(endpoint(GetTransaction))
                .put(endpoint(UpdateTransaction))
                .delete(endpoint(DeleteTransaction)),
        )
        .route(&format!("{}/:coa/accounts", prefix), get(endpoint(ListAccounts)))
        .with_state(ctx);

    let routes = if config.enable_cors {
        routes.layer(CorsLayer::permissive())
    } else {
        routes
    };

    routes.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}
