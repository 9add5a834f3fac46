// handlers/mod.rs - HTTP-to-operation bridge
//
// Every route runs the same pipeline: authenticate, borrow a handle stamped with
// the caller and the `coa` path segment, hand the operation a decoder for the body,
// then encode whatever it returns. The operation alone knows its payload types.

pub mod accounts;
pub mod transactions;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::future::{BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};

use crate::app::AppContext;
use crate::backend::Repository;
use crate::error::GatewayError;

pub use accounts::ListAccounts;
pub use transactions::{DeleteTransaction, GetTransaction, SaveTransactions, UpdateTransaction};

/// Path segment naming the chart of accounts a request is scoped to.
pub const COA_PARAM: &str = "coa";

/// Captured path segments of the matched route.
#[derive(Debug, Clone, Default)]
pub struct PathParams(HashMap<String, String>);

impl PathParams {
    pub fn new(params: HashMap<String, String>) -> Self {
        Self(params)
    }

    pub fn get(&self, name: &str) -> Result<&str, GatewayError> {
        self.0
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| GatewayError::MissingParameter(name.to_string()))
    }
}

/// Largest request body an operation may decode.
pub const BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Single-use view of one request body. Nothing is read off the wire until
/// `decode` runs, and the caller picks the target type.
pub struct Decoder {
    body: Body,
}

impl Decoder {
    pub fn new(body: Body) -> Self {
        Self { body }
    }

    pub async fn decode<T: DeserializeOwned>(self) -> Result<T, GatewayError> {
        let bytes = axum::body::to_bytes(self.body, BODY_LIMIT)
            .await
            .map_err(GatewayError::decode)?;
        serde_json::from_slice(&bytes).map_err(GatewayError::decode)
    }
}

/// One route's business call against a borrowed handle.
///
/// `Ok(None)` means the operation has nothing to report and the response body
/// stays empty.
#[async_trait]
pub trait Operation: Send + Sync + 'static {
    type Output: Serialize + Send;

    async fn invoke(
        &self,
        repo: &Repository,
        params: &PathParams,
        decoder: Decoder,
    ) -> Result<Option<Self::Output>, GatewayError>;
}

/// Run one request through `op`. The body is left untouched until the caller
/// has been authenticated.
pub async fn dispatch<O: Operation>(
    ctx: &AppContext,
    op: &O,
    headers: &HeaderMap,
    params: PathParams,
    body: Body,
) -> Result<Response, GatewayError> {
    let user = ctx.gate.authenticate(headers)?;
    let coa = params.get(COA_PARAM)?.to_string();

    let output = {
        let repo = ctx.pool.borrow(user.into_string(), coa).await?;
        tracing::debug!("Dispatching to handle #{} for {:?}", repo.serial(), repo.scope());
        let result = op.invoke(&repo, &params, Decoder::new(body)).await;
        // handle goes back to the pool here, on success and failure alike
        result
    }?;

    match output {
        Some(value) => {
            let json = serde_json::to_vec(&value).map_err(GatewayError::encode)?;
            Ok(([(header::CONTENT_TYPE, "application/json")], json).into_response())
        }
        None => Ok(StatusCode::OK.into_response()),
    }
}

/// Axum handler for `op`. Failures are logged and rendered by `GatewayError`.
pub fn endpoint<O: Operation>(
    op: O,
) -> impl Fn(State<AppContext>, Path<HashMap<String, String>>, Request) -> BoxFuture<'static, Response>
       + Clone
       + Send
       + Sync
       + 'static {
    let op = Arc::new(op);
    move |State(ctx): State<AppContext>, Path(params): Path<HashMap<String, String>>, request: Request| {
        let op = Arc::clone(&op);
        async move {
            let (parts, body) = request.into_parts();
            match dispatch(&ctx, op.as_ref(), &parts.headers, PathParams::new(params), body).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!("Request failed ({}): {}", err.error_code(), err);
                    err.into_response()
                }
            }
        }
        .boxed()
    }
}
