use async_trait::async_trait;

use super::{Decoder, Operation, PathParams};
use crate::backend::{Account, Repository};
use crate::error::GatewayError;

/// GET /{prefix}/:coa/accounts - accounts visible in the bound chart
pub struct ListAccounts;

#[async_trait]
impl Operation for ListAccounts {
    type Output = Vec<Account>;

    async fn invoke(
        &self,
        repo: &Repository,
        _params: &PathParams,
        _decoder: Decoder,
    ) -> Result<Option<Self::Output>, GatewayError> {
        Ok(Some(repo.accounts().await?))
    }
}
