use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{Decoder, Operation, PathParams};
use crate::backend::{BackendError, Repository, SaveResult, Transaction};
use crate::error::GatewayError;

pub const TXID_PARAM: &str = "txid";

/// POST /{prefix}/:coa/transactions - save a batch of transactions
pub struct SaveTransactions;

#[async_trait]
impl Operation for SaveTransactions {
    type Output = Vec<SaveResult>;

    async fn invoke(
        &self,
        repo: &Repository,
        _params: &PathParams,
        decoder: Decoder,
    ) -> Result<Option<Self::Output>, GatewayError> {
        let txs: Vec<Transaction> = decoder.decode().await?;
        Ok(Some(repo.save(txs).await?))
    }
}

/// GET /{prefix}/:coa/transactions/:txid - fetch one transaction
pub struct GetTransaction;

#[async_trait]
impl Operation for GetTransaction {
    type Output = Transaction;

    async fn invoke(
        &self,
        repo: &Repository,
        params: &PathParams,
        _decoder: Decoder,
    ) -> Result<Option<Self::Output>, GatewayError> {
        let id = params.get(TXID_PARAM)?;
        Ok(Some(repo.get(id).await?))
    }
}

/// PUT /{prefix}/:coa/transactions/:txid - replace one transaction
///
/// The id in the path wins over any id in the body, whatever its JSON type.
pub struct UpdateTransaction;

#[async_trait]
impl Operation for UpdateTransaction {
    type Output = SaveResult;

    async fn invoke(
        &self,
        repo: &Repository,
        params: &PathParams,
        decoder: Decoder,
    ) -> Result<Option<Self::Output>, GatewayError> {
        let id = params.get(TXID_PARAM)?;
        let mut fields: Map<String, Value> = decoder.decode().await?;
        fields.remove("id");
        let tx = Transaction {
            id: Some(id.to_string()),
            fields,
        };

        let result = repo
            .save(vec![tx])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Rejected(format!("backend returned no result for {}", id)))?;
        Ok(Some(result))
    }
}

/// DELETE /{prefix}/:coa/transactions/:txid
pub struct DeleteTransaction;

#[async_trait]
impl Operation for DeleteTransaction {
    type Output = ();

    async fn invoke(
        &self,
        repo: &Repository,
        params: &PathParams,
        _decoder: Decoder,
    ) -> Result<Option<Self::Output>, GatewayError> {
        repo.delete(params.get(TXID_PARAM)?).await?;
        Ok(None)
    }
}
