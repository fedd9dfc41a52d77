use std::{fmt, sync::Arc};

use futures::stream::{self, BoxStream, StreamExt};
use thiserror::Error;
use tracing::debug;

use crate::domain::customer::{Customer, CustomerId, CustomerRepository};
use crate::domain::DataAccessError;

/// 検索キー
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupKey {
    Id(CustomerId),
    Name(String),
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupKey::Id(id) => write!(f, "id {}", id),
            LookupKey::Name(name) => write!(f, "name {:?}", name),
        }
    }
}

/// 顧客サービスエラー
#[derive(Error, Debug)]
pub enum CustomerServiceError {
    /// 該当する顧客がいない
    #[error("Customer with {key} not found")]
    NotFound { key: LookupKey },
    /// リポジトリのエラーをそのまま返す
    #[error(transparent)]
    Repository(#[from] DataAccessError),
}

/// 顧客サービス
///
/// 空の検索結果を `NotFound` に変換する以外はリポジトリへ委譲する。
#[derive(Clone)]
pub struct CustomerService {
    repository: Arc<dyn CustomerRepository>,
}

impl CustomerService {
    pub fn new(repository: Arc<dyn CustomerRepository>) -> Self {
        Self { repository }
    }

    pub async fn find_by_id(&self, id: &CustomerId) -> Result<Customer, CustomerServiceError> {
        match self.repository.find_by_id(id).await? {
            Some(customer) => Ok(customer),
            None => {
                debug!("顧客が見つかりません: id={}", id);
                Err(CustomerServiceError::NotFound {
                    key: LookupKey::Id(id.clone()),
                })
            }
        }
    }

    /// 名前で検索する
    ///
    /// 一件も無い場合は空で終わらず `NotFound` を一つ返して終わる。
    /// リポジトリのエラーを返した時点でストリームは終わる。
    pub fn find_by_name(
        &self,
        name: &str,
    ) -> BoxStream<'static, Result<Customer, CustomerServiceError>> {
        let key = LookupKey::Name(name.to_owned());
        let inner = self.repository.find_by_name(name);
        stream::unfold(
            (inner, false, Some(key)),
            |(mut inner, seen, key)| async move {
                let key = key?;
                match inner.next().await {
                    Some(Ok(customer)) => Some((Ok(customer), (inner, true, Some(key)))),
                    Some(Err(e)) => Some((Err(CustomerServiceError::from(e)), (inner, seen, None))),
                    None if seen => None,
                    None => {
                        debug!("顧客が見つかりません: {}", key);
                        Some((Err(CustomerServiceError::NotFound { key }), (inner, seen, None)))
                    }
                }
            },
        )
        .boxed()
    }

    pub async fn save(&self, customer: Customer) -> Result<Customer, CustomerServiceError> {
        Ok(self.repository.save(customer).await?)
    }

    pub async fn delete_by_id(&self, id: &CustomerId) -> Result<(), CustomerServiceError> {
        Ok(self.repository.delete_by_id(id).await?)
    }
}
