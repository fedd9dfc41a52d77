use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::RwLock;

use crate::domain::customer::{Customer, CustomerId, CustomerRepository};
use crate::domain::{DataAccessError, Entity, IdGeneratorTask};

/// プロセス内の顧客リポジトリ
///
/// 永続化しない。開発用とテスト用。
#[derive(Clone)]
pub struct InMemoryCustomerRepository {
    customers: Arc<RwLock<BTreeMap<CustomerId, Customer>>>,
    ids: IdGeneratorTask,
}

impl InMemoryCustomerRepository {
    pub fn new(ids: IdGeneratorTask) -> Self {
        Self {
            customers: Default::default(),
            ids,
        }
    }
}

#[async_trait]
impl CustomerRepository for InMemoryCustomerRepository {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, DataAccessError> {
        Ok(self.customers.read().await.get(id).cloned())
    }

    fn find_by_name(&self, name: &str) -> BoxStream<'static, Result<Customer, DataAccessError>> {
        let customers = self.customers.clone();
        let name = name.to_owned();
        stream::once(async move {
            customers
                .read()
                .await
                .values()
                .filter(|c| c.name() == name)
                .cloned()
                .collect::<Vec<_>>()
        })
        .flat_map(|matches| stream::iter(matches.into_iter().map(Ok)))
        .boxed()
    }

    async fn save(&self, customer: Customer) -> Result<Customer, DataAccessError> {
        let customer = match customer.id().is_blank() {
            true => {
                let id = self.ids.generate::<CustomerId>().await?;
                customer.with_id(id)
            }
            false => customer,
        };
        let mut customers = self.customers.write().await;
        let entity = match customers.get_mut(&customer.id()) {
            Some(entity) => {
                entity.rename(customer.name().to_owned())?;
                entity.clear();
                entity.clone()
            }
            None => {
                let mut entity = Customer::create(customer.id(), customer.name().to_owned())?;
                entity.clear();
                customers.insert(entity.id(), entity.clone());
                entity
            }
        };
        Ok(entity)
    }

    async fn delete_by_id(&self, id: &CustomerId) -> Result<(), DataAccessError> {
        self.customers.write().await.remove(id);
        Ok(())
    }
}
