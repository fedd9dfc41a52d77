use std::collections::BTreeMap;

use async_trait::async_trait;
use eventstore::{
    AppendToStreamOptions, Client, EventData, ExpectedRevision, ReadAllOptions, ResolvedEvent,
};
use futures::stream::{self, BoxStream, StreamExt};
use tracing::debug;

use crate::domain::customer::{Customer, CustomerEvent, CustomerId, CustomerRepository};
use crate::domain::{DataAccessError, Entity, IdGeneratorTask};
use crate::infrastructure::{is_entity_stream, stream_name, EventConvertError};
use crate::infrastructure::{from_event, try_from_recorded_event};

/// EventStoreDB上の顧客リポジトリ
///
/// 顧客ごとに `customer-<id>` ストリームを持つ。名前検索は `$all` を先頭から
/// 読むため、直前の書き込みも見える。
#[derive(Clone)]
pub struct EventStoreCustomerRepository {
    client: Client,
    ids: IdGeneratorTask,
}

impl EventStoreCustomerRepository {
    pub fn new(client: Client, ids: IdGeneratorTask) -> Self {
        Self { client, ids }
    }

    async fn load(&self, id: &CustomerId) -> Result<Option<Customer>, DataAccessError> {
        match self
            .client
            .read_stream(stream_name::<Customer>(id), &Default::default())
            .await
        {
            Ok(mut stream) => {
                let mut entity = Customer::default();
                loop {
                    match stream.next().await {
                        Ok(Some(e)) => match CustomerEvent::try_from(&e)? {
                            // 削除後に同じIDで再登録されることがある
                            CustomerEvent::Deleted { .. } => entity = Customer::default(),
                            event => entity.apply(event),
                        },
                        Ok(_) => break,
                        Err(eventstore::Error::ResourceDeleted) => return Ok(None),
                        Err(eventstore::Error::ResourceNotFound) => return Ok(None),
                        Err(e) => return Err(e.into()),
                    }
                }
                if entity.peek().is_none() {
                    Ok(None)
                } else {
                    entity.clear();
                    Ok(Some(entity))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `$all` を畳み込んで現存する顧客を全件取得する
    async fn load_all(client: Client) -> Result<Vec<Customer>, DataAccessError> {
        let mut stream = match client.read_all(&ReadAllOptions::default()).await {
            Ok(stream) => stream,
            Err(eventstore::Error::ResourceNotFound) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut customers: BTreeMap<CustomerId, Customer> = BTreeMap::new();
        loop {
            match stream.next().await {
                Ok(Some(resolved)) => {
                    let recorded = resolved.get_original_event();
                    if !is_entity_stream::<Customer>(&recorded.stream_id) {
                        continue;
                    }
                    match try_from_recorded_event::<Customer, CustomerEvent>(recorded)? {
                        CustomerEvent::Deleted { id } => {
                            customers.remove(&id);
                        }
                        event @ CustomerEvent::Created { .. } => {
                            let mut entity = Customer::default();
                            entity.apply(event);
                            customers.insert(entity.id(), entity);
                        }
                        event @ CustomerEvent::Renamed { .. } => {
                            if let Some(entity) = customers.get_mut(event_id(&event)) {
                                entity.apply(event);
                            }
                        }
                    }
                }
                Ok(_) => break,
                Err(eventstore::Error::ResourceNotFound) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(customers
            .into_values()
            .map(|mut c| {
                c.clear();
                c
            })
            .collect())
    }

    async fn append(
        &self,
        entity: &mut Customer,
        rev: ExpectedRevision,
    ) -> Result<(), DataAccessError> {
        let events = entity
            .pop_all()
            .into_iter()
            .map(EventData::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        if events.is_empty() {
            return Ok(());
        }
        self.client
            .append_to_stream(
                stream_name::<Customer>(&entity.id()),
                &AppendToStreamOptions::default().expected_revision(rev),
                events,
            )
            .await?;
        Ok(())
    }
}

fn event_id(event: &CustomerEvent) -> &CustomerId {
    match event {
        CustomerEvent::Created { id, .. }
        | CustomerEvent::Renamed { id, .. }
        | CustomerEvent::Deleted { id } => id,
    }
}

#[async_trait]
impl CustomerRepository for EventStoreCustomerRepository {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, DataAccessError> {
        self.load(id).await
    }

    fn find_by_name(&self, name: &str) -> BoxStream<'static, Result<Customer, DataAccessError>> {
        let client = self.client.clone();
        let name = name.to_owned();
        stream::once(Self::load_all(client))
            .flat_map(move |result| match result {
                Ok(customers) => {
                    let name = name.clone();
                    stream::iter(customers.into_iter().filter(move |c| c.name() == name).map(Ok))
                        .left_stream()
                }
                Err(e) => stream::iter(vec![Err(e)]).right_stream(),
            })
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
        let name = customer.name().to_owned();
        match self.load(&customer.id()).await? {
            Some(mut entity) => {
                entity.rename(name)?;
                self.append(&mut entity, ExpectedRevision::StreamExists)
                    .await?;
                Ok(entity)
            }
            None => {
                let mut entity = Customer::create(customer.id(), name)?;
                // 削除済みIDの再登録は既存ストリームへの追記になる
                self.append(&mut entity, ExpectedRevision::Any).await?;
                debug!("顧客を登録しました: {}", entity.id());
                Ok(entity)
            }
        }
    }

    async fn delete_by_id(&self, id: &CustomerId) -> Result<(), DataAccessError> {
        let Some(mut entity) = self.load(id).await? else {
            return Ok(());
        };
        entity.delete();
        self.append(&mut entity, ExpectedRevision::StreamExists)
            .await
    }
}

impl TryFrom<CustomerEvent> for EventData {
    type Error = EventConvertError;

    fn try_from(value: CustomerEvent) -> Result<Self, Self::Error> {
        from_event(value)
    }
}

impl TryFrom<&ResolvedEvent> for CustomerEvent {
    type Error = EventConvertError;

    fn try_from(value: &ResolvedEvent) -> Result<Self, Self::Error> {
        try_from_recorded_event::<Customer, _>(value.get_original_event())
    }
}

#[cfg(test)]
mod tests {
    use eventstore::{Client, EventData, Position, RecordedEvent, ResolvedEvent};
    use futures::TryStreamExt;
    use serde_json::json;
    use snowflake::SnowflakeIdGenerator;

    use crate::domain::customer::{Customer, CustomerEvent, CustomerId, CustomerRepository};
    use crate::domain::{Entity, IdGeneratorTask};
    use crate::infrastructure::event_payload;

    use super::EventStoreCustomerRepository;

    fn resolved(stream_id: &str, event_type: &str, data: serde_json::Value) -> ResolvedEvent {
        ResolvedEvent {
            event: Some(RecordedEvent {
                stream_id: stream_id.to_owned(),
                id: Default::default(),
                revision: Default::default(),
                event_type: event_type.to_owned(),
                data: serde_json::to_vec(&data).unwrap().into(),
                metadata: Default::default(),
                custom_metadata: Default::default(),
                is_json: Default::default(),
                position: Position {
                    commit: Default::default(),
                    prepare: Default::default(),
                },
                created: Default::default(),
            }),
            link: None,
            commit_position: None,
        }
    }

    #[tokio::test]
    #[ignore = "requires EventStoreDB at localhost:2113"]
    async fn test_repository() {
        // リポジトリ作成
        let settings = "esdb://localhost:2113?tls=false".parse().unwrap();
        let client = Client::new(settings).unwrap();
        let ids = IdGeneratorTask::spawn(SnowflakeIdGenerator::new(1, 1).into());
        let repo = EventStoreCustomerRepository::new(client, ids.clone());

        // 採番して登録
        let saved = repo.save(Customer::new("", "Ada")).await.unwrap();
        assert!(!saved.id().is_blank());
        assert_eq!(repo.find_by_id(&saved.id()).await.unwrap(), Some(saved.clone()));

        // 再保存で名前変更
        let renamed = repo
            .save(Customer::new(saved.id(), "Ada Lovelace"))
            .await
            .unwrap();
        assert_eq!(renamed.name(), "Ada Lovelace");
        assert_eq!(
            repo.find_by_id(&saved.id()).await.unwrap(),
            Some(renamed.clone())
        );

        // エンティティ削除確認
        repo.delete_by_id(&saved.id()).await.unwrap();
        assert_eq!(repo.find_by_id(&saved.id()).await.unwrap(), None);
        repo.delete_by_id(&saved.id()).await.unwrap();

        let missing: CustomerId = ids.generate().await.unwrap();
        repo.delete_by_id(&missing).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires EventStoreDB at localhost:2113"]
    async fn test_repository_find_by_name() {
        let settings = "esdb://localhost:2113?tls=false".parse().unwrap();
        let client = Client::new(settings).unwrap();
        let ids = IdGeneratorTask::spawn(SnowflakeIdGenerator::new(1, 2).into());
        let repo = EventStoreCustomerRepository::new(client, ids.clone());

        let marker: CustomerId = ids.generate().await.unwrap();
        let name = format!("Grace {}", marker);
        let first = repo.save(Customer::new("", name.as_str())).await.unwrap();
        let second = repo.save(Customer::new("", name.as_str())).await.unwrap();

        // 書き込み直後でも見える
        let mut found: Vec<Customer> = repo.find_by_name(&name).try_collect().await.unwrap();
        found.sort_by_key(|c| c.id());
        let mut expected = vec![first.clone(), second];
        expected.sort_by_key(|c| c.id());
        assert_eq!(found, expected);

        repo.delete_by_id(&first.id()).await.unwrap();
        let found: Vec<Customer> = repo.find_by_name(&name).try_collect().await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_event_data_from() {
        let event = CustomerEvent::Created {
            id: "42".into(),
            name: "Ada".to_owned(),
        };
        let (event_type, data) = event_payload(event.clone()).unwrap();
        assert_eq!(event_type, "Created");
        assert_eq!(data, json!({ "name": "Ada" }));
        assert!(EventData::try_from(event.clone()).is_ok());

        let recorded = resolved("customer-42", &event_type, data);
        assert_eq!(CustomerEvent::try_from(&recorded).ok(), Some(event));
    }

    #[test]
    fn test_deleted_event_data_from() {
        let event = CustomerEvent::Deleted { id: "42".into() };
        let (event_type, data) = event_payload(event.clone()).unwrap();
        assert_eq!(event_type, "Deleted");
        assert_eq!(data, json!({}));
        assert!(EventData::try_from(event.clone()).is_ok());

        let recorded = resolved("customer-42", &event_type, data);
        assert_eq!(CustomerEvent::try_from(&recorded).ok(), Some(event));
    }

    #[test]
    fn test_event_try_from() {
        let event = resolved("customer-42", "Renamed", json!({ "name": "Grace" }));
        let expected = CustomerEvent::Renamed {
            id: "42".into(),
            name: "Grace".to_owned(),
        };
        assert_eq!(CustomerEvent::try_from(&event).ok(), Some(expected));
    }

    #[test]
    fn test_event_try_from_foreign_stream() {
        let event = resolved("media-42", "Created", json!({ "name": "Ada" }));
        assert!(CustomerEvent::try_from(&event).is_err());
    }
}
