use async_trait::async_trait;
use derive_more::{Deref, Display, From};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{DataAccessError, Entity, Event, EventQueue, EventQueueIntoIter, Id};

/// 顧客リポジトリ
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CustomerRepository: Send + Sync {
    /// 顧客をIDで検索する
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, DataAccessError>;
    /// 顧客を名前で検索する
    ///
    /// ストリームは最初にポーリングされた時点で読み込みを開始する。
    fn find_by_name(&self, name: &str) -> BoxStream<'static, Result<Customer, DataAccessError>>;
    /// 顧客を保存する
    ///
    /// IDが空の場合は採番したIDを付与して保存し、保存後の顧客を返す。
    async fn save(&self, customer: Customer) -> Result<Customer, DataAccessError>;
    /// 顧客をIDで削除する
    async fn delete_by_id(&self, id: &CustomerId) -> Result<(), DataAccessError>;
}

/// 顧客ID
#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Deref,
    Default,
)]
#[serde(transparent)]
pub struct CustomerId(String);

impl CustomerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Id for CustomerId {
    type Inner = String;
}

impl From<&str> for CustomerId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<u64> for CustomerId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

/// 顧客イベント
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerEvent {
    /// 顧客が登録された
    Created { id: CustomerId, name: String },
    /// 顧客名が変更された
    Renamed { id: CustomerId, name: String },
    /// 顧客が削除された
    Deleted { id: CustomerId },
}

impl Event for CustomerEvent {
    type Id = CustomerId;
}

/// 顧客エンティティ
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Customer {
    #[serde(default)]
    id: CustomerId,
    name: String,
    #[serde(skip)]
    events: EventQueue<CustomerEvent>,
}

impl Customer {
    /// 保存前の顧客を生成する
    ///
    /// イベントは発生しない。IDは空でもよい。
    pub fn new(id: impl Into<CustomerId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn create(id: CustomerId, name: String) -> Result<Self, CustomerError> {
        let mut entity = Customer::default();
        let event = CustomerEvent::Created { id, name };
        entity.validate(&event)?;
        entity.apply(event);
        Ok(entity)
    }

    pub fn rename(&mut self, name: String) -> Result<(), CustomerError> {
        let event = CustomerEvent::Renamed { id: self.id.clone(), name };
        self.validate(&event)?;
        self.apply(event);
        Ok(())
    }

    pub fn delete(&mut self) {
        self.apply(CustomerEvent::Deleted { id: self.id.clone() });
    }

    pub fn with_id(self, id: CustomerId) -> Self {
        Self { id, ..self }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn validate_id(&self, id: &CustomerId) -> Result<(), CustomerError> {
        match self.id == *id {
            true => Ok(()),
            false => Err(CustomerError::MismatchedId),
        }
    }
}

impl Entity for Customer {
    type Id = CustomerId;
    type Event = CustomerEvent;
    type Error = CustomerError;

    fn id(&self) -> Self::Id {
        self.id.clone()
    }

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            CustomerEvent::Created { id, .. } => match id.is_blank() {
                true => Err(CustomerError::IdIsBlank),
                false => Ok(()),
            },
            CustomerEvent::Renamed { id, .. } | CustomerEvent::Deleted { id } => {
                self.validate_id(id)
            }
        }
    }

    fn apply(&mut self, event: Self::Event) {
        if self.validate(&event).is_err() {
            return;
        }
        match event.clone() {
            CustomerEvent::Created { id, name } => {
                if self.id == id {
                    return;
                }
                self.id = id;
                self.name = name;
            }
            CustomerEvent::Renamed { name, .. } => {
                if self.name == name {
                    return;
                }
                self.name = name;
            }
            CustomerEvent::Deleted { .. } => {}
        }
        self.events.push(event);
    }

    fn entity_name() -> &'static str {
        "customer"
    }

    fn events(&self) -> &EventQueue<Self::Event> {
        &self.events
    }

    fn events_mut(&mut self) -> &mut EventQueue<Self::Event> {
        &mut self.events
    }
}

impl IntoIterator for Customer {
    type Item = CustomerEvent;
    type IntoIter = EventQueueIntoIter<Self::Item>;
    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

impl PartialEq for Customer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name == other.name
    }
}

impl Eq for Customer {}

/// 顧客エラー
#[derive(Error, Debug)]
pub enum CustomerError {
    /// IDが空欄です
    #[error("Customer id cannot be blank")]
    IdIsBlank,
    /// IDが一致しません
    #[error("Customer id does not match")]
    MismatchedId,
}

impl From<CustomerError> for DataAccessError {
    fn from(value: CustomerError) -> Self {
        Self::ClientSideError(Box::new(value))
    }
}
