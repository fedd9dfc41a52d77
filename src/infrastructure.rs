pub mod customer;
pub mod memory;

use eventstore::{EventData, RecordedEvent};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;

use crate::domain::{DataAccessError, Entity, Event, Id};

pub use self::customer::*;
pub use self::memory::*;

impl From<eventstore::Error> for DataAccessError {
    fn from(value: eventstore::Error) -> Self {
        match value {
            eventstore::Error::ConnectionClosed
            | eventstore::Error::Grpc { .. }
            | eventstore::Error::GrpcConnectionError(_)
            | eventstore::Error::DeadlineExceeded
            | eventstore::Error::InitializationError(_) => Self::ConnectionError(Box::new(value)),
            eventstore::Error::ServerError(_)
            | eventstore::Error::NotLeaderException(_)
            | eventstore::Error::AccessDenied
            | eventstore::Error::UnsupportedFeature
            | eventstore::Error::InternalParsingError(_)
            | eventstore::Error::InternalClientError => Self::QueryError(Box::new(value)),
            eventstore::Error::ResourceNotFound | eventstore::Error::ResourceDeleted => {
                Self::ReadError(Box::new(value))
            }
            eventstore::Error::ResourceAlreadyExists
            | eventstore::Error::WrongExpectedVersion { .. } => Self::WriteError(Box::new(value)),
            eventstore::Error::IllegalStateError(_) => Self::ClientSideError(Box::new(value)),
        }
    }
}

impl From<EventConvertError> for DataAccessError {
    fn from(value: EventConvertError) -> Self {
        DataAccessError::ClientSideError(Box::new(value))
    }
}

#[derive(Error, Debug)]
pub enum EventConvertError {
    #[error("Failed to convert event: malformed stream id {0}")]
    StreamId(String),
    #[error("Failed to convert event: payload is not an object")]
    Payload,
    #[error("Failed to convert event: {0}")]
    Json(#[from] serde_json::Error),
}

/// ストリーム名からエンティティIDを取り出す
///
/// ストリーム名は `<entity_name>-<id>` の形式で、IDには `-` が含まれてもよい。
fn entity_id<E: Entity>(stream_id: &str) -> Result<E::Id, EventConvertError> {
    stream_id
        .strip_prefix(E::entity_name())
        .and_then(|s| s.strip_prefix('-'))
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<<E::Id as Id>::Inner>().ok())
        .map(E::Id::from)
        .ok_or_else(|| EventConvertError::StreamId(stream_id.to_owned()))
}

fn stream_name<E: Entity>(id: &E::Id) -> String {
    format!("{}-{}", E::entity_name(), id)
}

/// `$all` 上のイベントがこのエンティティのストリームのものか
fn is_entity_stream<E: Entity>(stream_id: &str) -> bool {
    entity_id::<E>(stream_id).is_ok()
}

/// イベントを `{ "<Variant>": { ... } }` 形式からイベント種別と本文に分け、IDはストリーム名に任せる
fn event_payload<E: Event>(event: E) -> Result<(String, Value), EventConvertError> {
    let root = serde_json::to_value(event)?;
    let (event_type, mut data) = root
        .as_object()
        .and_then(|o| o.iter().next())
        .map(|(k, v)| (k.clone(), v.clone()))
        .ok_or(EventConvertError::Payload)?;
    data.as_object_mut()
        .ok_or(EventConvertError::Payload)?
        .remove("id");
    Ok((event_type, data))
}

fn from_event<E: Event>(event: E) -> Result<EventData, EventConvertError> {
    let (event_type, data) = event_payload(event)?;
    Ok(EventData::json(event_type, data)?)
}

fn try_from_recorded_event<En, Ev>(event: &RecordedEvent) -> Result<Ev, EventConvertError>
where
    En: Entity<Event = Ev>,
    Ev: DeserializeOwned + Event<Id = En::Id>,
{
    let id = entity_id::<En>(&event.stream_id)?;
    let mut data: Value = serde_json::from_slice(event.data.as_ref())?;
    data.as_object_mut()
        .ok_or(EventConvertError::Payload)?
        .insert("id".to_owned(), json!(id));
    let json = json!({ &event.event_type: data });
    Ok(serde_json::from_value(json)?)
}

#[cfg(test)]
mod tests {
    use crate::domain::customer::{Customer, CustomerEvent, CustomerId};

    use super::*;

    #[test]
    fn test_entity_id() {
        assert_eq!(
            entity_id::<Customer>("customer-42").unwrap(),
            CustomerId::from("42")
        );
        assert_eq!(
            entity_id::<Customer>("customer-a-b-c").unwrap(),
            CustomerId::from("a-b-c")
        );
        assert!(entity_id::<Customer>("customer-").is_err());
        assert!(entity_id::<Customer>("media-42").is_err());
    }

    #[test]
    fn test_stream_names() {
        assert_eq!(stream_name::<Customer>(&"42".into()), "customer-42");
    }

    #[test]
    fn test_is_entity_stream() {
        assert!(is_entity_stream::<Customer>("customer-42"));
        assert!(!is_entity_stream::<Customer>("$ce-customer"));
        assert!(!is_entity_stream::<Customer>("$$customer-42"));
        assert!(!is_entity_stream::<Customer>("customers-42"));
        assert!(!is_entity_stream::<Customer>("media-42"));
    }

    #[test]
    fn test_event_payload() {
        let created = CustomerEvent::Created {
            id: "42".into(),
            name: "Ada".to_owned(),
        };
        let (event_type, data) = event_payload(created).unwrap();
        assert_eq!(event_type, "Created");
        assert_eq!(data, json!({ "name": "Ada" }));

        let deleted = CustomerEvent::Deleted { id: "42".into() };
        let (event_type, data) = event_payload(deleted).unwrap();
        assert_eq!(event_type, "Deleted");
        assert_eq!(data, json!({}));
    }
}
