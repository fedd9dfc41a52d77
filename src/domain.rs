pub mod customer;

use serde::{Deserialize, Serialize};
use snowflake::SnowflakeIdGenerator;
use std::{
    collections::VecDeque,
    error::Error,
    fmt::{Debug, Display},
    hash::Hash,
    ops::Deref,
    str::FromStr,
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

pub trait Id:
    Clone
    + Eq
    + Hash
    + Deref<Target = Self::Inner>
    + From<Self::Inner>
    + Display
    + Debug
    + Serialize
    + for<'de> Deserialize<'de>
{
    type Inner: FromStr;
}

pub trait Event: Clone + Eq + Debug + Serialize + for<'a> Deserialize<'a> {
    type Id;
}

pub trait Entity: IntoIterator<Item = Self::Event> + Debug + Default + Clone {
    type Id: Id;
    type Event: Event<Id = Self::Id>;
    type Error: Error;

    fn id(&self) -> Self::Id;
    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error>;
    fn apply(&mut self, event: Self::Event);
    fn entity_name() -> &'static str;
    fn events(&self) -> &EventQueue<Self::Event>;
    fn events_mut(&mut self) -> &mut EventQueue<Self::Event>;
    fn pop(&mut self) -> Option<Self::Event> {
        self.events_mut().pop()
    }
    fn pop_all(&mut self) -> Vec<Self::Event> {
        let mut events = Vec::new();
        while let Some(e) = self.pop() {
            events.push(e);
        }
        events
    }
    fn clear(&mut self) {
        self.events_mut().clear()
    }
    fn peek(&self) -> Option<&Self::Event> {
        self.events().peek()
    }
}

pub type BoxedError = Box<dyn Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum DataAccessError {
    #[error("Database connection error: {0}")]
    ConnectionError(BoxedError),
    #[error("Database query error: {0}")]
    QueryError(BoxedError),
    #[error("Data read error: {0}")]
    ReadError(BoxedError),
    #[error("Data write error: {0}")]
    WriteError(BoxedError),
    #[error("Client side error: {0}")]
    ClientSideError(BoxedError),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventQueue<T> {
    queue: VecDeque<T>,
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }
    pub fn peek(&self) -> Option<&T> {
        self.queue.front()
    }
    pub fn push(&mut self, value: T) {
        self.queue.push_back(value)
    }
    pub fn pop(&mut self) -> Option<T> {
        self.queue.pop_front()
    }
    pub fn clear(&mut self) {
        self.queue.clear()
    }
}

impl<T> IntoIterator for EventQueue<T> {
    type Item = T;
    type IntoIter = EventQueueIntoIter<T>;
    fn into_iter(self) -> Self::IntoIter {
        self.queue.into_iter()
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub type EventQueueIntoIter<T> = std::collections::vec_deque::IntoIter<T>;

pub struct IdGenerator(SnowflakeIdGenerator);

impl IdGenerator {
    pub fn new(gen: SnowflakeIdGenerator) -> Self {
        Self(gen)
    }

    pub fn generate(&mut self) -> u64 {
        self.0.generate() as u64
    }
}

impl From<SnowflakeIdGenerator> for IdGenerator {
    fn from(value: SnowflakeIdGenerator) -> Self {
        Self::new(value)
    }
}

#[derive(Error, Debug)]
pub enum IdGeneratorError {
    #[error("Id generator task has stopped")]
    Stopped,
}

impl From<IdGeneratorError> for DataAccessError {
    fn from(value: IdGeneratorError) -> Self {
        Self::ClientSideError(Box::new(value))
    }
}

/// 採番タスク
///
/// 生成器を単一のタスクが所有し、チャネル経由で要求に応答する。
#[derive(Clone)]
pub struct IdGeneratorTask {
    _handle: Arc<JoinHandle<()>>,
    sender: mpsc::Sender<oneshot::Sender<u64>>,
}

impl IdGeneratorTask {
    pub fn spawn(mut gen: IdGenerator) -> Self {
        let (tx_async, mut rx_async) = mpsc::channel::<oneshot::Sender<u64>>(100);
        let handle = tokio::spawn(async move {
            while let Some(tx) = rx_async.recv().await {
                // 要求元が既に破棄されている場合は捨てる
                let _ = tx.send(gen.generate());
            }
        });
        Self {
            _handle: Arc::new(handle),
            sender: tx_async,
        }
    }

    pub async fn generate<T>(&self) -> Result<T, IdGeneratorError>
    where
        T: From<u64>,
    {
        let (tx, rx) = oneshot::channel::<u64>();
        self.sender
            .send(tx)
            .await
            .map_err(|_| IdGeneratorError::Stopped)?;
        rx.await.map(T::from).map_err(|_| IdGeneratorError::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_event_queue_order() {
        let mut queue = EventQueue::new();
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.peek(), Some(&1));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.peek(), Some(&2));
        queue.clear();
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.into_iter().count(), 0);
    }

    #[tokio::test]
    async fn test_id_generator_task_unique() {
        let task = IdGeneratorTask::spawn(SnowflakeIdGenerator::new(1, 1).into());
        let mut ids = HashSet::new();
        for _ in 0..100 {
            ids.insert(task.generate::<u64>().await.unwrap());
        }
        assert_eq!(ids.len(), 100);
    }

    #[tokio::test]
    async fn test_id_generator_task_shared_between_clones() {
        let task = IdGeneratorTask::spawn(SnowflakeIdGenerator::new(1, 1).into());
        let other = task.clone();
        let (a, b) = tokio::join!(task.generate::<u64>(), other.generate::<u64>());
        assert_ne!(a.unwrap(), b.unwrap());
    }
}
