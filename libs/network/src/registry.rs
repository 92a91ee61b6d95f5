//! Endpoint Registry
//!
//! Maps endpoint ids to [`Invoker`]s. The engine owns one registry and only
//! touches it on its own thread, so lookups on the receive path never race
//! registration.

use crate::error::{NetworkError, Result};
use crate::serializer::{BincodeSerializer, Serializer};
use dispatch::Delegate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Inbound capability: decode a payload and run the target
pub trait Invoker: Send + Sync {
    fn invoke(&self, payload: &[u8]) -> Result<()>;
}

type Target<A> = Arc<dyn Fn(A) -> Result<()> + Send + Sync>;

/// Invoker that decodes an `A` and calls a target with it
pub struct RemoteEndpoint<A, S = BincodeSerializer> {
    serializer: S,
    target: Target<A>,
    _args: PhantomData<fn(A)>,
}

impl<A> RemoteEndpoint<A, BincodeSerializer>
where
    A: Serialize + DeserializeOwned + 'static,
{
    /// Call `target` inline on the engine thread
    pub fn new<F>(target: F) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self::with_serializer(BincodeSerializer, target)
    }

    /// Hand each decoded value on to `delegate`'s thread
    pub fn forward(delegate: Delegate<A>) -> Self
    where
        A: Send,
    {
        Self::forward_with_serializer(BincodeSerializer, delegate)
    }
}

impl<A, S> RemoteEndpoint<A, S>
where
    A: 'static,
    S: Serializer<A>,
{
    pub fn with_serializer<F>(serializer: S, target: F) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self {
            serializer,
            target: Arc::new(move |args| {
                target(args);
                Ok(())
            }),
            _args: PhantomData,
        }
    }

    pub fn forward_with_serializer(serializer: S, delegate: Delegate<A>) -> Self
    where
        A: Send,
    {
        Self {
            serializer,
            target: Arc::new(move |args| delegate.invoke(args).map_err(NetworkError::from)),
            _args: PhantomData,
        }
    }
}

impl<A, S> Invoker for RemoteEndpoint<A, S>
where
    A: 'static,
    S: Serializer<A>,
{
    fn invoke(&self, payload: &[u8]) -> Result<()> {
        let args = self.serializer.read(payload)?;
        (self.target)(args)
    }
}

impl<A, S> fmt::Debug for RemoteEndpoint<A, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteEndpoint")
            .field("args", &std::any::type_name::<A>())
            .finish()
    }
}

/// Endpoint id to invoker map
#[derive(Default)]
pub struct EndpointRegistry {
    endpoints: HashMap<u16, Arc<dyn Invoker>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `invoker` for `id`, returning any invoker it replaces
    pub fn insert(&mut self, id: u16, invoker: Arc<dyn Invoker>) -> Option<Arc<dyn Invoker>> {
        self.endpoints.insert(id, invoker)
    }

    pub fn get(&self, id: u16) -> Option<Arc<dyn Invoker>> {
        self.endpoints.get(&id).cloned()
    }

    pub fn contains(&self, id: u16) -> bool {
        self.endpoints.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.endpoints.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::JsonSerializer;
    use dispatch::{QueueConfig, ShutdownMode, ThreadAdapter, WorkerThread};
    use parking_lot::Mutex;

    #[test]
    fn test_endpoint_decodes_and_calls_target() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let endpoint = RemoteEndpoint::new(move |(name, count): (String, u32)| {
            sink.lock().push((name, count));
        });

        let payload = BincodeSerializer.to_vec(&("ping".to_string(), 3u32)).unwrap();
        endpoint.invoke(&payload).unwrap();
        assert_eq!(*seen.lock(), vec![("ping".to_string(), 3)]);
    }

    #[test]
    fn test_endpoint_reports_decode_failure() {
        let endpoint = RemoteEndpoint::with_serializer(JsonSerializer, |_: u32| {});
        assert!(matches!(
            endpoint.invoke(b"{not json"),
            Err(NetworkError::Serialization { .. })
        ));
    }

    #[test]
    fn test_forward_runs_on_delegate_thread() {
        let worker = WorkerThread::spawn("forward-target", QueueConfig::default()).unwrap();
        let adapter: Arc<dyn ThreadAdapter> = Arc::new(worker.clone());
        let ran_on = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&ran_on);
        let delegate = Delegate::new(adapter, move |value: u64| {
            *sink.lock() = Some((value, std::thread::current().name().map(str::to_string)));
        });

        let endpoint = RemoteEndpoint::forward(delegate);
        endpoint
            .invoke(&BincodeSerializer.to_vec(&77u64).unwrap())
            .unwrap();

        worker.shutdown(ShutdownMode::Drain).unwrap();
        assert_eq!(
            *ran_on.lock(),
            Some((77, Some("forward-target".to_string())))
        );
    }

    #[test]
    fn test_registry_replaces_and_lists() {
        let mut registry = EndpointRegistry::new();
        assert!(registry.insert(5, Arc::new(RemoteEndpoint::new(|_: u8| {}))).is_none());
        assert!(registry.insert(2, Arc::new(RemoteEndpoint::new(|_: u8| {}))).is_none());
        assert!(registry.insert(5, Arc::new(RemoteEndpoint::new(|_: u8| {}))).is_some());
        assert_eq!(registry.ids(), vec![2, 5]);
        assert!(registry.get(9).is_none());
    }
}
