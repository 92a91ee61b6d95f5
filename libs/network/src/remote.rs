//! Remote Delegates
//!
//! Caller side of a remote call: serialize the argument and dispatch it to
//! an endpoint id through a [`NetworkEngine`]. The peer registers a
//! [`RemoteEndpoint`](crate::registry::RemoteEndpoint) under the same id.

use crate::engine::NetworkEngine;
use crate::error::Result;
use crate::serializer::{BincodeSerializer, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

pub struct RemoteDelegate<A, S = BincodeSerializer> {
    engine: NetworkEngine,
    endpoint: u16,
    serializer: Arc<S>,
    _args: PhantomData<fn(A)>,
}

impl<A> RemoteDelegate<A, BincodeSerializer>
where
    BincodeSerializer: Serializer<A>,
{
    pub fn new(engine: NetworkEngine, endpoint: u16) -> Self {
        Self::with_serializer(engine, endpoint, BincodeSerializer)
    }
}

impl<A, S> RemoteDelegate<A, S>
where
    S: Serializer<A>,
{
    pub fn with_serializer(engine: NetworkEngine, endpoint: u16, serializer: S) -> Self {
        Self {
            engine,
            endpoint,
            serializer: Arc::new(serializer),
            _args: PhantomData,
        }
    }

    pub fn endpoint(&self) -> u16 {
        self.endpoint
    }

    /// Send without waiting; returns the sequence number
    pub fn invoke(&self, args: &A) -> Result<u16> {
        let payload = self.encode(args)?;
        self.engine.send(self.endpoint, &payload)
    }

    /// Send and block until acknowledged or failed
    pub fn invoke_wait(&self, args: &A) -> Result<u16> {
        let payload = self.encode(args)?;
        self.engine.send_and_wait(self.endpoint, &payload)
    }

    fn encode(&self, args: &A) -> Result<Vec<u8>> {
        let encoded = self
            .serializer
            .to_vec(args)
            .map_err(|e| e.for_endpoint(self.endpoint));
        self.engine.reported(self.endpoint, encoded)
    }
}

impl<A, S> Clone for RemoteDelegate<A, S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            endpoint: self.endpoint,
            serializer: Arc::clone(&self.serializer),
            _args: PhantomData,
        }
    }
}

impl<A, S> PartialEq for RemoteDelegate<A, S> {
    fn eq(&self, other: &Self) -> bool {
        self.endpoint == other.endpoint && self.engine.ptr_eq(&other.engine)
    }
}

impl<A, S> fmt::Debug for RemoteDelegate<A, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteDelegate")
            .field("endpoint", &self.endpoint)
            .field("args", &std::any::type_name::<A>())
            .finish()
    }
}
