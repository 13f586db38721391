//! Flat key-value storage actor.
//!
//! The Raft actor applies committed entries here and the HTTP façade reads
//! from it. Callers impose all ordering by serializing their calls.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ActorFailure, TransportError};
use crate::runtime::{Actor, ActorContext, ActorRef, ReplyPromise, RestartPolicy, spawn_supervised};

/// Requests understood by the [`StorageActor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageRequest {
    /// Look up a key.
    Get {
        /// Key to read.
        key: String,
    },
    /// Insert or overwrite a key.
    Set {
        /// Key to write.
        key: String,
        /// New value.
        value: String,
    },
    /// Remove a key. Removing a missing key is not an error.
    Delete {
        /// Key to remove.
        key: String,
    },
}

/// Replies of the [`StorageActor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageResponse {
    /// Result of a `Get`; `None` when the key is absent.
    Value(Option<String>),
    /// Acknowledgment of a `Set` or `Delete`.
    Done,
}

/// Actor owning the node's key-value mapping.
#[derive(Debug, Default)]
pub struct StorageActor {
    data: HashMap<String, String>,
}

#[async_trait]
impl Actor for StorageActor {
    type Message = ();
    type Request = StorageRequest;
    type Response = StorageResponse;

    async fn handle_message(
        &mut self,
        _ctx: &ActorContext<Self>,
        _message: (),
    ) -> Result<(), ActorFailure> {
        Ok(())
    }

    async fn handle_call(
        &mut self,
        _ctx: &ActorContext<Self>,
        request: StorageRequest,
        reply: ReplyPromise<StorageResponse>,
    ) -> Result<(), ActorFailure> {
        let response = match request {
            StorageRequest::Get { key } => StorageResponse::Value(self.data.get(&key).cloned()),
            StorageRequest::Set { key, value } => {
                debug!(key = %key, "storage set");
                self.data.insert(key, value);
                StorageResponse::Done
            }
            StorageRequest::Delete { key } => {
                debug!(key = %key, "storage delete");
                self.data.remove(&key);
                StorageResponse::Done
            }
        };
        reply.send(response);
        Ok(())
    }
}

/// Typed client of a [`StorageActor`].
#[derive(Debug, Clone)]
pub struct Storage {
    actor: ActorRef<StorageActor>,
    timeout: Duration,
}

impl Storage {
    /// Spawn a supervised storage actor named `name`.
    pub fn spawn(name: impl Into<String>, timeout: Duration) -> Self {
        let actor = spawn_supervised(name, StorageActor::default, RestartPolicy::default());
        Self { actor, timeout }
    }

    /// Read a key.
    pub async fn get(&self, key: &str) -> Result<Option<String>, TransportError> {
        let request = StorageRequest::Get {
            key: key.to_string(),
        };
        match self.actor.call(request, self.timeout).await? {
            StorageResponse::Value(value) => Ok(value),
            StorageResponse::Done => Err(self.unexpected()),
        }
    }

    /// Write a key.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), TransportError> {
        let request = StorageRequest::Set {
            key: key.to_string(),
            value: value.to_string(),
        };
        self.expect_done(request).await
    }

    /// Delete a key.
    pub async fn delete(&self, key: &str) -> Result<(), TransportError> {
        let request = StorageRequest::Delete {
            key: key.to_string(),
        };
        self.expect_done(request).await
    }

    async fn expect_done(&self, request: StorageRequest) -> Result<(), TransportError> {
        match self.actor.call(request, self.timeout).await? {
            StorageResponse::Done => Ok(()),
            StorageResponse::Value(_) => Err(self.unexpected()),
        }
    }

    fn unexpected(&self) -> TransportError {
        TransportError::UnexpectedReply(self.actor.name().to_string())
    }
}
