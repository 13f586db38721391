//! Actor trait, mailboxes and request/response correlation.
//!
//! Every actor owns a single unbounded mailbox. Envelopes are either
//! fire-and-forget messages or calls carrying a [`ReplyPromise`]; the actor
//! handles them one at a time, in arrival order.
//!
//! ```text
//!   ActorRef::send ──► Envelope::Message ──┐
//!                                          ├──► mailbox ──► handle_message / handle_call
//!   ActorRef::call ──► Envelope::Call ─────┘                        │
//!         ▲                                                         │
//!         └──────────────── oneshot ◄──── ReplyPromise::send ◄──────┘
//! ```
//!
//! A call handler may keep the promise and answer later (the Raft actor
//! answers client writes only after commit); the caller simply keeps waiting
//! until the reply arrives or its timeout elapses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{ActorFailure, TransportError};

use super::timer::ScheduledTask;

/// Behaviour of an actor: initialisation plus message and call handling.
///
/// Handlers run to completion before the next envelope is dequeued. Returning
/// an [`ActorFailure`] terminates the current incarnation of the actor; the
/// supervisor then builds a fresh one from its factory.
#[async_trait]
pub trait Actor: Send + Sized + 'static {
    /// Fire-and-forget messages, including the actor's own timer messages.
    type Message: Send + 'static;

    /// Requests that expect a reply.
    type Request: Send + 'static;

    /// Replies to [`Actor::Request`].
    type Response: Send + 'static;

    /// Called once per incarnation, before the first envelope.
    async fn init(&mut self, _ctx: &ActorContext<Self>) -> Result<(), ActorFailure> {
        Ok(())
    }

    /// Handle a fire-and-forget message.
    async fn handle_message(
        &mut self,
        ctx: &ActorContext<Self>,
        message: Self::Message,
    ) -> Result<(), ActorFailure>;

    /// Handle a call. The reply may be sent now or stored and sent later.
    async fn handle_call(
        &mut self,
        ctx: &ActorContext<Self>,
        request: Self::Request,
        reply: ReplyPromise<Self::Response>,
    ) -> Result<(), ActorFailure>;
}

/// Unit of work sitting in an actor's mailbox.
pub enum Envelope<A: Actor> {
    /// A message that expects no reply.
    Message(A::Message),
    /// A request and the promise used to answer it.
    Call(A::Request, ReplyPromise<A::Response>),
}

/// Server side of a call: answers the waiting caller exactly once.
#[derive(Debug)]
pub struct ReplyPromise<T> {
    sender: oneshot::Sender<T>,
}

impl<T> ReplyPromise<T> {
    /// Send the reply. A caller that already timed out is silently skipped.
    pub fn send(self, value: T) {
        if self.sender.send(value).is_err() {
            debug!("caller went away before the reply was sent");
        }
    }
}

/// Create a connected promise/receiver pair outside of an actor mailbox.
pub fn reply_channel<T>() -> (ReplyPromise<T>, oneshot::Receiver<T>) {
    let (sender, receiver) = oneshot::channel();
    (ReplyPromise { sender }, receiver)
}

/// Handle used to reach an actor's mailbox.
pub struct ActorRef<A: Actor> {
    name: Arc<str>,
    sender: mpsc::UnboundedSender<Envelope<A>>,
}

impl<A: Actor> Clone for ActorRef<A> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            sender: self.sender.clone(),
        }
    }
}

impl<A: Actor> std::fmt::Debug for ActorRef<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRef").field("name", &self.name).finish()
    }
}

impl<A: Actor> ActorRef<A> {
    pub(crate) fn new(name: Arc<str>, sender: mpsc::UnboundedSender<Envelope<A>>) -> Self {
        Self { name, sender }
    }

    /// Registered name of the actor.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the actor has stopped for good.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Enqueue a message without waiting.
    pub fn send(&self, message: A::Message) -> Result<(), TransportError> {
        self.sender
            .send(Envelope::Message(message))
            .map_err(|_| TransportError::MailboxClosed(self.name.to_string()))
    }

    /// Enqueue a request and wait for the reply, at most `timeout`.
    pub async fn call(
        &self,
        request: A::Request,
        timeout: Duration,
    ) -> Result<A::Response, TransportError> {
        let (promise, receiver) = reply_channel();
        self.sender
            .send(Envelope::Call(request, promise))
            .map_err(|_| TransportError::MailboxClosed(self.name.to_string()))?;

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TransportError::ReplyDropped(self.name.to_string())),
            Err(_) => Err(TransportError::Timeout(self.name.to_string())),
        }
    }
}

/// Per-incarnation context handed to every handler.
///
/// Holds only a weak handle on the actor's own mailbox so that the actor
/// stops once every external [`ActorRef`] is gone.
pub struct ActorContext<A: Actor> {
    name: Arc<str>,
    mailbox: mpsc::WeakUnboundedSender<Envelope<A>>,
}

impl<A: Actor> ActorContext<A> {
    pub(crate) fn new(name: Arc<str>, mailbox: mpsc::WeakUnboundedSender<Envelope<A>>) -> Self {
        Self { name, mailbox }
    }

    /// Registered name of the actor.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deliver `message` to this actor after `delay`.
    ///
    /// Dropping or cancelling the returned handle before it fires prevents
    /// delivery.
    pub fn send_after(&self, message: A::Message, delay: Duration) -> ScheduledTask {
        let mailbox = self.mailbox.clone();
        ScheduledTask::spawn(delay, async move {
            if let Some(sender) = mailbox.upgrade() {
                // A closed mailbox means the actor is shutting down.
                let _ = sender.send(Envelope::Message(message));
            }
        })
    }
}
