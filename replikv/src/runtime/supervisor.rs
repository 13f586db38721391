//! One-for-one supervision of a single actor.
//!
//! The supervisor owns the actor's mailbox, so the actor's name and every
//! [`ActorRef`] handed out stay valid across restarts. Each restart builds a
//! brand-new actor from the factory: no state survives a failure.
//!
//! ```text
//! spawn ──► factory() ──► init ──► handle envelopes ... ──► ActorFailure
//!               ▲                                              │
//!               └──────── within restart intensity? ◄──────────┘
//!                              │ no
//!                              ▼
//!                     mailbox dropped, callers see MailboxClosed
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::ActorFailure;

use super::actor::{Actor, ActorContext, ActorRef, Envelope};

/// How many restarts are tolerated within a sliding period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Maximum restarts within `period`.
    pub intensity: u32,
    /// Length of the sliding window.
    pub period: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            intensity: 2,
            period: Duration::from_secs(5),
        }
    }
}

/// Spawn an actor under supervision and return a handle on its mailbox.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_supervised<A, F>(name: impl Into<String>, factory: F, policy: RestartPolicy) -> ActorRef<A>
where
    A: Actor,
    F: Fn() -> A + Send + 'static,
{
    let name: Arc<str> = Arc::from(name.into());
    let (sender, mailbox) = mpsc::unbounded_channel();
    let ctx = ActorContext::new(name.clone(), sender.downgrade());
    tokio::spawn(supervise(factory, ctx, mailbox, policy));
    ActorRef::new(name, sender)
}

async fn supervise<A, F>(
    factory: F,
    ctx: ActorContext<A>,
    mut mailbox: mpsc::UnboundedReceiver<Envelope<A>>,
    policy: RestartPolicy,
) where
    A: Actor,
    F: Fn() -> A + Send + 'static,
{
    let mut restarts: VecDeque<Instant> = VecDeque::new();

    loop {
        let mut actor = factory();
        info!(actor = ctx.name(), "actor started");

        match run(&mut actor, &ctx, &mut mailbox).await {
            Ok(()) => {
                debug!(actor = ctx.name(), "mailbox closed, actor stopped");
                return;
            }
            Err(failure) => {
                error!(actor = ctx.name(), error = %failure, "actor terminated");

                let now = Instant::now();
                while restarts
                    .front()
                    .is_some_and(|at| now.duration_since(*at) > policy.period)
                {
                    restarts.pop_front();
                }
                if restarts.len() >= policy.intensity as usize {
                    error!(
                        actor = ctx.name(),
                        intensity = policy.intensity,
                        "restart intensity exceeded, giving up"
                    );
                    return;
                }
                restarts.push_back(now);
                warn!(actor = ctx.name(), "restarting actor with fresh state");
            }
        }
    }
}

async fn run<A: Actor>(
    actor: &mut A,
    ctx: &ActorContext<A>,
    mailbox: &mut mpsc::UnboundedReceiver<Envelope<A>>,
) -> Result<(), ActorFailure> {
    actor.init(ctx).await?;
    while let Some(envelope) = mailbox.recv().await {
        match envelope {
            Envelope::Message(message) => actor.handle_message(ctx, message).await?,
            Envelope::Call(request, reply) => actor.handle_call(ctx, request, reply).await?,
        }
    }
    Ok(())
}
