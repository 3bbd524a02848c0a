//! Last-value-cached publish/subscribe channel.
//!
//! A [`StateBroadcaster`] remembers the newest published state. Every new
//! subscriber first receives that state, then each later publish in order.
//! All bookkeeping happens on a single coordination task, so publishers and
//! subscribers never touch the subscriber list directly.
//!
//! Every subscriber has a bounded feed. A subscriber that lets its feed fill
//! up is disconnected: its feed is closed and it stops receiving updates.
//! Publishing therefore never waits on a slow reader, and a connected
//! subscriber always sees an ordered, gap-free sequence of states.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("state broadcaster has ended")]
    Ended,
}

enum Command<T> {
    Subscribe {
        id: u64,
        feed: mpsc::Sender<T>,
        ack: oneshot::Sender<()>,
    },
    Unsubscribe(u64),
    Publish(T),
    End,
}

/// Handle to a running broadcaster. Cheap to clone; all clones share the same state.
pub struct StateBroadcaster<T> {
    commands: mpsc::UnboundedSender<Command<T>>,
    next_subscriber: Arc<AtomicU64>,
    buffer: usize,
}

impl<T> Clone for StateBroadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            next_subscriber: self.next_subscriber.clone(),
            buffer: self.buffer,
        }
    }
}

impl<T: Clone + Send + 'static> StateBroadcaster<T> {
    /// Seed the cached state and spawn the coordination loop.
    ///
    /// `buffer` is the number of undelivered states a subscriber may lag
    /// behind before it is disconnected.
    pub fn start(initial: T, buffer: usize) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator {
            state: initial,
            subscribers: Vec::new(),
        };
        tokio::spawn(coordinator.run(rx));

        Self {
            commands,
            next_subscriber: Arc::new(AtomicU64::new(0)),
            buffer: buffer.max(1),
        }
    }

    /// Publish a copy of `state`. Returns `false` if the broadcaster has ended.
    pub fn publish(&self, state: &T) -> bool {
        self.commands.send(Command::Publish(state.clone())).is_ok()
    }

    /// Register a listener. Its feed starts with the current state.
    pub async fn subscribe(&self) -> Result<Subscription<T>, BroadcastError> {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (feed_tx, feed_rx) = mpsc::channel(self.buffer);
        let (ack_tx, ack_rx) = oneshot::channel();

        self.commands
            .send(Command::Subscribe { id, feed: feed_tx, ack: ack_tx })
            .map_err(|_| BroadcastError::Ended)?;
        ack_rx.await.map_err(|_| BroadcastError::Ended)?;

        Ok(Subscription {
            id,
            feed: feed_rx,
            commands: self.commands.clone(),
            subscribed: true,
        })
    }

    /// Stop the coordination loop and close every open feed
    pub fn end(&self) {
        if self.commands.send(Command::End).is_err() {
            debug!("State broadcaster already ended");
        }
    }
}

struct Coordinator<T> {
    state: T,
    subscribers: Vec<(u64, mpsc::Sender<T>)>,
}

impl<T: Clone + Send + 'static> Coordinator<T> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command<T>>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Subscribe { id, feed, ack } => {
                    if feed.try_send(self.state.clone()).is_ok() {
                        self.subscribers.push((id, feed));
                    }
                    let _ = ack.send(());
                }
                Command::Unsubscribe(id) => {
                    self.subscribers.retain(|(subscriber, _)| *subscriber != id);
                }
                Command::Publish(state) => {
                    self.state = state;
                    self.notify();
                }
                Command::End => break,
            }
        }
        // Dropping the senders closes every remaining feed
        debug!("State broadcaster closing {} feeds", self.subscribers.len());
    }

    fn notify(&mut self) {
        let state = &self.state;
        self.subscribers.retain(|(id, feed)| match feed.try_send(state.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Disconnecting subscriber {}: feed is full", id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }
}

/// A listener's feed of states.
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription<T> {
    id: u64,
    feed: mpsc::Receiver<T>,
    commands: mpsc::UnboundedSender<Command<T>>,
    subscribed: bool,
}

impl<T> Subscription<T> {
    /// Next state, or `None` once the feed is closed
    pub async fn recv(&mut self) -> Option<T> {
        self.feed.recv().await
    }

    /// Stop receiving updates. The feed closes once the broadcaster processes the request.
    pub fn unsubscribe(&mut self) {
        if self.subscribed {
            self.subscribed = false;
            let _ = self.commands.send(Command::Unsubscribe(self.id));
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().feed.poll_recv(cx)
    }
}
