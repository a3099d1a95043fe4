//! A connection: a framed duplex byte stream with an identity and two
//! fan-out sets — message subscribers and close subscribers.
//!
//! The read task starts lazily on the first subscription. It stamps each
//! parsed message with the connection's current identity and broadcasts
//! it to every subscriber; on read error or EOF it marks the connection
//! inactive and hands the identity to every close subscriber.
//!
//! The writer is only ever touched by the manager that owns the
//! connection, so writes are naturally serialised.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use super::codec::IrcCodec;
use super::ident::UID_LEN;
use super::message::{Message, INT_DELUSER};

/// A subscription token, for later removal.
pub type SubId = u64;

#[derive(Debug)]
struct Shared {
    id: RwLock<String>,
    active: AtomicBool,
    next_token: AtomicU64,
    subscribers: Mutex<HashMap<SubId, mpsc::Sender<Message>>>,
    on_close: Mutex<HashMap<SubId, mpsc::Sender<String>>>,
}

impl Shared {
    fn id(&self) -> String {
        self.id.read().unwrap().clone()
    }

    async fn notify_close(&self) {
        let id = self.id();
        let sinks: Vec<_> = self.on_close.lock().unwrap().values().cloned().collect();
        for tx in sinks {
            let _ = tx.send(id.clone()).await;
        }
    }

    /// Close notification that never blocks the caller. Needed on the
    /// write path: the writer is driven by the very manager task that
    /// consumes the close channel, so a blocking send could deadlock.
    fn notify_close_detached(&self) {
        let id = self.id();
        let sinks: Vec<_> = self.on_close.lock().unwrap().values().cloned().collect();
        for tx in sinks {
            let id = id.clone();
            tokio::spawn(async move {
                let _ = tx.send(id).await;
            });
        }
    }
}

/// One accepted byte stream.
#[derive(Debug)]
pub struct Conn {
    shared: Arc<Shared>,
    writer: FramedWrite<OwnedWriteHalf, IrcCodec>,
    reader: Option<FramedRead<OwnedReadHalf, IrcCodec>>,
}

impl Conn {
    /// Wrap an accepted stream. `id` is the freshly allocated UID; the
    /// ingress multiplexer rebinds it if the handshake turns out to be a
    /// peer server.
    pub fn new(stream: TcpStream, id: String) -> Conn {
        debug!(%id, "connected");
        let (read_half, write_half) = stream.into_split();
        Conn {
            shared: Arc::new(Shared {
                id: RwLock::new(id),
                active: AtomicBool::new(true),
                next_token: AtomicU64::new(0),
                subscribers: Mutex::new(HashMap::new()),
                on_close: Mutex::new(HashMap::new()),
            }),
            writer: FramedWrite::new(write_half, IrcCodec::default()),
            reader: Some(FramedRead::new(read_half, IrcCodec::default())),
        }
    }

    /// The current identity (UID, or SID after rebinding).
    pub fn id(&self) -> String {
        self.shared.id()
    }

    pub fn active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Rebind the identity to the SID a peer announced. Only legal while
    /// the identity is still the originally-allocated UID.
    pub fn set_server(&self, sid: &str) {
        let mut id = self.shared.id.write().unwrap();
        assert_eq!(id.len(), UID_LEN, "identity rebound twice");
        *id = sid.to_owned();
    }

    /// Subscribe to parsed inbound messages. The read task starts on the
    /// first subscription.
    pub fn subscribe(&mut self, tx: mpsc::Sender<Message>) -> SubId {
        let token = self.shared.next_token.fetch_add(1, Ordering::SeqCst);
        self.shared.subscribers.lock().unwrap().insert(token, tx);

        if let Some(reader) = self.reader.take() {
            tokio::spawn(read_loop(reader, Arc::clone(&self.shared)));
        }

        token
    }

    pub fn unsubscribe(&self, token: SubId) {
        self.shared.subscribers.lock().unwrap().remove(&token);
    }

    /// Subscribe to the close notification; the connection's identity at
    /// close time is delivered.
    pub fn subscribe_close(&self, tx: mpsc::Sender<String>) -> SubId {
        let token = self.shared.next_token.fetch_add(1, Ordering::SeqCst);
        self.shared.on_close.lock().unwrap().insert(token, tx);
        token
    }

    pub fn unsubscribe_close(&self, token: SubId) {
        self.shared.on_close.lock().unwrap().remove(&token);
    }

    /// Serialise and write one message. On failure the connection is
    /// marked inactive, closed, and the close subscribers are notified.
    pub async fn write_message(&mut self, msg: &Message) {
        if msg.command == INT_DELUSER {
            warn!(id = %self.id(), "refusing to serialise internal token");
            return;
        }
        if !self.active() {
            return;
        }
        if let Err(e) = self.writer.send(msg.dup()).await {
            debug!(id = %self.id(), error = %e, "write failed");
            self.shared.active.store(false, Ordering::SeqCst);
            self.shared.notify_close_detached();
        }
    }

    /// Mark inactive, flush, and notify close subscribers. Callers that
    /// initiated the close themselves should unsubscribe their close
    /// channel first.
    pub async fn close(&mut self) {
        self.shared.active.store(false, Ordering::SeqCst);
        let _ = self.writer.close().await;
        self.shared.notify_close().await;
    }
}

async fn read_loop(mut reader: FramedRead<OwnedReadHalf, IrcCodec>, shared: Arc<Shared>) {
    while shared.active.load(Ordering::SeqCst) {
        match reader.next().await {
            Some(Ok(mut msg)) => {
                msg.sender_id = shared.id();
                let sinks: Vec<_> = shared.subscribers.lock().unwrap().values().cloned().collect();
                for tx in sinks {
                    if tx.send(msg.dup()).await.is_err() {
                        debug!(id = %msg.sender_id, "subscriber gone");
                    }
                }
            }
            Some(Err(e)) => {
                debug!(id = %shared.id(), error = %e, "read error");
                break;
            }
            None => break,
        }
    }
    shared.active.store(false, Ordering::SeqCst);
    shared.notify_close().await;
}
