//! The server manager: exclusive owner of the SID → connection table.
//!
//! A remote `ERROR` (or a plain connection close) on a locally-linked
//! peer is treated as an implicit SQUIT: the teardown is synthesised
//! through the normal dispatch path so downstream state cleanup follows
//! the same code as an explicit split. Outbound messages are written
//! UID-for-UID — no nick rewriting happens on the wire between servers.
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::conn::{Conn, SubId};
use super::core::Core;
use super::hooks;
use super::message::{Message, INT_DELUSER};

/// The channel ends the server manager works.
pub struct PeerEvents {
    pub new_server: mpsc::Receiver<Conn>,
    pub closing: mpsc::Receiver<String>,
    pub closing_tx: mpsc::Sender<String>,
    pub from_server: mpsc::Receiver<Message>,
    pub from_server_tx: mpsc::Sender<Message>,
    pub to_server: mpsc::Receiver<Message>,
}

struct Entry {
    conn: Conn,
    sub: SubId,
    close_sub: SubId,
}

/// Synthesise the SQUIT that cleans up after a dead locally-linked peer.
fn implicit_squit(core: &Arc<Core>, sid: &str, reason: &str) {
    let mut msg = Message::new(None, "SQUIT", &[sid, reason]);
    msg.sender_id = sid.to_owned();
    hooks::dispatch_server(core, msg);
}

/// The manager loop. Exits when the outbound queue closes.
pub async fn run(core: Arc<Core>, mut ev: PeerEvents) {
    let mut sid2conn: HashMap<String, Entry> = HashMap::new();
    let mut accepting = true;

    loop {
        tokio::select! {
            // New links are registered before any replayed handshake
            // message is processed.
            biased;

            conn = ev.new_server.recv(), if accepting => {
                let Some(mut conn) = conn else { accepting = false; continue };
                let sid = conn.id();
                let _ = core.topology.get_server(&sid, true);
                let sub = conn.subscribe(ev.from_server_tx.clone());
                let close_sub = conn.subscribe_close(ev.closing_tx.clone());
                debug!(%sid, "registered server connection");
                sid2conn.insert(sid, Entry { conn, sub, close_sub });
            }

            closed = ev.closing.recv() => {
                // Never `None`: we hold a sender half ourselves.
                let Some(sid) = closed else { continue };
                debug!(%sid, "connection closed");
                sid2conn.remove(&sid);
                if core.topology.is_local(&sid) {
                    implicit_squit(&core, &sid, "Connection close");
                }
            }

            msg = ev.from_server.recv() => {
                let Some(msg) = msg else { continue };
                let sid = msg.sender_id.clone();

                if !sid2conn.contains_key(&sid) {
                    debug!(%sid, %msg, "server >> [dropping]");
                    continue;
                }
                debug!(%sid, %msg, "server >>");

                if msg.command == "ERROR" {
                    debug!(%sid, "connection terminated remotely");
                    if let Some(entry) = sid2conn.remove(&sid) {
                        entry.conn.unsubscribe(entry.sub);
                        entry.conn.unsubscribe_close(entry.close_sub);
                        let mut conn = entry.conn;
                        conn.close().await;
                    }
                    if core.topology.is_local(&sid) {
                        implicit_squit(&core, &sid, "Unexpected ERROR on connection");
                    }
                    continue;
                }

                hooks::dispatch_server(&core, msg);
            }

            msg = ev.to_server.recv() => {
                let Some(msg) = msg else { break };

                if msg.command == INT_DELUSER {
                    warn!("internal token on the server queue, refusing");
                    continue;
                }

                let mut sent = 0;
                for dest in &msg.dest_ids {
                    match sid2conn.get_mut(dest) {
                        Some(entry) => {
                            debug!(%dest, %msg, "server <<");
                            entry.conn.write_message(&msg).await;
                            sent += 1;
                        }
                        None => warn!(%dest, "unknown SID"),
                    }
                }
                if sent == 0 {
                    warn!(%msg, "dropped outgoing server message");
                }
            }
        }
    }
}
