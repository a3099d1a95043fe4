//! The ingress multiplexer: watches the early handshake of every new
//! connection, classifies it as client or server by content, and hands it
//! to the matching manager with the buffered messages replayed.
//!
//! Classification is content-based, not port-based: `NICK` + `USER`
//! makes a client; `PASS` + `SERVER` + `CAPAB` makes a server, with the
//! SID taken from `PASS`'s fourth argument. A connection that closes
//! mid-handshake is discarded silently; handshake timeouts are an
//! external concern.
use tokio::sync::mpsc;
use tracing::debug;

use super::conn::Conn;
use super::message::Message;

/// The channels a classified connection is handed off through.
#[derive(Clone)]
pub struct Handoff {
    pub new_client: mpsc::Sender<Conn>,
    pub new_server: mpsc::Sender<Conn>,
    pub from_client: mpsc::Sender<Message>,
    pub from_server: mpsc::Sender<Message>,
}

/// Accept connections off the incoming queue forever, spawning one
/// classification task per connection.
pub async fn run(mut incoming: mpsc::UnboundedReceiver<Conn>, handoff: Handoff) {
    while let Some(conn) = incoming.recv().await {
        tokio::spawn(classify(conn, handoff.clone()));
    }
}

async fn classify(mut conn: Conn, handoff: Handoff) {
    let (inbox_tx, mut inbox) = mpsc::channel(8);
    let (stop_tx, mut stop) = mpsc::channel(1);
    let sub = conn.subscribe(inbox_tx);
    let close_sub = conn.subscribe_close(stop_tx);

    let (mut nick, mut user) = (false, false);
    let (mut pass, mut server, mut capab) = (false, false, false);
    let mut sid = String::new();

    let mut queued: Vec<Message> = Vec::with_capacity(3);

    loop {
        tokio::select! {
            msg = inbox.recv() => {
                let Some(msg) = msg else { return };
                debug!(id = %msg.sender_id, %msg, "handshake");
                match msg.command.as_str() {
                    "PASS" => {
                        if msg.args.len() == 4 {
                            pass = true;
                            sid = msg.args[3].clone();
                        }
                    }
                    "USER" => user = true,
                    "NICK" => nick = true,
                    "CAPAB" => capab = true,
                    "SERVER" => server = true,
                    _ => {}
                }
                queued.push(msg);
            }
            _ = stop.recv() => {
                // Closed during the handshake: discard silently.
                return;
            }
        }

        if nick && user {
            conn.unsubscribe(sub);
            conn.unsubscribe_close(close_sub);
            if handoff.new_client.send(conn).await.is_err() {
                return;
            }
            for msg in queued {
                let _ = handoff.from_client.send(msg).await;
            }
            return;
        }

        if pass && server && capab {
            conn.set_server(&sid);
            conn.unsubscribe(sub);
            conn.unsubscribe_close(close_sub);
            if handoff.new_server.send(conn).await.is_err() {
                return;
            }
            for mut msg in queued {
                msg.sender_id = sid.clone();
                let _ = handoff.from_server.send(msg).await;
            }
            return;
        }
    }
}
