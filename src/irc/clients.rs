//! The client manager: exclusive owner of the UID → connection table.
//!
//! Inbound messages go to the client dispatcher; outbound messages are
//! rewritten (UID → nick, `"*"` personalisation, ERROR close semantics)
//! and written to the right local sockets. User-record deletion for
//! netsplits arrives as `INT_DELUSER` on the same outbound queue, which
//! orders it after any still-queued messages for those users.
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::config::Config;
use super::conn::{Conn, SubId};
use super::core::Core;
use super::hooks;
use super::ident::{is_uid, owning_sid, HOST_PLACEHOLDER, SID_LEN};
use super::message::{Message, INT_DELUSER};
use super::users::Users;

/// The channel ends the client manager works.
pub struct ClientEvents {
    pub new_client: mpsc::Receiver<Conn>,
    pub closing: mpsc::Receiver<String>,
    pub closing_tx: mpsc::Sender<String>,
    pub from_client: mpsc::Receiver<Message>,
    pub from_client_tx: mpsc::Sender<Message>,
    pub to_client: mpsc::Receiver<Message>,
}

struct Entry {
    conn: Conn,
    sub: SubId,
    close_sub: SubId,
}

/// The manager loop. Exits when the outbound queue closes.
pub async fn run(core: Arc<Core>, mut ev: ClientEvents) {
    let mut uid2conn: HashMap<String, Entry> = HashMap::new();
    let mut accepting = true;

    loop {
        tokio::select! {
            // New connections are registered before any replayed
            // handshake message is processed.
            biased;

            conn = ev.new_client.recv(), if accepting => {
                let Some(mut conn) = conn else { accepting = false; continue };
                let uid = conn.id();
                core.users.get_user(&uid);
                let sub = conn.subscribe(ev.from_client_tx.clone());
                let close_sub = conn.subscribe_close(ev.closing_tx.clone());
                debug!(%uid, "registered client connection");
                uid2conn.insert(uid, Entry { conn, sub, close_sub });
            }

            closed = ev.closing.recv() => {
                // Never `None`: we hold a sender half ourselves.
                let Some(uid) = closed else { continue };
                debug!(%uid, "connection closed");
                core.users.delete(&uid);
                uid2conn.remove(&uid);
            }

            msg = ev.from_client.recv() => {
                let Some(msg) = msg else { continue };
                let uid = msg.sender_id.clone();
                core.users.get_user(&uid);

                if msg.command == "ERROR" {
                    // The stream is dead: tear down without dispatching.
                    debug!(%uid, "connection terminated remotely");
                    core.users.delete(&uid);
                    if let Some(entry) = uid2conn.remove(&uid) {
                        entry.conn.unsubscribe(entry.sub);
                        entry.conn.unsubscribe_close(entry.close_sub);
                        let mut conn = entry.conn;
                        conn.close().await;
                    }
                    continue;
                }

                debug!(%uid, %msg, "client >>");
                hooks::dispatch_client(&core, msg);
            }

            msg = ev.to_client.recv() => {
                let Some(msg) = msg else { break };
                deliver(&core, &mut uid2conn, msg).await;
            }
        }
    }
}

async fn deliver(core: &Arc<Core>, uid2conn: &mut HashMap<String, Entry>, msg: Message) {
    // Internal messages first: deletion rides this queue so that it
    // drains after any messages still queued for these users.
    if msg.command == INT_DELUSER {
        for uid in &msg.dest_ids {
            debug!(%uid, "netsplit");
            core.users.delete(uid);
        }
        return;
    }

    let Some(plan) = prepare_delivery(msg, &core.users, &core.config) else {
        return;
    };

    let mut sent = 0;
    for uid in &plan.local {
        match uid2conn.get_mut(uid) {
            None => {
                warn!(%uid, "nonexistent ID in send");
                continue;
            }
            Some(entry) => {
                if plan.personalise_target || plan.personalise_prefix {
                    // One outbound record serves many recipients; each
                    // gets its own nick spliced in.
                    let mut out = plan.msg.dup();
                    let nick = core
                        .users
                        .info(uid)
                        .map(|(nick, _, _, _)| nick)
                        .unwrap_or_else(|| "*".into());
                    if plan.personalise_target {
                        out.args[0] = nick.clone();
                    }
                    if plan.personalise_prefix {
                        out.prefix = Some(nick);
                    }
                    entry.conn.write_message(&out).await;
                } else {
                    entry.conn.write_message(&plan.msg).await;
                }
                debug!(%uid, msg = %plan.msg, "client <<");
                sent += 1;
            }
        }

        if plan.close_after {
            debug!(%uid, "connection terminated");
            core.users.delete(uid);
            if let Some(entry) = uid2conn.remove(uid) {
                entry.conn.unsubscribe(entry.sub);
                entry.conn.unsubscribe_close(entry.close_sub);
                let mut conn = entry.conn;
                conn.close().await;
            }
        }
    }

    if sent == 0 {
        warn!(msg = %plan.msg, "dropped outgoing client message");
    }
}

/// A rewritten outbound message plus its delivery plan.
#[derive(Debug)]
pub(crate) struct Delivery {
    pub msg: Message,
    pub local: Vec<String>,
    pub close_after: bool,
    /// `args[0]` was `"*"`: splice in each recipient's nick.
    pub personalise_target: bool,
    /// The prefix was `"*"`: splice in each recipient's nick.
    pub personalise_prefix: bool,
}

/// Apply the outbound rewriting rules, in order: ERROR close semantics,
/// default server-name prefix, local/remote destination partitioning,
/// UID → `nick!user@host` prefix resolution, UID → nick argument
/// rewriting. Returns `None` when nothing is left to deliver locally.
pub(crate) fn prepare_delivery(
    mut msg: Message,
    users: &Users,
    config: &Config,
) -> Option<Delivery> {
    // `*` as the prefix or first argument is replaced by the nick of
    // each user the message is delivered to.
    let personalise_target = msg.args.first().is_some_and(|a| a == "*");
    let personalise_prefix = msg.prefix.as_deref() == Some("*");

    let mut close_after = false;
    if msg.command == "ERROR" {
        close_after = true;
        msg.prefix = None;
    } else if msg.prefix.as_deref().map_or(true, str::is_empty) {
        msg.prefix = Some(config.name.clone());
    }

    let mut local = Vec::with_capacity(msg.dest_ids.len());
    let mut remote = Vec::new();
    for id in &msg.dest_ids {
        if id.len() >= SID_LEN && owning_sid(id) == config.sid {
            local.push(id.clone());
        } else {
            remote.push(id.clone());
        }
    }

    if !remote.is_empty() {
        if close_after {
            // An ERROR aimed at a remote UID means forced removal.
            for id in &remote {
                users.delete(id);
            }
        } else {
            warn!(count = remote.len(), %msg, "dropping non-local destinations");
        }
        if local.is_empty() {
            return None;
        }
    }

    if let Some(prefix) = msg.prefix.clone() {
        if is_uid(&prefix) {
            match users.info(&prefix) {
                Some((nick, user, _, _)) => {
                    msg.prefix = Some(format!("{nick}!{user}@{HOST_PLACEHOLDER}"));
                }
                None => warn!(%prefix, "nonexistent ID as prefix"),
            }
        }
    }

    for arg in &mut msg.args {
        if is_uid(arg) {
            match users.info(arg) {
                Some((nick, _, _, _)) => *arg = nick,
                None => warn!(id = %arg, "nonexistent ID as argument"),
            }
        }
    }

    Some(Delivery {
        msg,
        local,
        close_after,
        personalise_target,
        personalise_prefix,
    })
}
