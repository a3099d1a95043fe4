//! PRIVMSG and NOTICE fan-out.
//!
//! Recipients are comma-split. Channel recipients split into a local
//! half (one queued message, many destinations) and a remote half (one
//! message per peer link that leads to a member, skipping the link the
//! message came from). NOTICE suppresses error numerics.
use std::sync::Arc;

use tracing::debug;

use crate::irc::core::Core;
use crate::irc::ident::{owning_sid, valid_channel, UID_LEN};
use crate::irc::message::Message;

pub async fn privmsg(cmd: String, msg: Message, core: Arc<Core>) {
    let quiet = cmd == "NOTICE";
    let text = &msg.args[1];

    // A server-relayed message names its true origin in the prefix.
    let sender = match msg.prefix.as_deref() {
        Some(prefix) if prefix.len() == UID_LEN => prefix.to_owned(),
        _ => msg.sender_id.clone(),
    };

    let mut local = Vec::new();
    let mut remote = Vec::new();

    for name in msg.args[0].split(',') {
        if valid_channel(name) {
            let chan = match core.channels.get_channel(name, false) {
                Ok(chan) => chan,
                Err(num) => {
                    if !quiet {
                        core.to_client(num.message_for(&msg.sender_id)).await;
                    }
                    continue;
                }
            };

            let mut chan_local = Vec::new();
            let mut chan_remote = Vec::new();
            for uid in chan.user_ids() {
                if uid == sender {
                    continue;
                }
                if owning_sid(&uid) == core.sid() {
                    chan_local.push(uid);
                } else {
                    chan_remote.push(uid);
                }
            }

            if !chan_remote.is_empty() {
                for sid in core.topology.iter_for(&chan_remote, &msg.sender_id) {
                    debug!(from = %msg.sender_id, to = %sid, "forwarding {cmd}");
                    core.to_server(
                        Message::new(Some(&sender), &cmd, &[chan.name(), text]).to(vec![sid]),
                    )
                    .await;
                }
            }
            if !chan_local.is_empty() {
                core.to_client(
                    Message::new(Some(&sender), &cmd, &[chan.name(), text]).to(chan_local),
                )
                .await;
            }
            continue;
        }

        match core.users.get_id(name) {
            Ok(id) => {
                if owning_sid(&id) == core.sid() {
                    local.push(id);
                } else {
                    remote.push(id);
                }
            }
            Err(num) => {
                if !quiet {
                    core.to_client(num.message_for(&msg.sender_id)).await;
                }
            }
        }
    }

    for id in &remote {
        for sid in core.topology.iter_for(std::slice::from_ref(id), "") {
            core.to_server(Message::new(Some(&sender), &cmd, &[id, text]).to(vec![sid]))
                .await;
        }
    }
    if !local.is_empty() {
        // `*` is personalised to each recipient's nick at delivery.
        core.to_client(Message::new(Some(&sender), &cmd, &["*", text]).to(local))
            .await;
    }
}
