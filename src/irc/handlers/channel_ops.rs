//! JOIN and PART for local clients, and SJOIN for bursted or relayed
//! remote memberships.
use std::sync::Arc;

use tracing::{debug, warn};

use crate::irc::channels::Channel;
use crate::irc::core::Core;
use crate::irc::ident::owning_sid;
use crate::irc::message::Message;
use crate::irc::numeric;

/// `JOIN <chan>{,<chan>}` from a local client.
pub async fn join(_cmd: String, msg: Message, core: Arc<Core>) {
    let uid = msg.sender_id.clone();

    for name in msg.args[0].split(',') {
        let chan = match core.channels.get_channel(name, true) {
            Ok(chan) => chan,
            Err(num) => {
                core.to_client(num.message_for(&uid)).await;
                continue;
            }
        };

        let notify = match core.channels.join(&chan, &[&uid]) {
            Ok(notify) => notify,
            Err(num) => {
                core.to_client(num.message_for(&uid)).await;
                continue;
            }
        };

        let local: Vec<String> = notify
            .into_iter()
            .filter(|member| owning_sid(member) == core.sid())
            .collect();
        core.to_client(Message::new(Some(&uid), "JOIN", &[chan.name()]).to(local))
            .await;
        core.to_client(names_reply(&core, &chan).to(vec![uid.clone()]))
            .await;

        // Peers learn of the membership through an SJOIN carrying the
        // channel TS.
        for sid in core.topology.server_iter() {
            core.to_server(
                Message::new(Some(core.sid()), "SJOIN", &[&chan.ts(), chan.name(), "+", &uid])
                    .to(vec![sid]),
            )
            .await;
        }
    }
}

/// `PART <chan> [<reason>]` from a local client.
pub async fn part(_cmd: String, msg: Message, core: Arc<Core>) {
    let uid = msg.sender_id.clone();

    for name in msg.args[0].split(',') {
        let chan = match core.channels.get_channel(name, false) {
            Ok(chan) => chan,
            Err(num) => {
                core.to_client(num.message_for(&uid)).await;
                continue;
            }
        };

        let notify = match core.channels.part(&chan, &uid) {
            Ok(notify) => notify,
            Err(num) => {
                core.to_client(num.message_for(&uid)).await;
                continue;
            }
        };

        // The pre-part member set covers the leaver and the remainder.
        let local: Vec<String> = notify
            .into_iter()
            .filter(|member| owning_sid(member) == core.sid())
            .collect();
        core.to_client(Message::new(Some(&uid), "PART", &[chan.name()]).to(local))
            .await;

        for sid in core.topology.server_iter() {
            core.to_server(
                Message::new(Some(&uid), "PART", &[chan.name()]).to(vec![sid]),
            )
            .await;
        }
    }
}

/// `SJOIN <ts> <chan> <modes> :<uid>{ <uid>}` from a peer: join each
/// listed user, notify local members, and pass it along.
pub async fn sjoin(_cmd: String, msg: Message, core: Arc<Core>) {
    let name = &msg.args[1];
    let chan = match core.channels.get_channel(name, true) {
        Ok(chan) => chan,
        Err(num) => {
            warn!(%name, error = %num, "SJOIN for invalid channel");
            return;
        }
    };

    for uid in msg.args[3].split_whitespace() {
        let notify = match core.channels.join(&chan, &[uid]) {
            Ok(notify) => notify,
            Err(num) => {
                debug!(%uid, error = %num, "SJOIN member skipped");
                continue;
            }
        };

        let local: Vec<String> = notify
            .into_iter()
            .filter(|member| owning_sid(member) == core.sid() && member != uid)
            .collect();
        if !local.is_empty() {
            core.to_client(Message::new(Some(uid), "JOIN", &[chan.name()]).to(local))
                .await;
        }
    }

    for sid in core.topology.server_iter() {
        if sid != msg.sender_id {
            let mut dup = msg.dup();
            dup.dest_ids = vec![sid];
            core.to_server(dup).await;
        }
    }
}

/// The `RPL_NAMREPLY` for a channel, with the `"*"` placeholder target
/// personalised at delivery.
fn names_reply(core: &Arc<Core>, chan: &Arc<Channel>) -> Message {
    let mut nicks = Vec::new();
    for id in chan.user_ids() {
        match core.users.info(&id) {
            Some((nick, _, _, _)) => nicks.push(nick),
            None => warn!(%id, chan = %chan.name(), "unknown member"),
        }
    }
    nicks.sort();
    // Privacy symbol: = public, * private, @ secret.
    Message::new(
        None,
        numeric::RplNamReply.digits(),
        &["*", "@", chan.name(), &nicks.join(" ")],
    )
}
