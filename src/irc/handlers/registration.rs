//! Connection registration for both roles: the NICK/USER client state
//! machine, the PASS/CAPAB/SERVER peer handshake with its mirror and
//! burst, and the UID/SID import handlers for remote state.
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::irc::core::Core;
use crate::irc::ident::{HOST_PLACEHOLDER, SID_LEN, UID_LEN};
use crate::irc::message::Message;
use crate::irc::numeric::{self, Numeric};
use crate::irc::topology::{Server, ServerType};
use crate::irc::users::UserType;

/// Handle NICK, USER, PASS, CAPAB, and SERVER from an unregistered
/// connection. The sender ID's length says which role is registering.
pub async fn conn_reg(_cmd: String, msg: Message, core: Arc<Core>) {
    match msg.sender_id.len() {
        SID_LEN => server_reg(msg, core).await,
        UID_LEN => client_reg(msg, core).await,
        _ => warn!(sender = %msg.sender_id, "registration from unclassified sender"),
    }
}

async fn client_reg(msg: Message, core: Arc<Core>) {
    let uid = msg.sender_id.clone();

    let result = match msg.command.as_str() {
        // NICK <nick>
        "NICK" => core.users.set_nick(&uid, &msg.args[0]),
        // USER <user> <mode> <unused> :<real name>
        "USER" => core.users.set_user(&uid, &msg.args[0], &msg.args[3]),
        // A would-be server command from a client-classified stream.
        _ => Ok(()),
    };

    if let Err(num) = result {
        core.to_client(num.message_for(&uid)).await;
        return;
    }

    let Some((nick, user, realname, _)) = core.users.info(&uid) else {
        return;
    };
    if nick == "*" || user.is_empty() {
        return; // still mid-handshake
    }

    // The one-shot stage transition is the completion gate: the NICK and
    // USER handlers run concurrently, and only one of them wins it.
    if core
        .users
        .set_type(&uid, UserType::RegisteredAsUser)
        .is_err()
    {
        return;
    }

    // Announce the new user to every peer link.
    let ts = core.users.get_user(&uid).ts();
    for sid in core.topology.server_iter() {
        core.to_server(
            Message::new(
                Some(core.sid()),
                "UID",
                &[
                    &nick,
                    "1",
                    &ts,
                    "+i",
                    &user,
                    HOST_PLACEHOLDER,
                    "127.0.0.1",
                    &uid,
                    &realname,
                ],
            )
            .to(vec![sid]),
        )
        .await;
    }

    send_signon(&core, &uid, &nick).await;
}

/// The welcome batch for a freshly registered user.
async fn send_signon(core: &Arc<Core>, uid: &str, nick: &str) {
    info!(%uid, %nick, "registered");

    let dest = vec![uid.to_owned()];

    let mut msg = Numeric::new(numeric::RplWelcome).message();
    msg.args[1] = format!(
        "Welcome to the {} network, {}!",
        core.config.network.name, nick
    );
    core.to_client(msg.to(dest.clone())).await;

    let mut msg = Numeric::new(numeric::RplYourHost).message();
    msg.args[1] = format!(
        "Your host is {}, running shoal {}",
        core.server_name(),
        env!("CARGO_PKG_VERSION")
    );
    core.to_client(msg.to(dest.clone())).await;

    core.to_client(Numeric::new(numeric::ErrNoMotd).message().to(dest.clone()))
        .await;

    core.to_client(Message::new(Some("*"), "MODE", &["*", "+i"]).to(dest))
        .await;
}

async fn server_reg(msg: Message, core: Arc<Core>) {
    let sid = msg.sender_id.clone();
    let Some(server) = core.topology.get_server(&sid, true) else {
        return;
    };

    let result = match msg.command.as_str() {
        // PASS <password> TS <ver> <sid>
        "PASS" => {
            if msg.args.len() != 4 {
                return;
            }
            server.set_pass(&msg.args[0], &msg.args[2], &msg.args[3])
        }
        // CAPAB :<caps>
        "CAPAB" => server.set_capab(&msg.args[0]),
        // SERVER <name> <hops> :<desc>
        "SERVER" => server.set_server(
            &msg.args[0],
            &msg.args[1],
            msg.args.get(2).map_or("", String::as_str),
        ),
        // A would-be client command from a server-classified stream.
        _ => Ok(()),
    };

    if let Err(e) = result {
        core.to_server(Message::new(None, "ERROR", &[&e.to_string()]).to(vec![sid]))
            .await;
        return;
    }

    let (_, name, pass, capab) = server.info();
    if name.is_empty() || pass.is_empty() || capab.is_empty() {
        return; // still mid-handshake
    }

    // As with clients, the one-shot transition picks the winner among
    // the concurrently-running handshake handlers.
    if server.set_type(ServerType::RegisteredAsServer).is_err() {
        return;
    }

    // Announce the new link to the other peers.
    let desc = server.description();
    for peer in core.topology.server_iter() {
        if peer != sid {
            core.to_server(
                Message::new(Some(core.sid()), "SID", &[&name, "2", &sid, &desc]).to(vec![peer]),
            )
            .await;
        }
    }

    server_signon(&core, &server).await;
    burst(&core, &sid).await;
}

/// Mirror the handshake back to the peer.
async fn server_signon(core: &Arc<Core>, server: &Arc<Server>) {
    let (sid, _, pass, _) = server.info();
    info!(%sid, "registered as server");

    let dest = vec![sid.clone()];

    // The shared link password the peer presented comes back to it.
    core.to_server(
        Message::new(None, "PASS", &[&pass, "TS", "6", core.sid()]).to(dest.clone()),
    )
    .await;
    core.to_server(Message::new(None, "CAPAB", &["QS ENCAP"]).to(dest.clone()))
        .await;
    core.to_server(
        Message::new(
            None,
            "SERVER",
            &[core.server_name(), "1", &core.config.network.desc],
        )
        .to(dest),
    )
    .await;
}

/// Transmit the full user and channel state to a freshly linked peer.
async fn burst(core: &Arc<Core>, dest_sid: &str) {
    let dest = vec![dest_sid.to_owned()];

    for uid in core.users.iter() {
        let Some((nick, user, name, utype)) = core.users.info(&uid) else {
            continue;
        };
        if utype != UserType::RegisteredAsUser {
            continue;
        }
        let ts = core.users.get_user(&uid).ts();
        core.to_server(
            Message::new(
                Some(core.sid()),
                "UID",
                &[
                    &nick,
                    "1",
                    &ts,
                    "+i",
                    &user,
                    HOST_PLACEHOLDER,
                    "127.0.0.1",
                    &uid,
                    &name,
                ],
            )
            .to(dest.clone()),
        )
        .await;
    }

    for name in core.channels.iter() {
        let Ok(chan) = core.channels.get_channel(&name, false) else {
            continue;
        };
        let members = chan.user_ids().join(" ");
        core.to_server(
            Message::new(Some(core.sid()), "SJOIN", &[&chan.ts(), chan.name(), "+", &members])
                .to(dest.clone()),
        )
        .await;
    }
}

/// `UID <nick> <hops> <ts> <umode> <user> <host> <ip> <uid> :<name>` —
/// a remote user arriving via burst or live announcement.
pub async fn uid(_cmd: String, msg: Message, core: Arc<Core>) {
    let (nick, hops, ts) = (&msg.args[0], &msg.args[1], &msg.args[2]);
    let (user, host, ip) = (&msg.args[4], &msg.args[5], &msg.args[6]);
    let (new_uid, name) = (&msg.args[7], &msg.args[8]);

    if let Err(e) = core
        .users
        .import(new_uid, nick, user, host, ip, hops, ts, name)
    {
        // A collision SQUITs the offending link.
        core.to_server(
            Message::new(Some(core.sid()), "SQUIT", &[new_uid, &e.to_string()])
                .to(vec![msg.sender_id.clone()]),
        )
        .await;
    }

    forward_to_other_peers(&core, &msg).await;
}

/// `SID <name> <hops> <sid> :<desc>` — a server appearing behind the
/// announcing link.
pub async fn sid(_cmd: String, msg: Message, core: Arc<Core>) {
    let (name, hops) = (&msg.args[0], &msg.args[1]);
    let (new_sid, desc) = (&msg.args[2], &msg.args[3]);

    let parent = msg
        .prefix
        .clone()
        .unwrap_or_else(|| msg.sender_id.clone());

    if let Err(e) = core.topology.link_server(&parent, new_sid, name, hops, desc) {
        core.to_server(
            Message::new(Some(core.sid()), "SQUIT", &[new_sid, &e.to_string()])
                .to(vec![msg.sender_id.clone()]),
        )
        .await;
    }

    forward_to_other_peers(&core, &msg).await;
}

/// Propagate a server-to-server message to every peer link except the
/// one it arrived on.
async fn forward_to_other_peers(core: &Arc<Core>, msg: &Message) {
    for fwd in core.topology.server_iter() {
        if fwd != msg.sender_id {
            debug!(from = %msg.sender_id, to = %fwd, command = %msg.command, "forwarding");
            let mut dup = msg.dup();
            dup.dest_ids = vec![fwd];
            core.to_server(dup).await;
        }
    }
}
