//! QUIT and SQUIT: user departures and netsplits.
use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::irc::core::Core;
use crate::irc::ident::{owning_sid, SID_LEN};
use crate::irc::message::{Message, INT_DELUSER};

/// A user leaving. For a local client: forward to every peer, part every
/// channel, send one aggregated QUIT to the local users who shared a
/// channel, and close the link with an ERROR.
pub async fn quit(_cmd: String, msg: Message, core: Arc<Core>) {
    let mut quitter = msg.sender_id.clone();
    let reason = msg
        .args
        .first()
        .cloned()
        .unwrap_or_else(|| "Client Quit".to_owned());

    // Relayed from a peer: the quitting user is in the prefix.
    if msg.sender_id.len() == SID_LEN {
        quitter = msg.prefix.clone().unwrap_or_default();
    }

    for sid in core.topology.server_iter() {
        if sid != msg.sender_id {
            debug!(%quitter, to = %sid, "forwarding QUIT");
            core.to_server(Message::new(Some(&quitter), "QUIT", &[&reason]).to(vec![sid]))
                .await;
        }
    }

    let members = core.channels.part_all(&quitter);
    let mut peers: HashSet<String> = HashSet::new();
    for users in members.values() {
        for uid in users {
            if owning_sid(uid) == core.sid() && *uid != quitter {
                peers.insert(uid.clone());
            }
        }
    }
    if !peers.is_empty() {
        core.to_client(
            Message::new(Some(&quitter), "QUIT", &[&format!("Quit: {reason}")])
                .to(peers.into_iter().collect()),
        )
        .await;
    }

    // Dropped by the client manager if the quitter is remote.
    core.to_client(
        Message::new(None, "ERROR", &[&format!("Closing Link ({reason})")])
            .to(vec![quitter]),
    )
    .await;
}

/// `SQUIT <sid> <reason>` — a server (and everything behind it) leaving
/// the network. State teardown happens here; user-record deletion rides
/// the client queue as `INT_DELUSER` so it drains after the netsplit
/// QUIT notifications.
pub async fn squit(_cmd: String, msg: Message, core: Arc<Core>) {
    let mut split = msg.args[0].clone();
    let reason = msg.args[1].clone();

    // A peer naming us means they themselves are leaving.
    if split == core.sid() {
        split = msg.sender_id.clone();
    }

    for sid in core.topology.server_iter() {
        if sid != msg.sender_id {
            let mut dup = msg.dup();
            dup.dest_ids = vec![sid];
            core.to_server(dup).await;
        }
    }

    if core.topology.is_local(&split) {
        core.to_server(
            Message::new(None, "ERROR", &[&format!("SQUIT: {reason}")]).to(vec![split.clone()]),
        )
        .await;
    }

    let sids = core.topology.unlink(&split);
    let peers = core.users.user_split(&sids);
    let notify = core.channels.chan_split(core.sid(), &peers);

    debug!(%split, ?sids, ?peers, "net split");

    for (leaver, peer_list) in &notify {
        if !peer_list.is_empty() {
            core.to_client(
                Message::new(Some(leaver), "QUIT", &["*.net *.split"]).to(peer_list.clone()),
            )
            .await;
        }
    }

    // Delete the records only after the notifications above have
    // drained from the same queue.
    if !peers.is_empty() {
        core.to_client(Message::new(None, INT_DELUSER, &[]).to(peers))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irc::config::Config;
    use crate::irc::hooks::Hooks;
    use crate::irc::users::UserType;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    const LOCAL_A: &str = "1AAAAAAAA";
    const REMOTE_ON_2: &str = "2BBAAAAAA";
    const REMOTE_ON_3: &str = "3CCAAAAAA";

    /// Topology `1AA` (local) → `2BB` → `3CC` with a user on each remote
    /// server sharing `#x` with a local user.
    fn split_core() -> (
        Arc<Core>,
        mpsc::Receiver<Message>,
        mpsc::Receiver<Message>,
    ) {
        let mut config = Config::default_config();
        config.sid = "1AA".into();
        let (core, to_client, to_server) = Core::with_queues(Arc::new(config), Hooks::new());

        core.users.set_nick(LOCAL_A, "alice").unwrap();
        core.users
            .set_type(LOCAL_A, UserType::RegisteredAsUser)
            .unwrap();
        core.users
            .import(REMOTE_ON_2, "r2user", "u", "h", "i", "2", "1", "R")
            .unwrap();
        core.users
            .import(REMOTE_ON_3, "r3user", "u", "h", "i", "3", "1", "R")
            .unwrap();

        core.topology.get_server("2BB", true).unwrap();
        core.topology
            .link_server("2BB", "3CC", "three.example", "3", "desc")
            .unwrap();

        let chan = core.channels.get_channel("#x", true).unwrap();
        core.channels
            .join(&chan, &[LOCAL_A, REMOTE_ON_2, REMOTE_ON_3])
            .unwrap();

        (core, to_client, to_server)
    }

    #[tokio::test]
    async fn squit_cascade() {
        let (core, mut to_client, mut to_server) = split_core();

        let mut msg = Message::new(None, "SQUIT", &["2BB", "gone"]);
        msg.sender_id = "2BB".into();
        squit("SQUIT".into(), msg, Arc::clone(&core)).await;

        // No other peers to forward to; the split link itself gets the
        // closing ERROR.
        let out = to_server.recv().await.unwrap();
        assert_eq!(out.command, "ERROR");
        assert_eq!(out.dest_ids, vec!["2BB"]);
        assert!(to_server.try_recv().is_err());

        // Everything behind the link is out of the topology.
        assert!(core.topology.get_server("2BB", false).is_none());
        assert!(core.topology.get_server("3CC", false).is_none());

        // One netsplit QUIT per leaver, aimed at the local sharer.
        let mut quit_prefixes = Vec::new();
        for _ in 0..2 {
            let out = to_client.recv().await.unwrap();
            assert_eq!(out.command, "QUIT");
            assert_eq!(out.args, vec!["*.net *.split"]);
            assert_eq!(out.dest_ids, vec![LOCAL_A]);
            quit_prefixes.push(out.prefix.unwrap());
        }
        quit_prefixes.sort();
        assert_eq!(quit_prefixes, vec![REMOTE_ON_2, REMOTE_ON_3]);

        // Then, and only then, the deletion token for both users.
        let out = to_client.recv().await.unwrap();
        assert_eq!(out.command, INT_DELUSER);
        let mut dests = out.dest_ids.clone();
        dests.sort();
        assert_eq!(dests, vec![REMOTE_ON_2, REMOTE_ON_3]);
        assert!(to_client.try_recv().is_err());
    }

    #[tokio::test]
    async fn squit_naming_local_sid_substitutes_the_sender() {
        let (core, _to_client, mut to_server) = split_core();

        // Peer 2BB says "SQUIT 1AA" — meaning they are leaving.
        let mut msg = Message::new(None, "SQUIT", &["1AA", "bye"]);
        msg.sender_id = "2BB".into();
        squit("SQUIT".into(), msg, Arc::clone(&core)).await;

        let out = to_server.recv().await.unwrap();
        assert_eq!(out.command, "ERROR");
        assert_eq!(out.dest_ids, vec!["2BB"]);
        assert!(core.topology.get_server("2BB", false).is_none());
        // The local server itself is untouched.
        assert!(core.users.user(LOCAL_A).is_some());
    }

    #[tokio::test]
    async fn local_quit_notifies_peers_and_closes_the_link() {
        let (core, mut to_client, mut to_server) = split_core();
        core.users.set_nick("1AAAAAAAB", "bob").unwrap();
        let chan = core.channels.get_channel("#x", false).unwrap();
        core.channels.join(&chan, &["1AAAAAAAB"]).unwrap();

        let mut msg = Message::new(None, "QUIT", &["done for today"]);
        msg.sender_id = LOCAL_A.into();
        quit("QUIT".into(), msg, Arc::clone(&core)).await;

        // Forwarded to the one peer link.
        let out = to_server.recv().await.unwrap();
        assert_eq!(out.command, "QUIT");
        assert_eq!(out.dest_ids, vec!["2BB"]);
        assert_eq!(out.prefix.as_deref(), Some(LOCAL_A));

        // One aggregated QUIT to the local channel peer.
        let out = to_client.recv().await.unwrap();
        assert_eq!(out.command, "QUIT");
        assert_eq!(out.dest_ids, vec!["1AAAAAAAB"]);
        assert_eq!(out.args, vec!["Quit: done for today"]);

        // And the closing ERROR for the quitter.
        let out = to_client.recv().await.unwrap();
        assert_eq!(out.command, "ERROR");
        assert_eq!(out.dest_ids, vec![LOCAL_A]);
        assert_eq!(out.args, vec!["Closing Link (done for today)"]);

        // The quitter's memberships are gone.
        assert!(!chan.on_chan(LOCAL_A));
    }
}
