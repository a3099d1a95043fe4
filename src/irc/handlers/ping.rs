//! PING/PONG for both roles.
use std::sync::Arc;

use tracing::{debug, info};

use crate::irc::core::Core;
use crate::irc::message::Message;

/// Client `PING <token>`: answer with `PONG <server> :<token>`.
pub async fn ping(_cmd: String, msg: Message, core: Arc<Core>) {
    core.to_client(
        Message::new(None, "PONG", &[core.server_name(), &msg.args[0]])
            .to(vec![msg.sender_id.clone()]),
    )
    .await;
}

/// Server `PING <source> [<dest>]` / `PONG <source> [<dest>]`. A PING
/// addressed to us is answered; a PONG addressed to us marks the end of
/// the peer's burst. Anything else is forwarded toward its destination.
pub async fn server_ping(cmd: String, msg: Message, core: Arc<Core>) {
    let source = &msg.args[0];
    let dest = msg.args.get(1).map_or(core.sid(), String::as_str);

    if dest == core.sid() {
        match cmd.as_str() {
            "PING" => {
                core.to_server(
                    Message::new(Some(core.sid()), "PONG", &[core.server_name(), source])
                        .to(vec![msg.sender_id.clone()]),
                )
                .await;
            }
            _ => info!(%source, "end of burst"),
        }
        return;
    }

    for sid in core.topology.iter_for(&[dest.to_owned()], "") {
        debug!(command = %cmd, to = %sid, "forwarding");
        let mut dup = msg.dup();
        dup.dest_ids = vec![sid];
        core.to_server(dup).await;
    }
}
