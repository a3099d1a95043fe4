//! Port binding and the accept loops that feed the ingress multiplexer.
//!
//! Every port from every `ports` directive is bound up front so startup
//! fails fast on conflicts. Each accepted stream gets a freshly
//! allocated UID as its transient identity and is pushed onto the
//! incoming queue; classification happens downstream.
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::conn::Conn;
use super::core::Core;

/// The bound listeners and their accept tasks.
pub struct Bound {
    pub addrs: Vec<SocketAddr>,
    pub tasks: Vec<JoinHandle<()>>,
}

/// Bind every configured port and spawn one accept loop per listener.
pub async fn bind(
    core: Arc<Core>,
    incoming: mpsc::UnboundedSender<Conn>,
) -> std::io::Result<Bound> {
    let mut listeners = Vec::new();

    for directive in &core.config.ports {
        let ports = match directive.port_list() {
            Ok(ports) => ports,
            Err(e) => {
                warn!(error = %e, "skipping ports directive");
                continue;
            }
        };
        if directive.ssl {
            // TLS termination is an external concern; these ports come
            // up as plaintext.
            warn!(ports = %directive.port, "no TLS terminator, binding plaintext");
        }
        for port in ports {
            let listener = TcpListener::bind(("0.0.0.0", port)).await?;
            let addr = listener.local_addr()?;
            info!(%addr, "listening");
            listeners.push((listener, addr));
        }
    }

    let mut addrs = Vec::with_capacity(listeners.len());
    let mut tasks = Vec::with_capacity(listeners.len());
    for (listener, addr) in listeners {
        addrs.push(addr);
        tasks.push(tokio::spawn(accept_loop(
            listener,
            Arc::clone(&core),
            incoming.clone(),
        )));
    }

    Ok(Bound { addrs, tasks })
}

async fn accept_loop(
    listener: TcpListener,
    core: Arc<Core>,
    incoming: mpsc::UnboundedSender<Conn>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let id = core.users.next_user_id().await;
        info!(%addr, %id, "new connection");
        if incoming.send(Conn::new(stream, id)).is_err() {
            return;
        }
    }
}
