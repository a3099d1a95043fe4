//! The core composite: configuration, the three registries, the hook
//! table, and the outbound queue senders. Handlers and managers receive
//! an `Arc<Core>` rather than reaching for globals, which keeps tests
//! parallelisable.
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::channels::Channels;
use super::clients::{self, ClientEvents};
use super::config::{Config, ConfigError};
use super::conn::Conn;
use super::handlers;
use super::hooks::Hooks;
use super::ingress::{self, Handoff};
use super::listener;
use super::message::Message;
use super::peers::{self, PeerEvents};
use super::topology::Topology;
use super::users::Users;

/// Shared state and egress for everything the dispatcher runs.
pub struct Core {
    pub config: Arc<Config>,
    pub users: Users,
    pub channels: Channels,
    pub topology: Topology,
    pub hooks: Hooks,
    to_client_tx: Mutex<Option<mpsc::Sender<Message>>>,
    to_server_tx: Mutex<Option<mpsc::Sender<Message>>>,
}

impl Core {
    /// Build a core with its two outbound queues. The receivers go to the
    /// client and server managers.
    pub fn with_queues(
        config: Arc<Config>,
        hooks: Hooks,
    ) -> (Arc<Core>, mpsc::Receiver<Message>, mpsc::Receiver<Message>) {
        let (to_client_tx, to_client_rx) = mpsc::channel(config.sendq);
        let (to_server_tx, to_server_rx) = mpsc::channel(config.sendq);
        let core = Arc::new(Core {
            users: Users::new(&config.sid),
            channels: Channels::new(),
            topology: Topology::new(),
            hooks,
            to_client_tx: Mutex::new(Some(to_client_tx)),
            to_server_tx: Mutex::new(Some(to_server_tx)),
            config,
        });
        (core, to_client_rx, to_server_rx)
    }

    /// The local server's SID.
    pub fn sid(&self) -> &str {
        &self.config.sid
    }

    /// The local server's name.
    pub fn server_name(&self) -> &str {
        &self.config.name
    }

    /// Enqueue a message for the client manager. During shutdown the
    /// queue is closed and the message is dropped.
    pub async fn to_client(&self, msg: Message) {
        let tx = self.to_client_tx.lock().unwrap().clone();
        match tx {
            Some(tx) => {
                if tx.send(msg).await.is_err() {
                    debug!("client queue closed, dropping message");
                }
            }
            None => debug!("client queue gone, dropping message"),
        }
    }

    /// Enqueue a message for the server manager.
    pub async fn to_server(&self, msg: Message) {
        let tx = self.to_server_tx.lock().unwrap().clone();
        match tx {
            Some(tx) => {
                if tx.send(msg).await.is_err() {
                    debug!("server queue closed, dropping message");
                }
            }
            None => debug!("server queue gone, dropping message"),
        }
    }

    /// Initiate shutdown by closing the outbound queues. The managers
    /// detect end-of-queue, drain, and exit.
    pub fn quit(&self) {
        self.to_client_tx.lock().unwrap().take();
        self.to_server_tx.lock().unwrap().take();
    }
}

/// Errors starting the server.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("binding listeners: {0}")]
    Bind(#[from] std::io::Error),
}

/// A running server: the core plus its long-lived tasks.
pub struct Ircd {
    core: Arc<Core>,
    addrs: Vec<SocketAddr>,
    managers: Vec<JoinHandle<()>>,
    aborted: Vec<JoinHandle<()>>,
}

impl Ircd {
    /// Validate the configuration, bind the listeners, start the UID
    /// generator, and spawn the manager loops.
    pub async fn start(config: Config) -> Result<Ircd, StartError> {
        config.check()?;
        let config = Arc::new(config);

        let mut hooks = Hooks::new();
        handlers::register_defaults(&mut hooks);

        let (core, to_client_rx, to_server_rx) = Core::with_queues(Arc::clone(&config), hooks);
        core.users.start_generator();

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<Conn>();
        let (new_client_tx, new_client_rx) = mpsc::channel(1);
        let (new_server_tx, new_server_rx) = mpsc::channel(1);
        let (client_closing_tx, client_closing_rx) = mpsc::channel(1);
        let (server_closing_tx, server_closing_rx) = mpsc::channel(1);
        let (from_client_tx, from_client_rx) = mpsc::channel(config.recvq);
        let (from_server_tx, from_server_rx) = mpsc::channel(config.recvq);

        let mut managers = Vec::new();
        let mut aborted = Vec::new();

        managers.push(tokio::spawn(clients::run(
            Arc::clone(&core),
            ClientEvents {
                new_client: new_client_rx,
                closing: client_closing_rx,
                closing_tx: client_closing_tx,
                from_client: from_client_rx,
                from_client_tx: from_client_tx.clone(),
                to_client: to_client_rx,
            },
        )));

        managers.push(tokio::spawn(peers::run(
            Arc::clone(&core),
            PeerEvents {
                new_server: new_server_rx,
                closing: server_closing_rx,
                closing_tx: server_closing_tx,
                from_server: from_server_rx,
                from_server_tx: from_server_tx.clone(),
                to_server: to_server_rx,
            },
        )));

        aborted.push(tokio::spawn(ingress::run(
            incoming_rx,
            Handoff {
                new_client: new_client_tx,
                new_server: new_server_tx,
                from_client: from_client_tx,
                from_server: from_server_tx,
            },
        )));

        let bound = listener::bind(Arc::clone(&core), incoming_tx).await?;
        let addrs = bound.addrs.clone();
        aborted.extend(bound.tasks);

        Ok(Ircd {
            core,
            addrs,
            managers,
            aborted,
        })
    }

    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    /// The addresses actually bound — with a `0` port in the config this
    /// is where the ephemeral listener landed.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Close the outbound queues and wait for the managers to drain.
    pub async fn quit(self) {
        self.core.quit();
        for task in self.aborted {
            task.abort();
        }
        for task in self.managers {
            let _ = task.await;
        }
    }
}
