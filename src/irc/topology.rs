//! The server-topology registry.
//!
//! Think of the local server as the root of a tree with its links hanging
//! below it. Downstream refers to any server directly connected below a
//! node, upstream to the single server above it. Locally-linked servers
//! have no upstream entry; that absence is what `is_local` tests.
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use super::ident::{self, owning_sid};

/// Registration stage of a peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerType {
    Unregistered,
    RegisteredAsServer,
}

/// Handshake and linking failures. All are reported to the peer as an
/// `ERROR` line and cause disconnect (or SQUIT of the offending link).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServerError {
    #[error("Zero-length password")]
    ZeroLengthPassword,
    #[error("TS {0} is unsupported")]
    UnsupportedTs(String),
    #[error("SID {0} is invalid")]
    InvalidSid(String),
    #[error("{0} CAPAB missing")]
    MissingCapab(&'static str),
    #[error("Zero-length server name")]
    ZeroLengthName,
    #[error("Hops = {0} is unsupported")]
    UnsupportedHops(String),
    #[error("Already registered")]
    AlreadyRegistered,
    #[error("Server already linked: {0}")]
    AlreadyLinked(String),
}

#[derive(Debug)]
struct ServState {
    name: String,
    desc: String,
    pass: String,
    capabs: Vec<String>,
    hops: u32,
    ts: u64,
    stype: ServerType,
}

/// A server record.
#[derive(Debug)]
pub struct Server {
    id: String,
    state: RwLock<ServState>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Server {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(Server {
            id: id.to_owned(),
            state: RwLock::new(ServState {
                name: String::new(),
                desc: String::new(),
                pass: String::new(),
                capabs: Vec::new(),
                hops: 0,
                ts: now_secs(),
                stype: ServerType::Unregistered,
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn server_type(&self) -> ServerType {
        self.state.read().unwrap().stype
    }

    /// The free-text description announced for this server.
    pub fn description(&self) -> String {
        self.state.read().unwrap().desc.clone()
    }

    /// The hop count the announcing peer reported.
    pub fn hops(&self) -> u32 {
        self.state.read().unwrap().hops
    }

    /// The TS of the last handshake change, in whole seconds.
    pub fn ts(&self) -> String {
        self.state.read().unwrap().ts.to_string()
    }

    /// Atomically get (id, name, pass, capabs).
    pub fn info(&self) -> (String, String, String, Vec<String>) {
        let st = self.state.read().unwrap();
        (
            self.id.clone(),
            st.name.clone(),
            st.pass.clone(),
            st.capabs.clone(),
        )
    }

    /// `PASS <password> TS <ver> <sid>` — validate and record.
    pub fn set_pass(&self, password: &str, ts_ver: &str, prefix: &str) -> Result<(), ServerError> {
        if password.is_empty() {
            return Err(ServerError::ZeroLengthPassword);
        }
        if ts_ver != "6" {
            return Err(ServerError::UnsupportedTs(ts_ver.to_owned()));
        }
        if !ident::valid_sid(prefix) {
            return Err(ServerError::InvalidSid(prefix.to_owned()));
        }
        let mut st = self.state.write().unwrap();
        st.pass = password.to_owned();
        st.ts = now_secs();
        Ok(())
    }

    /// `CAPAB :<caps>` — `QS` and `ENCAP` are required.
    pub fn set_capab(&self, capab: &str) -> Result<(), ServerError> {
        let caps: Vec<String> = capab.split_whitespace().map(str::to_owned).collect();
        for required in ["QS", "ENCAP"] {
            if !caps.iter().any(|c| c == required) {
                return Err(ServerError::MissingCapab(required));
            }
        }
        let mut st = self.state.write().unwrap();
        st.capabs = caps;
        st.ts = now_secs();
        Ok(())
    }

    /// `SERVER <name> <hops> :<desc>` — a direct link announces hops 1.
    pub fn set_server(&self, name: &str, hops: &str, desc: &str) -> Result<(), ServerError> {
        if name.is_empty() {
            return Err(ServerError::ZeroLengthName);
        }
        if hops != "1" {
            return Err(ServerError::UnsupportedHops(hops.to_owned()));
        }
        let mut st = self.state.write().unwrap();
        st.name = name.to_owned();
        st.desc = desc.to_owned();
        st.hops = 1;
        st.ts = now_secs();
        Ok(())
    }

    /// One-shot transition Unregistered → RegisteredAsServer.
    pub fn set_type(&self, stype: ServerType) -> Result<(), ServerError> {
        let mut st = self.state.write().unwrap();
        if st.stype != ServerType::Unregistered {
            return Err(ServerError::AlreadyRegistered);
        }
        st.stype = stype;
        Ok(())
    }
}

#[derive(Default)]
struct Inner {
    /// servers[sid] = record — every known server.
    servers: HashMap<String, Arc<Server>>,
    /// upstream[sid] = the SID it is linked behind. Locally-linked
    /// servers are absent.
    upstream: HashMap<String, String>,
    /// downstream[sid] = directly-downstream SIDs. Present for every
    /// known server, empty for leaves.
    downstream: HashMap<String, HashSet<String>>,
}

/// The topology registry. This lock is never held across a network write.
#[derive(Default)]
pub struct Topology {
    inner: RwLock<Inner>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieve and/or create a server record. A created server is
    /// directly linked to this one.
    pub fn get_server(&self, sid: &str, create: bool) -> Option<Arc<Server>> {
        let mut inner = self.inner.write().unwrap();
        if let Some(s) = inner.servers.get(sid) {
            return Some(Arc::clone(s));
        }
        if !create {
            return None;
        }
        let s = Server::new(sid);
        inner.servers.insert(sid.to_owned(), Arc::clone(&s));
        inner.downstream.insert(sid.to_owned(), HashSet::new());
        Some(s)
    }

    /// Atomically get (id, name, capabs, stage) for a server.
    pub fn info(&self, sid: &str) -> Option<(String, String, Vec<String>, ServerType)> {
        let s = self.inner.read().unwrap().servers.get(sid).cloned()?;
        let (id, name, _, capabs) = s.info();
        Some((id, name, capabs, s.server_type()))
    }

    /// Register a new server linked behind `link`.
    pub fn link_server(
        &self,
        link: &str,
        sid: &str,
        name: &str,
        hops: &str,
        desc: &str,
    ) -> Result<(), ServerError> {
        let mut inner = self.inner.write().unwrap();

        if inner.servers.contains_key(sid) {
            return Err(ServerError::AlreadyLinked(sid.to_owned()));
        }

        let reported: u32 = hops.parse().unwrap_or(0);

        let s = Arc::new(Server {
            id: sid.to_owned(),
            state: RwLock::new(ServState {
                name: name.to_owned(),
                desc: desc.to_owned(),
                pass: String::new(),
                capabs: Vec::new(),
                hops: reported,
                ts: now_secs(),
                stype: ServerType::RegisteredAsServer,
            }),
        });
        inner.servers.insert(sid.to_owned(), s);
        inner.upstream.insert(sid.to_owned(), link.to_owned());
        inner
            .downstream
            .entry(link.to_owned())
            .or_default()
            .insert(sid.to_owned());
        inner.downstream.insert(sid.to_owned(), HashSet::new());

        // Re-derive the chain length from the upstream chain and compare
        // with the hop count the peer reported.
        let mut up = link.to_owned();
        let mut chain = 1u32;
        while !up.is_empty() {
            up = inner.upstream.get(&up).cloned().unwrap_or_default();
            chain += 1;
        }

        info!(sid, name, link, "server linked");
        if chain != reported {
            warn!(sid, chain, reported, "hop count mismatch");
        }

        Ok(())
    }

    /// True if the SID is known and locally linked.
    pub fn is_local(&self, sid: &str) -> bool {
        let inner = self.inner.read().unwrap();
        inner.servers.contains_key(sid) && !inner.upstream.contains_key(sid)
    }

    /// The SIDs of all servers behind the given link, starting with the
    /// server itself. Empty if the server is unknown.
    pub fn linked_to(&self, link: &str) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        Self::linked_to_locked(&inner, link)
    }

    fn linked_to_locked(inner: &Inner, link: &str) -> Vec<String> {
        if !inner.servers.contains_key(link) {
            warn!(link, "mapping nonexistent link");
            return Vec::new();
        }
        let mut sids = vec![link.to_owned()];
        if let Some(children) = inner.downstream.get(link) {
            for child in children {
                sids.extend(Self::linked_to_locked(inner, child));
            }
        }
        sids
    }

    /// Delete the given server and all servers behind it. Returns the
    /// SIDs that were split. User-record deletion is deferred to the
    /// client manager via `INT_DELUSER`.
    pub fn unlink(&self, split: &str) -> Vec<String> {
        let mut inner = self.inner.write().unwrap();
        let sids = Self::linked_to_locked(&inner, split);

        for sid in &sids {
            info!(split, sid, "unlinking");

            inner.servers.remove(sid);

            // Unlink from the upstream server's downstream set, but only
            // if the upstream server is still around.
            if let Some(up) = inner.upstream.remove(sid) {
                if let Some(siblings) = inner.downstream.get_mut(&up) {
                    siblings.remove(sid);
                }
            }

            inner.downstream.remove(sid);
        }

        sids
    }

    /// The routing lookup: for each ID (UID or SID), walk `upstream`
    /// from its owning SID to the locally-linked root and emit that
    /// root, deduped across all inputs. If `skip_link` resolves to one
    /// of the roots, that root is omitted — this is how a handler
    /// forwards to every peer that needs a message without bouncing it
    /// back toward its source.
    pub fn iter_for(&self, ids: &[String], skip_link: &str) -> Vec<String> {
        let inner = self.inner.read().unwrap();

        // The skip link may itself be a UID; its owning SID anchors the
        // walk.
        let mut skip = if skip_link.len() >= ident::SID_LEN {
            owning_sid(skip_link).to_owned()
        } else {
            String::new()
        };
        while let Some(up) = inner.upstream.get(&skip) {
            skip = up.clone();
        }

        let mut links = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        'next_id: for id in ids {
            if id.len() < ident::SID_LEN {
                warn!(id, "undersized ID in routing lookup");
                continue;
            }
            let mut sid = owning_sid(id).to_owned();
            loop {
                if seen.contains(&sid) {
                    continue 'next_id;
                }
                seen.insert(sid.clone());
                match inner.upstream.get(&sid) {
                    Some(up) => sid = up.clone(),
                    None => break,
                }
            }
            if sid == skip {
                continue;
            }
            links.push(sid);
        }

        links
    }

    /// Snapshot of all locally-linked SIDs.
    pub fn server_iter(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        inner
            .servers
            .keys()
            .filter(|sid| !inner.upstream.contains_key(*sid))
            .cloned()
            .collect()
    }
}
