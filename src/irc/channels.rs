//! The channel registry: case-folded lookup, lazy creation, and the
//! membership bookkeeping behind JOIN/PART/QUIT and netsplits.
//!
//! A channel exists in the registry iff its member set is non-empty. The
//! channel lock and the registry lock are never held at the same time
//! except registry→channel in the split paths; `join` and `part` release
//! the channel lock before touching the registry.
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use super::ident::{self, irc_lower, owning_sid};
use super::numeric::{self, Numeric};

/// Placeholder hostmask recorded per membership. Resolving the client's
/// real host is out of scope.
const HOSTMASK: &str = "host@mask";

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug)]
struct ChanState {
    ts: u64,
    /// users[uid] = hostmask
    users: HashMap<String, String>,
}

/// A channel record. The name preserves the case it was created with.
#[derive(Debug)]
pub struct Channel {
    name: String,
    state: RwLock<ChanState>,
}

impl Channel {
    /// The channel name (immutable, case-preserving).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The TS of the last membership change, serialised in whole seconds.
    pub fn ts(&self) -> String {
        self.state.read().unwrap().ts.to_string()
    }

    /// Snapshot of the member UIDs.
    pub fn user_ids(&self) -> Vec<String> {
        self.state.read().unwrap().users.keys().cloned().collect()
    }

    /// Whether `uid` is currently a member.
    pub fn on_chan(&self, uid: &str) -> bool {
        self.state.read().unwrap().users.contains_key(uid)
    }
}

/// The channel registry, keyed by case-folded name.
#[derive(Default)]
pub struct Channels {
    inner: RwLock<HashMap<String, Arc<Channel>>>,
}

impl Channels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a channel; create it if absent and `create` is set.
    pub fn get_channel(&self, name: &str, create: bool) -> Result<Arc<Channel>, Numeric> {
        if !ident::valid_channel(name) {
            return Err(Numeric::with(numeric::ErrNoSuchChannel, &[name]));
        }

        let lower = irc_lower(name);
        let mut inner = self.inner.write().unwrap();

        if let Some(c) = inner.get(&lower) {
            return Ok(Arc::clone(c));
        }
        if !create {
            return Err(Numeric::with(numeric::ErrNoSuchChannel, &[name]));
        }

        let c = Arc::new(Channel {
            name: name.to_owned(),
            state: RwLock::new(ChanState {
                ts: now_secs(),
                users: HashMap::new(),
            }),
        });
        inner.insert(lower, Arc::clone(&c));
        Ok(c)
    }

    /// Join users to the channel. Fails fast with `ERR_USERONCHANNEL` on
    /// the first already-present UID. Returns the full member set as the
    /// notify list.
    pub fn join(&self, chan: &Arc<Channel>, uids: &[&str]) -> Result<Vec<String>, Numeric> {
        let notify = {
            let mut st = chan.state.write().unwrap();
            for uid in uids {
                if st.users.contains_key(*uid) {
                    return Err(Numeric::with(
                        numeric::ErrUserOnChannel,
                        &[uid, chan.name()],
                    ));
                }
                st.users.insert((*uid).to_owned(), HOSTMASK.to_owned());
                st.ts = now_secs();
            }
            st.users.keys().cloned().collect::<Vec<_>>()
        };

        // Repair path: another task may have emptied and deleted this
        // channel between our caller's lookup and the insert above.
        let lower = irc_lower(chan.name());
        let mut inner = self.inner.write().unwrap();
        if !inner.contains_key(&lower) {
            inner.insert(lower, Arc::clone(chan));
        }

        Ok(notify)
    }

    /// Part a user from the channel. Returns the pre-part member set so
    /// callers can notify the leaver and the remainder from one list.
    pub fn part(&self, chan: &Arc<Channel>, uid: &str) -> Result<Vec<String>, Numeric> {
        let (notify, empty) = {
            let mut st = chan.state.write().unwrap();
            if !st.users.contains_key(uid) {
                return Err(Numeric::with(numeric::ErrNotOnChannel, &[chan.name()]));
            }
            let notify = st.users.keys().cloned().collect::<Vec<_>>();
            st.users.remove(uid);
            st.ts = now_secs();
            (notify, st.users.is_empty())
        };

        if empty {
            let mut inner = self.inner.write().unwrap();
            // Re-check under both locks: a join may have raced us.
            if chan.state.read().unwrap().users.is_empty() {
                inner.remove(&irc_lower(chan.name()));
            }
        }

        Ok(notify)
    }

    /// Remove `uid` from every channel it belongs to, deleting channels
    /// that become empty. Returns channel name → members at time of part
    /// (including the leaver). Used on client quit.
    pub fn part_all(&self, uid: &str) -> HashMap<String, Vec<String>> {
        let mut notify = HashMap::new();
        let mut inner = self.inner.write().unwrap();

        inner.retain(|_, c| {
            let mut st = c.state.write().unwrap();
            if !st.users.contains_key(uid) {
                return true;
            }
            notify.insert(c.name.clone(), st.users.keys().cloned().collect());
            st.users.remove(uid);
            st.ts = now_secs();
            !st.users.is_empty()
        });

        notify
    }

    /// Remove the leaving UIDs from all channel memberships and compute,
    /// per leaver, the local users (owning SID = `local_sid`) who shared
    /// a channel with them. Each peer appears at most once per leaver.
    /// Channels left empty are deleted.
    pub fn chan_split(
        &self,
        local_sid: &str,
        leaving: &[String],
    ) -> HashMap<String, Vec<String>> {
        let mut peers: HashMap<String, std::collections::HashSet<String>> = HashMap::new();
        let mut inner = self.inner.write().unwrap();

        inner.retain(|_, c| {
            let mut st = c.state.write().unwrap();

            let present: Vec<&String> =
                leaving.iter().filter(|uid| st.users.contains_key(*uid)).collect();
            if present.is_empty() {
                return true;
            }
            for uid in &present {
                st.users.remove(*uid);
            }
            st.ts = now_secs();

            for member in st.users.keys() {
                if owning_sid(member) != local_sid {
                    continue;
                }
                for uid in &present {
                    peers
                        .entry((*uid).clone())
                        .or_default()
                        .insert(member.clone());
                }
            }

            !st.users.is_empty()
        });

        peers
            .into_iter()
            .filter(|(_, set)| !set.is_empty())
            .map(|(uid, set)| (uid, set.into_iter().collect()))
            .collect()
    }

    /// Snapshot of the current channel names.
    pub fn iter(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap()
            .values()
            .map(|c| c.name.clone())
            .collect()
    }

    /// Number of live channels (tests and metrics).
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
