//! The user registry: UID↔nick indexing, per-user state, and the UID
//! generator task.
//!
//! Lock order: the registry lock is always acquired before any individual
//! user lock.
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tracing::debug;

use super::ident::{self, irc_lower, owning_sid};
use super::numeric::{self, Numeric};

/// Registration stage of a connection's user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserType {
    Unregistered,
    RegisteredAsUser,
}

#[derive(Debug)]
struct UserState {
    nick: String,
    user: String,
    name: String,
    ts: u64,
    utype: UserType,
}

/// A user record. Cross-references to channels and servers are by ID
/// only; the registries are the single source of truth.
#[derive(Debug)]
pub struct User {
    id: String,
    state: RwLock<UserState>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl User {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(User {
            id: id.to_owned(),
            state: RwLock::new(UserState {
                nick: "*".into(),
                user: String::new(),
                name: String::new(),
                ts: now_secs(),
                utype: UserType::Unregistered,
            }),
        })
    }

    /// The user ID (immutable).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The current nick.
    pub fn nick(&self) -> String {
        self.state.read().unwrap().nick.clone()
    }

    /// The TS of the last state change, in whole seconds, as it is
    /// serialised on the wire.
    pub fn ts(&self) -> String {
        self.state.read().unwrap().ts.to_string()
    }

    /// Atomically get nick, username, realname, and registration stage.
    pub fn info(&self) -> (String, String, String, UserType) {
        let st = self.state.read().unwrap();
        (st.nick.clone(), st.user.clone(), st.name.clone(), st.utype)
    }
}

/// UID collision / nick collision on a remote-user import.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImportError {
    #[error("UID collision: {0}")]
    UidCollision(String),
    #[error("NICK collision: {0}")]
    NickCollision(String),
}

#[derive(Default)]
struct Inner {
    /// users[uid] = record
    users: HashMap<String, Arc<User>>,
    /// nicks[case-folded nick] = uid
    nicks: HashMap<String, String>,
}

/// The user registry.
pub struct Users {
    sid: String,
    inner: RwLock<Inner>,
    suffix_rx: tokio::sync::Mutex<mpsc::Receiver<String>>,
    suffix_tx: std::sync::Mutex<Option<mpsc::Sender<String>>>,
}

impl Users {
    /// Create the registry for the given local SID. The generator task is
    /// not yet running; call [`Users::start_generator`] once, before any
    /// connection is accepted.
    pub fn new(sid: &str) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Users {
            sid: sid.to_owned(),
            inner: RwLock::new(Inner::default()),
            suffix_rx: tokio::sync::Mutex::new(rx),
            suffix_tx: std::sync::Mutex::new(Some(tx)),
        }
    }

    /// Spawn the UID-generator task.
    pub fn start_generator(&self) {
        let tx = self
            .suffix_tx
            .lock()
            .unwrap()
            .take()
            .expect("UID generator started twice");
        tokio::spawn(generate_suffixes(tx));
    }

    /// The next available unique ID: local SID + generated suffix.
    pub async fn next_user_id(&self) -> String {
        let suffix = self
            .suffix_rx
            .lock()
            .await
            .recv()
            .await
            .expect("UID generator not running");
        format!("{}{}", self.sid, suffix)
    }

    /// Look up the record for `uid`, creating it (nick `"*"`,
    /// unregistered) if absent.
    pub fn get_user(&self, uid: &str) -> Arc<User> {
        let mut inner = self.inner.write().unwrap();
        if let Some(u) = inner.users.get(uid) {
            return Arc::clone(u);
        }
        let u = User::new(uid);
        inner.users.insert(uid.to_owned(), Arc::clone(&u));
        u
    }

    /// Look up without creating.
    pub fn user(&self, uid: &str) -> Option<Arc<User>> {
        self.inner.read().unwrap().users.get(uid).cloned()
    }

    /// Atomically retrieve (nick, user, name, stage) for `uid`.
    pub fn info(&self, uid: &str) -> Option<(String, String, String, UserType)> {
        self.user(uid).map(|u| u.info())
    }

    /// Set the user's nick, enforcing shape and uniqueness. Idempotent if
    /// the caller already owns the nick.
    pub fn set_nick(&self, uid: &str, nick: &str) -> Result<(), Numeric> {
        if !ident::valid_nick(nick) {
            return Err(Numeric::with(numeric::ErrErroneusNickname, &[nick]));
        }

        let lower = irc_lower(nick);
        let mut inner = self.inner.write().unwrap();

        if let Some(owner) = inner.nicks.get(&lower) {
            if owner == uid {
                return Ok(());
            }
            return Err(Numeric::with(numeric::ErrNicknameInUse, &[nick]));
        }

        let u = match inner.users.get(uid) {
            Some(u) => Arc::clone(u),
            None => {
                let u = User::new(uid);
                inner.users.insert(uid.to_owned(), Arc::clone(&u));
                u
            }
        };

        // Swap the index entries atomically under the registry lock.
        inner.nicks.insert(lower, uid.to_owned());
        let old_lower = irc_lower(&u.state.read().unwrap().nick);
        inner.nicks.remove(&old_lower);

        let mut st = u.state.write().unwrap();
        st.nick = nick.to_owned();
        st.ts = now_secs();
        Ok(())
    }

    /// Set username and realname (one-shot).
    pub fn set_user(&self, uid: &str, user: &str, name: &str) -> Result<(), Numeric> {
        let u = self.get_user(uid);
        let mut st = u.state.write().unwrap();
        if !st.user.is_empty() {
            return Err(Numeric::new(numeric::ErrAlreadyRegistred));
        }
        if !ident::valid_nick(user) || name.is_empty() {
            return Err(Numeric::new(numeric::ErrNeedMoreParams));
        }
        st.user = user.to_owned();
        st.name = name.to_owned();
        st.ts = now_secs();
        Ok(())
    }

    /// One-shot transition Unregistered → RegisteredAsUser.
    pub fn set_type(&self, uid: &str, utype: UserType) -> Result<(), Numeric> {
        let u = self.get_user(uid);
        let mut st = u.state.write().unwrap();
        if st.utype != UserType::Unregistered {
            return Err(Numeric::new(numeric::ErrAlreadyRegistred));
        }
        st.utype = utype;
        st.ts = now_secs();
        Ok(())
    }

    /// Resolve a nick (or a raw UID already in the map) to a UID.
    pub fn get_id(&self, nick: &str) -> Result<String, Numeric> {
        let inner = self.inner.read().unwrap();
        if inner.users.contains_key(nick) {
            return Ok(nick.to_owned());
        }
        inner
            .nicks
            .get(&irc_lower(nick))
            .cloned()
            .ok_or_else(|| Numeric::with(numeric::ErrNoSuchNick, &[nick]))
    }

    /// A remote user arriving via burst. Fails on UID or nick collision;
    /// on success materialises a registered record.
    #[allow(clippy::too_many_arguments)]
    pub fn import(
        &self,
        uid: &str,
        nick: &str,
        user: &str,
        _host: &str,
        _ip: &str,
        _hops: &str,
        ts: &str,
        name: &str,
    ) -> Result<(), ImportError> {
        let mut inner = self.inner.write().unwrap();

        if inner.users.contains_key(uid) {
            return Err(ImportError::UidCollision(uid.to_owned()));
        }
        let lower = irc_lower(nick);
        if inner.nicks.contains_key(&lower) {
            return Err(ImportError::NickCollision(nick.to_owned()));
        }

        let u = Arc::new(User {
            id: uid.to_owned(),
            state: RwLock::new(UserState {
                nick: nick.to_owned(),
                user: user.to_owned(),
                name: name.to_owned(),
                ts: ts.parse().unwrap_or_else(|_| now_secs()),
                utype: UserType::RegisteredAsUser,
            }),
        });
        inner.users.insert(uid.to_owned(), u);
        inner.nicks.insert(lower, uid.to_owned());
        Ok(())
    }

    /// The UIDs that become unreachable when the given servers split from
    /// the network. Pure: deletes nothing.
    pub fn user_split(&self, sids: &[String]) -> Vec<String> {
        let gone: HashSet<&str> = sids.iter().map(String::as_str).collect();
        let inner = self.inner.read().unwrap();
        inner
            .users
            .keys()
            .filter(|uid| gone.contains(owning_sid(uid)))
            .cloned()
            .collect()
    }

    /// Remove the record and its nick binding.
    pub fn delete(&self, uid: &str) {
        let mut inner = self.inner.write().unwrap();
        if let Some(u) = inner.users.remove(uid) {
            let lower = irc_lower(&u.state.read().unwrap().nick);
            inner.nicks.remove(&lower);
            debug!(uid, "user deleted");
        }
    }

    /// Snapshot of all known UIDs.
    pub fn iter(&self) -> Vec<String> {
        self.inner.read().unwrap().users.keys().cloned().collect()
    }
}

/// The generator task: suffixes `AAAAAA`, `AAAAAB`, ... fed through a
/// rendezvous channel.
async fn generate_suffixes(tx: mpsc::Sender<String>) {
    let mut chars = *b"AAAAAA";
    loop {
        let suffix = String::from_utf8_lossy(&chars).into_owned();
        if tx.send(suffix).await.is_err() {
            return;
        }
        advance(&mut chars);
    }
}

/// Advance one position string. Each position cycles `A..Z,0..9`; both
/// the `Z→0` and `9→A` steps carry right-to-left.
pub(crate) fn advance(chars: &mut [u8]) {
    for i in (0..chars.len()).rev() {
        match chars[i] {
            b'9' => {
                chars[i] = b'A';
                continue;
            }
            b'Z' => {
                chars[i] = b'0';
                continue;
            }
            _ => {
                chars[i] += 1;
                break;
            }
        }
    }
}
