//! Hook registration and dispatch.
//!
//! A hook binds a command token to a handler, an execution mask (which
//! connection roles and registration stages it fires for), and argument
//! constraints. Multiple hooks may share a command. Each invocation runs
//! as its own task so a slow handler never blocks dispatch.
use std::collections::HashMap;
use std::ops::BitOr;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{error, warn};

use super::core::Core;
use super::message::Message;
use super::numeric::{self, Numeric};
use super::topology::ServerType;
use super::users::UserType;

/// The contexts a hook is called in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionMask(u8);

impl ExecutionMask {
    /// Connections still in the registration state machine.
    pub const REGISTRATION: ExecutionMask = ExecutionMask(1);
    /// Registered user connections.
    pub const USER: ExecutionMask = ExecutionMask(1 << 1);
    /// Registered server connections.
    pub const SERVER: ExecutionMask = ExecutionMask(1 << 2);
    /// Any context.
    pub const ANY: ExecutionMask = ExecutionMask(1 | 1 << 1 | 1 << 2);

    pub fn contains(self, other: ExecutionMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ExecutionMask {
    type Output = ExecutionMask;

    fn bitor(self, rhs: ExecutionMask) -> ExecutionMask {
        ExecutionMask(self.0 | rhs.0)
    }
}

/// How many arguments a hook needs to be called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallConstraints {
    pub min_args: usize,
    /// `None` = unbounded.
    pub max_args: Option<usize>,
}

impl CallConstraints {
    /// Exactly `count` arguments.
    pub fn n_args(count: usize) -> Self {
        CallConstraints {
            min_args: count,
            max_args: Some(count),
        }
    }

    /// At least `min` arguments.
    pub fn min_args(min: usize) -> Self {
        CallConstraints {
            min_args: min,
            max_args: None,
        }
    }

    /// `required` arguments plus up to `optional` more.
    pub fn opt_args(required: usize, optional: usize) -> Self {
        CallConstraints {
            min_args: required,
            max_args: Some(required + optional),
        }
    }

    /// No constraints.
    pub fn any_args() -> Self {
        CallConstraints {
            min_args: 0,
            max_args: None,
        }
    }

    fn admits(&self, nargs: usize) -> bool {
        nargs >= self.min_args && self.max_args.map_or(true, |max| nargs <= max)
    }
}

type HookFn = Arc<dyn Fn(String, Message, Arc<Core>) -> BoxFuture<'static, ()> + Send + Sync>;

/// A registered handler.
pub struct Hook {
    pub when: ExecutionMask,
    pub constraints: CallConstraints,
    func: HookFn,
}

/// The hook registry. Built once during startup; immutable afterwards.
#[derive(Default)]
pub struct Hooks {
    registered: HashMap<String, Vec<Hook>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler under `cmd`.
    pub fn register<F, Fut>(
        &mut self,
        cmd: &str,
        when: ExecutionMask,
        constraints: CallConstraints,
        func: F,
    ) where
        F: Fn(String, Message, Arc<Core>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let func: HookFn = Arc::new(move |cmd, msg, core| -> BoxFuture<'static, ()> {
            Box::pin(func(cmd, msg, core))
        });
        self.registered
            .entry(cmd.to_owned())
            .or_default()
            .push(Hook {
                when,
                constraints,
                func,
            });
    }

    fn hooks_for(&self, cmd: &str) -> &[Hook] {
        self.registered.get(cmd).map_or(&[], Vec::as_slice)
    }
}

/// Dispatch a message from a client connection. The sender must have a
/// user record; a missing one means the registries are corrupt, and the
/// process terminates.
pub fn dispatch_client(core: &Arc<Core>, msg: Message) {
    let Some((_, _, _, utype)) = core.users.info(&msg.sender_id) else {
        // The client manager creates the record before dispatching, so
        // this can only be an internal invariant violation.
        error!(sender = %msg.sender_id, "dispatch: unknown user");
        std::process::exit(1);
    };
    let mask = match utype {
        UserType::Unregistered => ExecutionMask::REGISTRATION,
        UserType::RegisteredAsUser => ExecutionMask::USER,
    };
    dispatch(core, msg, mask, true);
}

/// Dispatch a message from a server connection. An unknown source
/// server is logged and dropped: the record may already have been torn
/// down by a racing SQUIT.
pub fn dispatch_server(core: &Arc<Core>, msg: Message) {
    let Some((_, _, _, stype)) = core.topology.info(&msg.sender_id) else {
        error!(sender = %msg.sender_id, "dispatch: unknown source server");
        return;
    };
    let mask = match stype {
        ServerType::Unregistered => ExecutionMask::REGISTRATION,
        ServerType::RegisteredAsServer => ExecutionMask::SERVER,
    };
    dispatch(core, msg, mask, false);
}

fn dispatch(core: &Arc<Core>, msg: Message, mask: ExecutionMask, from_client: bool) {
    for hook in core.hooks.hooks_for(&msg.command) {
        if !hook.when.contains(mask) {
            continue;
        }

        if !hook.constraints.admits(msg.args.len()) {
            if from_client && msg.args.len() < hook.constraints.min_args {
                // Too few arguments from a client gets the numeric; the
                // server side has no numeric lane.
                let reply = Numeric::with(numeric::ErrNeedMoreParams, &[msg.command.as_str()])
                    .message_for(&msg.sender_id);
                let core = Arc::clone(core);
                tokio::spawn(async move { core.to_client(reply).await });
            } else {
                warn!(
                    command = %msg.command,
                    args = msg.args.len(),
                    "dispatch: constraint violation, dropping"
                );
            }
            continue;
        }

        let fut = (hook.func)(msg.command.clone(), msg.dup(), Arc::clone(core));
        tokio::spawn(fut);
    }
}
