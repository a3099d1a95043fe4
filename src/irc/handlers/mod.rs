//! Concrete protocol handlers, registered into the dispatcher at
//! startup.

pub mod channel_ops;
pub mod messaging;
pub mod ping;
pub mod quit;
pub mod registration;

use super::hooks::{CallConstraints as C, ExecutionMask as M, Hooks};

/// Register every handler the core ships with.
pub fn register_defaults(hooks: &mut Hooks) {
    // Connection registration, both roles.
    hooks.register("NICK", M::REGISTRATION, C::min_args(1), registration::conn_reg);
    hooks.register("USER", M::REGISTRATION, C::min_args(4), registration::conn_reg);
    hooks.register("PASS", M::REGISTRATION, C::any_args(), registration::conn_reg);
    hooks.register("CAPAB", M::REGISTRATION, C::min_args(1), registration::conn_reg);
    hooks.register("SERVER", M::REGISTRATION, C::min_args(2), registration::conn_reg);
    hooks.register("UID", M::SERVER, C::n_args(9), registration::uid);
    hooks.register("SID", M::SERVER, C::n_args(4), registration::sid);

    // Liveness.
    hooks.register("PING", M::USER, C::n_args(1), ping::ping);
    hooks.register("PING", M::SERVER, C::opt_args(1, 1), ping::server_ping);
    hooks.register("PONG", M::SERVER, C::opt_args(1, 1), ping::server_ping);

    // Messaging.
    hooks.register("PRIVMSG", M::USER | M::SERVER, C::n_args(2), messaging::privmsg);
    hooks.register("NOTICE", M::USER | M::SERVER, C::n_args(2), messaging::privmsg);

    // Channel membership.
    hooks.register("JOIN", M::USER, C::n_args(1), channel_ops::join);
    hooks.register("PART", M::USER, C::opt_args(1, 1), channel_ops::part);
    hooks.register("SJOIN", M::SERVER, C::n_args(4), channel_ops::sjoin);

    // Departures.
    hooks.register("QUIT", M::USER, C::any_args(), quit::quit);
    hooks.register("QUIT", M::SERVER, C::min_args(1), quit::quit);
    hooks.register("SQUIT", M::SERVER, C::n_args(2), quit::squit);
}
