//! End-to-end sessions against an in-process server.
//!
//! Each test boots its own `Ircd` on an ephemeral port and drives it
//! with real blocking TCP clients:
//!
//! - content-classified handshakes (NICK/USER vs PASS/SERVER/CAPAB)
//! - the client welcome batch and the server handshake mirror
//! - message routing between local clients
//! - channel membership and quit teardown
use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use shoal::irc::config::{Config, Ports};
use shoal::irc::core::Ircd;

/// A server on an ephemeral port, plus the runtime keeping it alive.
struct TestServer {
    rt: tokio::runtime::Runtime,
    ircd: Option<Ircd>,
    addr: SocketAddr,
}

impl TestServer {
    fn start() -> TestServer {
        let mut config = Config::default_config();
        config.name = "shoal.test".into();
        config.sid = "1AA".into();
        config.network.name = "TestNet".into();
        config.ports = vec![Ports {
            ssl: false,
            port: "0".into(),
        }];

        let rt = tokio::runtime::Runtime::new().unwrap();
        let ircd = rt.block_on(Ircd::start(config)).unwrap();
        // Listeners bind the wildcard address; dial back over loopback.
        let addr = SocketAddr::new([127, 0, 0, 1].into(), ircd.local_addrs()[0].port());
        TestServer {
            rt,
            ircd: Some(ircd),
            addr,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(ircd) = self.ircd.take() {
            let _ = self.rt.block_on(async {
                tokio::time::timeout(Duration::from_secs(2), ircd.quit()).await
            });
        }
    }
}

/// Simple blocking IRC client for testing.
struct TestClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    lines: Vec<String>,
}

impl TestClient {
    /// Raw connection, no registration.
    fn connect_raw(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(5))?;
        stream.set_read_timeout(Some(Duration::from_secs(3)))?;
        let writer = stream.try_clone()?;
        let reader = BufReader::new(stream);
        Ok(Self {
            reader,
            writer,
            lines: Vec::new(),
        })
    }

    /// Register as a client and read through the welcome batch.
    fn connect(addr: SocketAddr, nick: &str) -> io::Result<Self> {
        let mut client = Self::connect_raw(addr)?;
        client.send(&format!("NICK {nick}"))?;
        client.send(&format!("USER {nick} 0 * :{nick}"))?;
        // ERR_NOMOTD closes the welcome batch.
        client.read_until("422")?;
        Ok(client)
    }

    fn send(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.writer, "{line}\r")?;
        self.writer.flush()
    }

    /// Read lines until one contains the given substring, or timeout.
    fn read_until(&mut self, marker: &str) -> io::Result<String> {
        loop {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed",
                    ))
                }
                Ok(_) => {
                    let trimmed = line.trim_end().to_string();
                    self.lines.push(trimmed.clone());
                    if trimmed.contains(marker) {
                        return Ok(trimmed);
                    }
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("timeout waiting for {marker:?}; saw {:#?}", self.lines),
                    ));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ── Client handshake ─────────────────────────────────────────────

#[test]
fn client_handshake_gets_the_welcome_batch() {
    let server = TestServer::start();
    let mut client = TestClient::connect(server.addr, "wings").unwrap();

    let welcome = client
        .lines
        .iter()
        .find(|l| l.contains(" 001 "))
        .expect("RPL_WELCOME");
    assert_eq!(
        welcome,
        ":shoal.test 001 wings :Welcome to the TestNet network, wings!"
    );
    assert!(client.lines.iter().any(|l| l.contains(" 002 ")));

    // The +i self-mode closes the signon, personalised to the client.
    let mode = client.read_until("MODE").unwrap();
    assert_eq!(mode, ":wings MODE wings :+i");
}

#[test]
fn nick_collision_is_reported_with_the_attempted_nick() {
    let server = TestServer::start();
    let _first = TestClient::connect(server.addr, "wings").unwrap();

    let mut second = TestClient::connect_raw(server.addr).unwrap();
    second.send("NICK WINGS").unwrap();
    second.send("USER other 0 * :Other").unwrap();
    let err = second.read_until("433").unwrap();
    assert_eq!(err, ":shoal.test 433 * WINGS :Nickname is already in use");
}

#[test]
fn erroneous_nick_is_rejected() {
    let server = TestServer::start();
    let mut client = TestClient::connect_raw(server.addr).unwrap();
    client.send("NICK 9lives").unwrap();
    client.send("USER nine 0 * :Nine").unwrap();
    let err = client.read_until("432").unwrap();
    assert!(err.contains("9lives"));
}

// ── Liveness ─────────────────────────────────────────────────────

#[test]
fn ping_gets_a_pong() {
    let server = TestServer::start();
    let mut client = TestClient::connect(server.addr, "wings").unwrap();

    client.send("PING :12345").unwrap();
    let pong = client.read_until("PONG").unwrap();
    assert_eq!(pong, ":shoal.test PONG shoal.test :12345");
}

// ── Messaging ────────────────────────────────────────────────────

#[test]
fn privmsg_between_local_clients() {
    let server = TestServer::start();
    let mut alice = TestClient::connect(server.addr, "alice").unwrap();
    let mut bob = TestClient::connect(server.addr, "bob").unwrap();

    alice.send("PRIVMSG bob :hello there").unwrap();
    let got = bob.read_until("PRIVMSG").unwrap();
    assert_eq!(got, ":alice!alice@some.host PRIVMSG bob :hello there");
}

#[test]
fn privmsg_to_a_missing_nick_is_an_error_but_notice_is_quiet() {
    let server = TestServer::start();
    let mut client = TestClient::connect(server.addr, "wings").unwrap();

    client.send("NOTICE ghost :anyone?").unwrap();
    client.send("PRIVMSG ghost :anyone?").unwrap();
    // Only the PRIVMSG draws the numeric.
    let err = client.read_until("401").unwrap();
    assert!(err.contains("ghost"));
    assert_eq!(
        client.lines.iter().filter(|l| l.contains(" 401 ")).count(),
        1
    );
}

// ── Channels ─────────────────────────────────────────────────────

#[test]
fn join_and_part_lifecycle_over_the_wire() {
    let server = TestServer::start();
    let mut alice = TestClient::connect(server.addr, "alice").unwrap();
    let mut bob = TestClient::connect(server.addr, "bob").unwrap();

    alice.send("JOIN #x").unwrap();
    let joined = alice.read_until("JOIN").unwrap();
    assert_eq!(joined, ":alice!alice@some.host JOIN :#x");
    let names = alice.read_until("353").unwrap();
    assert_eq!(names, ":shoal.test 353 alice @ #x :alice");

    bob.send("JOIN #x").unwrap();
    // Both members hear the join.
    let seen = alice.read_until("JOIN").unwrap();
    assert_eq!(seen, ":bob!bob@some.host JOIN :#x");
    bob.read_until("353").unwrap();

    bob.send("PRIVMSG #x :hi all").unwrap();
    let got = alice.read_until("PRIVMSG").unwrap();
    assert_eq!(got, ":bob!bob@some.host PRIVMSG #x :hi all");

    bob.send("PART #x").unwrap();
    let parted = alice.read_until("PART").unwrap();
    assert_eq!(parted, ":bob!bob@some.host PART :#x");
}

#[test]
fn quit_closes_the_link_and_notifies_channel_peers() {
    let server = TestServer::start();
    let mut alice = TestClient::connect(server.addr, "alice").unwrap();
    let mut bob = TestClient::connect(server.addr, "bob").unwrap();

    alice.send("JOIN #x").unwrap();
    alice.read_until("353").unwrap();
    bob.send("JOIN #x").unwrap();
    bob.read_until("353").unwrap();

    bob.send("QUIT :gone fishing").unwrap();
    let err = bob.read_until("ERROR").unwrap();
    assert_eq!(err, "ERROR :Closing Link (gone fishing)");

    let quit = alice.read_until("QUIT").unwrap();
    assert_eq!(quit, ":bob!bob@some.host QUIT :Quit: gone fishing");
}

// ── Server handshake ─────────────────────────────────────────────

#[test]
fn server_handshake_is_mirrored() {
    let server = TestServer::start();
    let mut peer = TestClient::connect_raw(server.addr).unwrap();

    peer.send("PASS linkpw TS 6 :2BB").unwrap();
    peer.send("CAPAB :QS ENCAP").unwrap();
    peer.send("SERVER peer.example 1 :A peer").unwrap();

    // The handshake comes back mirrored: PASS, CAPAB, then SERVER.
    let pass = peer.read_until("PASS").unwrap();
    assert_eq!(pass, "PASS linkpw TS 6 :1AA");
    let capab = peer.read_until("CAPAB").unwrap();
    assert_eq!(capab, "CAPAB :QS ENCAP");
    let serv = peer.read_until("SERVER").unwrap();
    assert!(serv.starts_with("SERVER shoal.test 1 :"));
}

#[test]
fn registered_users_are_bursted_to_a_new_peer() {
    let server = TestServer::start();
    let _alice = TestClient::connect(server.addr, "alice").unwrap();

    let mut peer = TestClient::connect_raw(server.addr).unwrap();
    peer.send("PASS linkpw TS 6 :2BB").unwrap();
    peer.send("CAPAB :QS ENCAP").unwrap();
    peer.send("SERVER peer.example 1 :A peer").unwrap();

    let uid = peer.read_until("UID").unwrap();
    // :1AA UID alice 1 <ts> +i alice some.host 127.0.0.1 <uid> :alice
    assert!(uid.starts_with(":1AA UID alice 1 "));
    assert!(uid.contains(" +i alice some.host 127.0.0.1 1AA"));
}

#[test]
fn bad_server_password_draws_an_error() {
    let server = TestServer::start();
    let mut peer = TestClient::connect_raw(server.addr).unwrap();

    peer.send("PASS pw TS 5 :2BB").unwrap();
    peer.send("CAPAB :QS ENCAP").unwrap();
    peer.send("SERVER peer.example 1 :A peer").unwrap();

    let err = peer.read_until("ERROR").unwrap();
    assert_eq!(err, "ERROR :TS 5 is unsupported");
}

#[test]
fn local_user_announcements_reach_a_linked_peer() {
    let server = TestServer::start();

    let mut peer = TestClient::connect_raw(server.addr).unwrap();
    peer.send("PASS linkpw TS 6 :2BB").unwrap();
    peer.send("CAPAB :QS ENCAP").unwrap();
    peer.send("SERVER peer.example 1 :A peer").unwrap();
    peer.read_until("SERVER").unwrap();

    // A user registering after the link is announced live.
    let _alice = TestClient::connect(server.addr, "alice").unwrap();
    let uid = peer.read_until("UID").unwrap();
    assert!(uid.starts_with(":1AA UID alice 1 "));
}
