//! The control-plane socket: external tools connect to a Unix stream socket,
//! send one framed request and read zero or one response until EOF.
//!
//! Request framing is two newline-delimited fields, `"<command-id>\n<payload>"`
//! with the payload optional. Responses carry no length prefix; the server
//! writes everything it has and closes, so the connection close is the end
//! marker. Protocol-level garbage is dropped without a response and is never
//! fatal to the manager.

use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::client::Registry;
use crate::errors::ControlError;
use crate::monitor::Monitor;

/// A request is read with a single recv into a fixed buffer.
const REQUEST_BUFFER_SIZE: usize = 1024;

/// A peer that neither sends nor reads within this window is dropped.
const PEER_TIMEOUT: Duration = Duration::from_secs(5);

const WRITE_RETRY_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    GetClients,
    SelectClient,
    StateDump,
    Quit,
}

impl Command {
    pub fn from_id(id: &str) -> Option<Command> {
        match id.trim().parse::<u32>().ok()? {
            0 => Some(Command::GetClients),
            1 => Some(Command::SelectClient),
            2 => Some(Command::StateDump),
            3 => Some(Command::Quit),
            _ => None,
        }
    }
}

/// Split a raw request into its command and optional payload. Whitespace
/// around either field is tolerated (`"0 \n 1"`).
pub fn parse_request(raw: &str) -> Option<(Command, Option<&str>)> {
    let (id, payload) = match raw.split_once('\n') {
        Some((id, payload)) => (id, Some(payload.trim())),
        None => (raw, None),
    };

    let command = Command::from_id(id)?;
    let payload = payload.filter(|p| !p.is_empty());
    Some((command, payload))
}

/// `SelectClient` payloads are a decimal index; anything else is rejected
/// rather than coerced to zero.
pub fn parse_select_index(payload: &str) -> Option<usize> {
    payload.trim().parse::<usize>().ok()
}

/// `GetClients` response: one `"<index> <title>"` line per client in
/// registry order. Empty registry, empty response.
pub fn format_client_list(titles: impl IntoIterator<Item = impl AsRef<str>>) -> String {
    let mut response = String::new();
    for (index, title) in titles.into_iter().enumerate() {
        response.push_str(&format!("{} {}\n", index, title.as_ref()));
    }
    response
}

#[derive(Debug, Serialize)]
pub struct ScreenSize {
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Serialize)]
pub struct ClientRecord {
    pub index: usize,
    pub title: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub tiled: bool,
    pub fixed: bool,
}

/// The `StateDump` snapshot. `clients` always mirrors the live registry at
/// the moment of capture.
#[derive(Debug, Serialize)]
pub struct StateSnapshot {
    pub bar_visible: bool,
    pub screen: ScreenSize,
    pub active: Option<String>,
    pub clients: Vec<ClientRecord>,
}

impl StateSnapshot {
    pub fn capture(registry: &Registry, monitor: &Monitor) -> StateSnapshot {
        let clients = registry
            .iter()
            .enumerate()
            .map(|(index, client)| ClientRecord {
                index,
                title: client.name.clone(),
                x: client.x_position as i32,
                y: client.y_position as i32,
                width: client.width as u32,
                height: client.height as u32,
                tiled: !client.is_floating,
                fixed: client.is_fixed,
            })
            .collect();

        StateSnapshot {
            bar_visible: monitor.show_bar,
            screen: ScreenSize {
                width: monitor.screen_width,
                height: monitor.screen_height,
            },
            active: registry.head().map(|client| client.name.clone()),
            clients,
        }
    }
}

/// The listening side of the control plane. Binding removes any stale socket
/// file first; dropping the socket removes the file again so connections
/// after shutdown are refused.
pub struct ControlSocket {
    listener: UnixListener,
    path: PathBuf,
}

impl ControlSocket {
    pub fn bind(path: &Path) -> Result<ControlSocket, ControlError> {
        if path.exists() {
            std::fs::remove_file(path).ok();
        }

        let listener = UnixListener::bind(path).map_err(|source| ControlError::Bind {
            path: path.to_path_buf(),
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ControlError::Bind {
                path: path.to_path_buf(),
                source,
            })?;

        // The control channel is open to every local user.
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666)).map_err(
            |source| ControlError::Permissions {
                path: path.to_path_buf(),
                source,
            },
        )?;

        Ok(ControlSocket {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    /// Non-blocking accept: `None` when no peer is waiting.
    pub fn accept(&self) -> Option<UnixStream> {
        match self.listener.accept() {
            Ok((stream, _)) => Some(stream),
            Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => None,
            Err(error) => {
                warn!("control socket accept failed: {error}");
                None
            }
        }
    }
}

impl Drop for ControlSocket {
    fn drop(&mut self) {
        std::fs::remove_file(&self.path).ok();
    }
}

/// Read one request from a freshly accepted peer. A single recv, bounded
/// buffer; a peer that sends nothing within the timeout is dropped.
pub fn read_request(stream: &mut UnixStream) -> Option<String> {
    stream.set_nonblocking(false).ok();
    stream.set_read_timeout(Some(PEER_TIMEOUT)).ok();

    let mut buffer = [0u8; REQUEST_BUFFER_SIZE];
    let received = match stream.read(&mut buffer) {
        Ok(0) => return None,
        Ok(n) => n,
        Err(error) => {
            debug!("control request read failed: {error}");
            return None;
        }
    };

    Some(String::from_utf8_lossy(&buffer[..received]).into_owned())
}

/// Write the whole response, retrying transient failures, then let the
/// caller close the connection. Hard failures are logged and abandoned; the
/// connection still closes.
pub fn write_response(stream: &mut UnixStream, response: &[u8]) {
    stream.set_write_timeout(Some(PEER_TIMEOUT)).ok();

    let mut written = 0;
    let mut retries = 0;
    while written < response.len() {
        match stream.write(&response[written..]) {
            Ok(0) => {
                warn!("control peer closed mid-response");
                return;
            }
            Ok(n) => written += n,
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
            Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                retries += 1;
                if retries > WRITE_RETRY_LIMIT {
                    warn!("control response stalled, dropping peer");
                    return;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(error) => {
                warn!("control response write failed: {error}");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;

    #[test]
    fn command_ids_match_the_wire_protocol() {
        assert_eq!(Command::from_id("0"), Some(Command::GetClients));
        assert_eq!(Command::from_id("1"), Some(Command::SelectClient));
        assert_eq!(Command::from_id("2"), Some(Command::StateDump));
        assert_eq!(Command::from_id("3"), Some(Command::Quit));
        assert_eq!(Command::from_id("4"), None);
        assert_eq!(Command::from_id("-1"), None);
        assert_eq!(Command::from_id("junk"), None);
    }

    #[test]
    fn requests_split_into_command_and_payload() {
        assert_eq!(
            parse_request("1\n2"),
            Some((Command::SelectClient, Some("2")))
        );
        assert_eq!(parse_request("0"), Some((Command::GetClients, None)));
        assert_eq!(parse_request("0\n"), Some((Command::GetClients, None)));
        assert_eq!(parse_request("nonsense\npayload"), None);
    }

    #[test]
    fn sloppy_whitespace_framing_is_tolerated() {
        // Peers may pad both fields with spaces.
        assert_eq!(
            parse_request("0 \n 1"),
            Some((Command::GetClients, Some("1")))
        );
        assert_eq!(
            parse_request(" 1 \n 2 "),
            Some((Command::SelectClient, Some("2")))
        );
    }

    #[test]
    fn select_index_rejects_garbage() {
        assert_eq!(parse_select_index("2"), Some(2));
        assert_eq!(parse_select_index(" 14 "), Some(14));
        assert_eq!(parse_select_index("-3"), None);
        assert_eq!(parse_select_index("two"), None);
        assert_eq!(parse_select_index(""), None);
    }

    #[test]
    fn client_list_is_zero_indexed_in_order() {
        assert_eq!(format_client_list(Vec::<&str>::new()), "");
        assert_eq!(
            format_client_list(["W3", "W2", "W1"]),
            "0 W3\n1 W2\n2 W1\n"
        );
    }

    #[test]
    fn snapshot_mirrors_the_registry() {
        let mut registry = Registry::new();
        let monitor = Monitor::new(800, 600);

        let snapshot = StateSnapshot::capture(&registry, &monitor);
        assert!(snapshot.clients.is_empty());
        assert_eq!(snapshot.active, None);

        for (window, title) in [(1, "alpha"), (2, "beta")] {
            let mut client = Client::new(window);
            client.set_title(title);
            registry.attach(client);
        }
        let mut floater = Client::new(3);
        floater.set_title("gamma");
        floater.is_floating = true;
        registry.attach(floater);

        let snapshot = StateSnapshot::capture(&registry, &monitor);
        assert_eq!(snapshot.clients.len(), registry.len());
        assert_eq!(snapshot.active.as_deref(), Some("gamma"));
        assert_eq!(snapshot.screen.width, 800);
        assert!(!snapshot.clients[0].tiled);
        assert!(snapshot.clients[1].tiled);
    }

    #[test]
    fn snapshot_serializes_with_the_expected_fields() {
        let mut registry = Registry::new();
        let mut client = Client::new(7);
        client.set_title("term");
        registry.attach(client);

        let snapshot = StateSnapshot::capture(&registry, &Monitor::new(640, 480));
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["bar_visible"], true);
        assert_eq!(json["screen"]["width"], 640);
        assert_eq!(json["active"], "term");
        assert_eq!(json["clients"][0]["index"], 0);
        assert_eq!(json["clients"][0]["title"], "term");
        assert_eq!(json["clients"][0]["tiled"], true);
        assert_eq!(json["clients"][0]["fixed"], false);
    }

    // The full select flow as the manager runs it: map W1, W2, W3, list,
    // select index 1 (which reorders, since focus is the head), list again.
    #[test]
    fn select_flow_reorders_the_listing() {
        let mut registry = Registry::new();
        for (window, title) in [(1, "W1"), (2, "W2"), (3, "W3")] {
            let mut client = Client::new(window);
            client.set_title(title);
            registry.attach(client);
        }

        let listing = format_client_list(registry.iter().map(|c| c.name.as_str()));
        assert_eq!(listing, "0 W3\n1 W2\n2 W1\n");

        let index = parse_select_index("1").unwrap();
        let window = registry.get(index).map(|c| c.window).unwrap();
        registry.move_to_head(window);
        registry.partition_floating_first();

        assert_eq!(registry.find(window).unwrap().name, "W2");
        let listing = format_client_list(registry.iter().map(|c| c.name.as_str()));
        assert_eq!(listing, "0 W2\n1 W3\n2 W1\n");
    }

    #[test]
    fn select_out_of_range_changes_nothing() {
        let mut registry = Registry::new();
        for (window, title) in [(1, "W1"), (2, "W2")] {
            let mut client = Client::new(window);
            client.set_title(title);
            registry.attach(client);
        }
        let before: Vec<_> = registry.windows();

        // "2" parses but indexes past the end; the handler sends no
        // response and leaves focus alone.
        let index = parse_select_index("2").unwrap();
        assert!(registry.get(index).is_none());
        assert_eq!(registry.windows(), before);
    }

    #[test]
    fn socket_lifecycle_binds_accepts_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");

        let socket = ControlSocket::bind(&path).unwrap();
        assert!(path.exists());
        assert!(socket.accept().is_none());

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o666, 0o666);

        let mut peer = UnixStream::connect(&path).unwrap();
        peer.write_all(b"0\n").unwrap();
        let mut server_side = None;
        for _ in 0..50 {
            if let Some(stream) = socket.accept() {
                server_side = Some(stream);
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        let mut server_side = server_side.expect("pending connection should be accepted");
        let request = read_request(&mut server_side).expect("request should arrive");
        assert_eq!(parse_request(&request), Some((Command::GetClients, None)));

        write_response(&mut server_side, b"0 term\n");
        drop(server_side);
        let mut response = String::new();
        peer.read_to_string(&mut response).unwrap();
        assert_eq!(response, "0 term\n");

        // Dropping the socket removes the file; new connections are refused.
        drop(socket);
        assert!(!path.exists());
        assert!(UnixStream::connect(&path).is_err());
    }

    #[test]
    fn stale_socket_files_are_replaced_on_bind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");
        std::fs::write(&path, b"stale").unwrap();

        let socket = ControlSocket::bind(&path).unwrap();
        assert!(path.exists());
        drop(socket);
    }
}
