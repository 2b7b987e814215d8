//! Source RCON client over a plain TCP stream.

use super::{ConsoleLink, Interrupt};
use crate::config::RconConfig;
use crate::error::{ControlError, ControlResult};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

const SERVERDATA_AUTH: i32 = 3;
const SERVERDATA_AUTH_RESPONSE: i32 = 2;
const SERVERDATA_EXECCOMMAND: i32 = 2;

/// id, type and the two terminating nul bytes
const PACKET_OVERHEAD: usize = 10;
const MAX_PACKET_SIZE: usize = 4096 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Packet {
    pub id: i32,
    pub kind: i32,
    pub body: String,
}

impl Packet {
    fn new(id: i32, kind: i32, body: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            body: body.into(),
        }
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let body = self.body.as_bytes();
        let size = (body.len() + PACKET_OVERHEAD) as i32;
        let mut buf = Vec::with_capacity(body.len() + PACKET_OVERHEAD + 4);
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.kind.to_le_bytes());
        buf.extend_from_slice(body);
        buf.extend_from_slice(&[0, 0]);
        buf
    }

    pub(crate) fn read_from<R: Read>(reader: &mut R) -> ControlResult<Self> {
        let size = read_i32(reader)?;
        if size < PACKET_OVERHEAD as i32 || size as usize > MAX_PACKET_SIZE {
            return Err(ControlError::Transport(format!(
                "invalid RCON packet size {}",
                size
            )));
        }
        let mut rest = vec![0u8; size as usize];
        reader.read_exact(&mut rest).map_err(transport)?;
        let id = i32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
        let kind = i32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]);
        let body = &rest[8..rest.len() - 2];
        Ok(Self {
            id,
            kind,
            body: String::from_utf8_lossy(body).into_owned(),
        })
    }
}

fn read_i32<R: Read>(reader: &mut R) -> ControlResult<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).map_err(transport)?;
    Ok(i32::from_le_bytes(buf))
}

fn transport(e: std::io::Error) -> ControlError {
    ControlError::Transport(e.to_string())
}

/// Console link speaking the Source RCON protocol.
pub struct RconLink {
    stream: Option<TcpStream>,
    /// Second handle on the same socket, usable while a request holds `stream`.
    control: Option<Arc<TcpStream>>,
    next_id: i32,
    address: String,
}

impl RconLink {
    /// Connect and authenticate.
    pub fn connect(config: &RconConfig) -> ControlResult<Self> {
        let address = format!("{}:{}", config.host, config.port);
        let socket = address
            .to_socket_addrs()
            .map_err(transport)?
            .next()
            .ok_or_else(|| ControlError::Transport(format!("cannot resolve {}", address)))?;

        let stream = TcpStream::connect_timeout(
            &socket,
            Duration::from_millis(config.connect_timeout_ms),
        )
        .map_err(transport)?;
        stream
            .set_read_timeout(Some(Duration::from_millis(config.read_timeout_ms)))
            .map_err(transport)?;
        stream.set_nodelay(true).map_err(transport)?;
        let control = stream.try_clone().map_err(transport)?;

        let mut link = Self {
            stream: Some(stream),
            control: Some(Arc::new(control)),
            next_id: 1,
            address,
        };
        link.authenticate(&config.password)?;
        tracing::info!("connected to RCON at {}", link.address);
        Ok(link)
    }

    fn authenticate(&mut self, password: &str) -> ControlResult<()> {
        let id = self.allocate_id();
        let stream = self.stream()?;
        stream
            .write_all(&Packet::new(id, SERVERDATA_AUTH, password).to_bytes())
            .map_err(transport)?;
        // Some servers send an empty response value before the auth response
        loop {
            let packet = Packet::read_from(stream)?;
            if packet.kind != SERVERDATA_AUTH_RESPONSE {
                continue;
            }
            if packet.id == -1 {
                return Err(ControlError::Transport(
                    "RCON authentication rejected".to_string(),
                ));
            }
            return Ok(());
        }
    }

    fn allocate_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = if self.next_id == i32::MAX { 1 } else { self.next_id + 1 };
        id
    }

    fn stream(&mut self) -> ControlResult<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| ControlError::Transport("RCON link is closed".to_string()))
    }
}

impl ConsoleLink for RconLink {
    fn send(&mut self, command: &str) -> ControlResult<String> {
        let mut batch = IndexMap::new();
        batch.insert(String::new(), command.to_string());
        let mut replies = self.send_batch(&batch)?;
        replies
            .shift_remove("")
            .ok_or_else(|| ControlError::Transport("no reply to command".to_string()))
    }

    fn send_batch(
        &mut self,
        commands: &IndexMap<String, String>,
    ) -> ControlResult<IndexMap<String, String>> {
        let mut wire = Vec::new();
        let mut tags_by_id: HashMap<i32, &str> = HashMap::with_capacity(commands.len());
        for (tag, command) in commands {
            let id = self.allocate_id();
            tags_by_id.insert(id, tag.as_str());
            wire.extend(Packet::new(id, SERVERDATA_EXECCOMMAND, command.as_str()).to_bytes());
        }

        let stream = self.stream()?;
        stream.write_all(&wire).map_err(transport)?;

        let mut bodies: HashMap<i32, String> = HashMap::with_capacity(commands.len());
        while bodies.len() < tags_by_id.len() {
            let packet = Packet::read_from(stream)?;
            if !tags_by_id.contains_key(&packet.id) {
                tracing::debug!("ignoring RCON packet with unknown id {}", packet.id);
                continue;
            }
            bodies.entry(packet.id).or_default().push_str(&packet.body);
        }

        let mut by_tag: HashMap<&str, String> = bodies
            .into_iter()
            .filter_map(|(id, body)| tags_by_id.get(&id).map(|tag| (*tag, body)))
            .collect();
        Ok(commands
            .keys()
            .map(|tag| {
                let body = by_tag.remove(tag.as_str()).unwrap_or_default();
                (tag.clone(), body)
            })
            .collect())
    }

    fn close(&mut self) -> ControlResult<()> {
        self.control = None;
        if let Some(stream) = self.stream.take() {
            tracing::info!("closing RCON link to {}", self.address);
            // Already-closed peers are fine here
            let _ = stream.shutdown(Shutdown::Both);
        }
        Ok(())
    }

    fn interrupt_handle(&self) -> Option<Interrupt> {
        let control = self.control.clone()?;
        let address = self.address.clone();
        Some(Arc::new(move || {
            tracing::info!("interrupting RCON link to {}", address);
            let _ = control.shutdown(Shutdown::Both);
        }))
    }
}

impl Drop for RconLink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_packet_layout() {
        let bytes = Packet::new(7, SERVERDATA_EXECCOMMAND, "/sc game.tick").to_bytes();
        assert_eq!(&bytes[0..4], &(23i32).to_le_bytes());
        assert_eq!(&bytes[4..8], &7i32.to_le_bytes());
        assert_eq!(&bytes[8..12], &2i32.to_le_bytes());
        assert_eq!(&bytes[bytes.len() - 2..], &[0, 0]);

        let decoded = Packet::read_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded.body, "/sc game.tick");
        assert_eq!(decoded.id, 7);
    }

    #[test]
    fn test_rejects_truncated_packet() {
        let mut bytes = Packet::new(1, 0, "hello").to_bytes();
        bytes.truncate(10);
        assert!(matches!(
            Packet::read_from(&mut Cursor::new(bytes)),
            Err(ControlError::Transport(_))
        ));
    }

    fn serve_once(password: &'static str) -> (RconConfig, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let auth = Packet::read_from(&mut conn).unwrap();
            let id = if auth.body == password { auth.id } else { -1 };
            conn.write_all(&Packet::new(auth.id, 0, "").to_bytes()).unwrap();
            conn.write_all(&Packet::new(id, SERVERDATA_AUTH_RESPONSE, "").to_bytes())
                .unwrap();
            if id == -1 {
                return;
            }
            // Answer two commands in reverse order
            let first = Packet::read_from(&mut conn).unwrap();
            let second = Packet::read_from(&mut conn).unwrap();
            for p in [second, first] {
                let reply = format!("echo:{}", p.body);
                conn.write_all(&Packet::new(p.id, 0, reply).to_bytes()).unwrap();
            }
        });
        let config = RconConfig {
            host: "127.0.0.1".to_string(),
            port,
            password: password.to_string(),
            ..RconConfig::default()
        };
        (config, handle)
    }

    #[test]
    fn test_batch_replies_matched_by_id() {
        let (config, server) = serve_once("secret");
        let mut link = RconLink::connect(&config).unwrap();
        let mut batch = IndexMap::new();
        batch.insert("0_a".to_string(), "/sc a".to_string());
        batch.insert("1_a".to_string(), "/sc b".to_string());
        let replies = link.send_batch(&batch).unwrap();
        assert_eq!(replies["0_a"], "echo:/sc a");
        assert_eq!(replies["1_a"], "echo:/sc b");
        assert_eq!(replies.keys().collect::<Vec<_>>(), vec!["0_a", "1_a"]);
        link.close().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_interrupt_unblocks_pending_read() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let auth = Packet::read_from(&mut conn).unwrap();
            conn.write_all(&Packet::new(auth.id, SERVERDATA_AUTH_RESPONSE, "").to_bytes())
                .unwrap();
            // Read the command and never answer it
            let _ = Packet::read_from(&mut conn);
            let _ = release_rx.recv_timeout(Duration::from_secs(10));
        });
        let config = RconConfig {
            host: "127.0.0.1".to_string(),
            port,
            password: "secret".to_string(),
            ..RconConfig::default()
        };
        let mut link = RconLink::connect(&config).unwrap();
        let interrupt = link.interrupt_handle().unwrap();

        let started = std::time::Instant::now();
        let interrupter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            interrupt();
        });
        assert!(matches!(
            link.send("/sc rcon.print(game.tick)"),
            Err(ControlError::Transport(_))
        ));
        assert!(started.elapsed() < Duration::from_secs(5));

        interrupter.join().unwrap();
        let _ = release_tx.send(());
        server.join().unwrap();
    }

    #[test]
    fn test_wrong_password_is_transport_error() {
        let mut config = serve_once("secret");
        config.0.password = "nope".to_string();
        assert!(matches!(
            RconLink::connect(&config.0),
            Err(ControlError::Transport(_))
        ));
        config.1.join().unwrap();
    }
}
