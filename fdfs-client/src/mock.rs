//! In-process tracker/storage node for tests.
//!
//! Accepts any number of connections. Every request packet is recorded and
//! answered with the next scripted response; QUIT closes the connection.

use crate::connection::Endpoint;
use fdfs_protocol::{command, pack_header, HEADER_SIZE, GROUP_NAME_MAX_LEN, IPADDR_SIZE};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A request packet as received.
#[derive(Debug, Clone)]
pub(crate) struct Captured {
    pub cmd: u8,
    pub body: Vec<u8>,
}

pub(crate) struct MockServer {
    port: u16,
    requests: Arc<Mutex<Vec<Captured>>>,
}

impl MockServer {
    pub async fn start(responses: Vec<Vec<u8>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let responses = Arc::new(Mutex::new(VecDeque::from(responses)));

        let captured = requests.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let captured = captured.clone();
                let responses = responses.clone();
                tokio::spawn(serve(socket, captured, responses));
            }
        });

        Self { port, requests }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Requests received so far, QUIT excluded.
    pub fn requests(&self) -> Vec<Captured> {
        self.requests.lock().clone()
    }

    /// Response packet with status 0 and `body`.
    pub fn ok(body: &[u8]) -> Vec<u8> {
        let mut pkg = pack_header(command::RESP, body.len() as i64, 0)
            .unwrap()
            .to_vec();
        pkg.extend_from_slice(body);
        pkg
    }

    /// Bodyless response packet carrying `status`.
    pub fn status(status: u8) -> Vec<u8> {
        pack_header(command::RESP, 0, status).unwrap().to_vec()
    }

    /// Store query response body.
    pub fn store_body(group: &str, ip: &str, port: u16, store_path: u8) -> Vec<u8> {
        let mut body = fixed(group.as_bytes(), GROUP_NAME_MAX_LEN);
        body.extend(fixed(ip.as_bytes(), IPADDR_SIZE - 1));
        body.extend_from_slice(&i64::from(port).to_be_bytes());
        body.push(store_path);
        body
    }

    /// Fetch/update query response body with extra IPs sharing the port.
    pub fn fetch_body(group: &str, ip: &str, port: u16, extra_ips: &[&str]) -> Vec<u8> {
        let mut body = fixed(group.as_bytes(), GROUP_NAME_MAX_LEN);
        body.extend(fixed(ip.as_bytes(), IPADDR_SIZE - 1));
        body.extend_from_slice(&i64::from(port).to_be_bytes());
        for extra in extra_ips {
            body.extend(fixed(extra.as_bytes(), IPADDR_SIZE - 1));
        }
        body
    }
}

/// Zero-padded copy of `value` in a `width`-byte field.
pub(crate) fn fixed(value: &[u8], width: usize) -> Vec<u8> {
    let mut field = vec![0u8; width];
    let n = value.len().min(width);
    field[..n].copy_from_slice(&value[..n]);
    field
}

async fn serve(
    mut socket: TcpStream,
    captured: Arc<Mutex<Vec<Captured>>>,
    responses: Arc<Mutex<VecDeque<Vec<u8>>>>,
) {
    loop {
        let mut header = [0u8; HEADER_SIZE];
        if socket.read_exact(&mut header).await.is_err() {
            return;
        }
        let mut len = [0u8; 8];
        len.copy_from_slice(&header[..8]);
        let len = i64::from_be_bytes(len) as usize;
        let cmd = header[8];
        if cmd == command::QUIT {
            return;
        }

        let mut body = vec![0u8; len];
        if socket.read_exact(&mut body).await.is_err() {
            return;
        }
        captured.lock().push(Captured { cmd, body });

        let response = responses.lock().pop_front();
        match response {
            Some(bytes) => {
                if socket.write_all(&bytes).await.is_err() {
                    return;
                }
            }
            None => return,
        }
    }
}
