//! Loopback HTTP responder for exercising the `ureq` based clients.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

/// Serves one canned response per incoming connection, in order, and keeps
/// the raw requests so tests can assert on them.
pub struct StubServer {
    addr: SocketAddr,
    handle: JoinHandle<Vec<String>>,
}

impl StubServer {
    pub fn serve(responses: Vec<String>) -> Self {
        Self::serve_with(|_| responses)
    }

    /// Like [`StubServer::serve`], but the responses may embed the server's
    /// own base URL (e.g. in a `Location` header).
    pub fn serve_with(script: impl FnOnce(&str) -> Vec<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let responses = script(&format!("http://{addr}"));
        let handle = thread::spawn(move || {
            let mut requests = Vec::new();
            for response in responses {
                let (mut stream, _) = listener.accept().unwrap();
                requests.push(read_request(&mut stream));
                stream.write_all(response.as_bytes()).unwrap();
                stream.flush().unwrap();
            }
            requests
        });
        Self { addr, handle }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Waits for every canned response to be consumed.
    pub fn finish(self) -> Vec<String> {
        self.handle.join().unwrap()
    }
}

pub fn http_response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut response = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("\r\n");
    response.push_str(body);
    response
}

fn read_request(stream: &mut TcpStream) -> String {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    let header_end = loop {
        let read = stream.read(&mut buf).unwrap();
        if read == 0 {
            break raw.len();
        }
        raw.extend_from_slice(&buf[..read]);
        if let Some(pos) = find(&raw, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while raw.len() < header_end + content_length {
        let read = stream.read(&mut buf).unwrap();
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&buf[..read]);
    }

    String::from_utf8_lossy(&raw).to_string()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
