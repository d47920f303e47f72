//! Minimal HTTP/1.1 object endpoint on a loopback socket.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
    /// Honour `Range` headers with 206 responses.
    Ranges,
    /// Ignore `Range` and send the whole object with 200.
    WholeObject,
    /// Answer every request with this status and no body.
    Status(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub path: String,
    /// Inclusive byte range from the `Range` header.
    pub range: Option<(u64, u64)>,
}

impl Request {
    pub fn len(&self) -> Option<u64> {
        self.range.map(|(start, end)| end - start + 1)
    }
}

pub struct ObjectServer {
    pub url: String,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl ObjectServer {
    /// Serves `body` at `http://127.0.0.1:<port>/archs4/archive.h5`.
    pub fn start(body: Vec<u8>, behaviour: Behaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!(
            "http://{}/archs4/archive.h5",
            listener.local_addr().unwrap()
        );
        let requests = Arc::new(Mutex::new(Vec::new()));
        let body = Arc::new(body);
        let log = Arc::clone(&requests);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let body = Arc::clone(&body);
                let log = Arc::clone(&log);
                thread::spawn(move || respond(stream, &body, behaviour, &log));
            }
        });
        Self { url, requests }
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

/// A loopback URL nothing listens on.
pub fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/archs4/archive.h5")
}

fn respond(stream: TcpStream, body: &[u8], behaviour: Behaviour, log: &Mutex<Vec<Request>>) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut line = String::new();
    if reader.read_line(&mut line).unwrap_or(0) == 0 {
        return;
    }
    let path = line.split_whitespace().nth(1).unwrap_or("").to_string();
    let mut range = None;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).unwrap_or(0) == 0 || header.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                range = parse_range(value.trim());
            }
        }
    }
    log.lock().unwrap().push(Request {
        path,
        range,
    });

    let total = body.len() as u64;
    let (status, headers, payload): (u16, String, &[u8]) = match (behaviour, range) {
        (Behaviour::Status(status), _) => (status, String::new(), &[]),
        (Behaviour::Ranges, Some((start, _))) if start >= total => (
            416,
            format!("Content-Range: bytes */{total}\r\n"),
            &[],
        ),
        (Behaviour::Ranges, Some((start, end))) => {
            let end = end.min(total - 1);
            (
                206,
                format!("Content-Range: bytes {start}-{end}/{total}\r\n"),
                &body[start as usize..=end as usize],
            )
        }
        (Behaviour::Ranges, None) | (Behaviour::WholeObject, _) => (200, String::new(), body),
    };

    let mut stream = stream;
    let head = format!(
        "HTTP/1.1 {status} {}\r\nContent-Length: {}\r\n{headers}Connection: close\r\n\r\n",
        reason(status),
        payload.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(payload);
    let _ = stream.flush();
}

fn parse_range(value: &str) -> Option<(u64, u64)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        206 => "Partial Content",
        403 => "Forbidden",
        404 => "Not Found",
        416 => "Range Not Satisfiable",
        _ => "Error",
    }
}
