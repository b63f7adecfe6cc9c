//! In-process HTTP server fixture for exercising range requests.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

/// What the fixture server does with range requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerBehavior {
    /// Honor byte ranges with 206 responses.
    Ranges,
    /// Ignore the Range header and answer 200 with the whole file.
    FullBodyOnly,
    /// Answer 404 to everything.
    NotFound,
    /// Honor ranges but claim a gzip content coding.
    GzipCoded,
    /// Honor ranges but deliver one byte fewer than requested.
    ShortBody,
}

/// Serve `data` on a loopback port; returns the file URL.
///
/// The listener thread lives for the rest of the test process, which is
/// fine for a fixture.
pub fn spawn_server(data: Vec<u8>, behavior: ServerBehavior) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/file", listener.local_addr().unwrap());
    let data = Arc::new(data);
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let data = Arc::clone(&data);
            thread::spawn(move || handle(stream, &data, behavior));
        }
    });
    url
}

fn handle(mut stream: TcpStream, data: &[u8], behavior: ServerBehavior) {
    let Some(range) = read_request(&stream) else {
        return;
    };

    match behavior {
        ServerBehavior::NotFound => {
            let _ = write!(
                stream,
                "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            );
        }
        ServerBehavior::FullBodyOnly => {
            let _ = write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                data.len()
            );
            let _ = stream.write_all(data);
        }
        ServerBehavior::Ranges | ServerBehavior::GzipCoded | ServerBehavior::ShortBody => {
            let Some((begin, end_inclusive)) = range else {
                // No Range header: behave like a plain file server.
                let _ = write!(
                    stream,
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    data.len()
                );
                let _ = stream.write_all(data);
                return;
            };
            let begin = begin.min(data.len() as u64) as usize;
            let end = ((end_inclusive + 1).min(data.len() as u64)) as usize;
            let mut body = &data[begin..end];
            if behavior == ServerBehavior::ShortBody && !body.is_empty() {
                body = &body[..body.len() - 1];
            }
            let encoding = if behavior == ServerBehavior::GzipCoded {
                "Content-Encoding: gzip\r\n"
            } else {
                ""
            };
            let _ = write!(
                stream,
                "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {}-{}/{}\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n",
                begin,
                end.saturating_sub(1),
                data.len(),
                encoding,
                body.len()
            );
            let _ = stream.write_all(body);
        }
    }
    let _ = stream.flush();
}

/// Read one request; returns `Some(range)` where `range` is the parsed
/// `Range: bytes=a-b` header if present, or `None` when the request is
/// unreadable.
fn read_request(stream: &TcpStream) -> Option<Option<(u64, u64)>> {
    let mut reader = BufReader::new(stream.try_clone().ok()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).ok()?;

    let mut range = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).ok()? == 0 {
            return None;
        }
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let lower = line.to_ascii_lowercase();
        if let Some(spec) = lower.strip_prefix("range: bytes=") {
            if let Some((a, b)) = spec.split_once('-') {
                if let (Ok(a), Ok(b)) = (a.trim().parse(), b.trim().parse()) {
                    range = Some((a, b));
                }
            }
        }
    }
    Some(range)
}
