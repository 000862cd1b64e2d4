//! A one-connection-at-a-time HTTP/1.1 server for network URL tests.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver};
use std::thread;

/// What the server does with one accepted connection.
pub enum Reply {
    /// Write this status and body, then close.
    Full { status: &'static str, body: Vec<u8> },
    /// Announce `length` bytes, write `prefix`, then hold the socket open
    /// until `release` fires.
    Stall {
        length: usize,
        prefix: Vec<u8>,
        release: Receiver<()>,
    },
}

pub fn ok(body: &[u8]) -> Reply {
    Reply::Full {
        status: "200 OK",
        body: body.to_vec(),
    }
}

pub fn status(status: &'static str) -> Reply {
    Reply::Full {
        status,
        body: Vec::new(),
    }
}

pub struct Server {
    /// `http://127.0.0.1:PORT`
    pub base: String,
    /// Request heads, one per served connection.
    pub requests: Receiver<String>,
}

/// Serve `replies` in order, one per connection.
pub fn serve(replies: Vec<Reply>) -> Server {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (sender, requests) = mpsc::channel();

    thread::spawn(move || {
        for reply in replies {
            let Ok((stream, _)) = listener.accept() else {
                return;
            };
            let head = read_head(&stream);
            let is_head = head.starts_with("HEAD ");
            let _ = sender.send(head);
            respond(stream, reply, is_head);
        }
    });

    Server { base, requests }
}

/// A client that ignores proxy settings from the environment.
pub fn client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder().no_proxy().build().unwrap()
}

/// Value of header `name` in a request head, compared case-insensitively.
pub fn header(head: &str, name: &str) -> Option<String> {
    head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().to_string())
    })
}

fn read_head(stream: &TcpStream) -> String {
    let mut reader = BufReader::new(stream);
    let mut head = String::new();
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) if line == "\r\n" => break,
            Ok(_) => head.push_str(&line),
        }
    }
    head
}

fn respond(mut stream: TcpStream, reply: Reply, is_head: bool) {
    match reply {
        Reply::Full { status, body } => {
            let _ = write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            if !is_head {
                let _ = stream.write_all(&body);
            }
        }
        Reply::Stall {
            length,
            prefix,
            release,
        } => {
            let _ = write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Length: {length}\r\nConnection: close\r\n\r\n"
            );
            let _ = stream.write_all(&prefix);
            let _ = stream.flush();
            let _ = release.recv();
        }
    }
}
