/*
 * vKIM mail gateway
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

//! Sockets, backends and gateways for the tests of the sessions.

use crate::{
    connection::{stuff, unstuff, AbstractIO, Connection},
    pop3, smtp, Gateway,
};
use vkim_common::{
    logger::SessionKind,
    re::{anyhow, base64},
};
use vkim_config::Config;
use vkim_pipeline::{
    test_helpers::{practices, StaticResolver},
    Collaborators,
};

/// Password the fake backends accept.
pub const BACKEND_PASSWORD: &str = "secret";

/// Peer address of the sessions run by [`run_session`].
pub const CLIENT_ADDR: &str = "127.0.0.1:53844";

const TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A type implementing `AsyncRead` + `AsyncWrite` to emulate sockets
#[derive(Debug)]
pub struct Mock {
    read_cursor: std::io::Cursor<Vec<u8>>,
    written: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

impl Mock {
    /// Create an new instance, what the peer sends is `input`
    #[must_use]
    pub fn new(input: Vec<u8>) -> Self {
        Self {
            read_cursor: std::io::Cursor::new(input),
            written: std::sync::Arc::default(),
        }
    }

    /// what was written so far, shared with the mock
    #[must_use]
    pub fn written(&self) -> std::sync::Arc<std::sync::Mutex<Vec<u8>>> {
        self.written.clone()
    }
}

impl tokio::io::AsyncRead for Mock {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let read = std::io::Read::read(&mut self.read_cursor, buf.initialize_unfilled());
        std::task::Poll::Ready(read.map(|size| buf.advance(size)))
    }
}

impl tokio::io::AsyncWrite for Mock {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        lock(&self.written).extend_from_slice(buf);
        std::task::Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }
}

/// The test doubles of the collaborators: [`ALICE`](vkim_pipeline::test_helpers::ALICE)
/// and [`BOB`](vkim_pipeline::test_helpers::BOB) in the directory, the card
/// of bob in the connector, `mail.klinik.kim.de` resolved to the loopback.
#[must_use]
pub fn pipeline_doubles() -> Collaborators {
    practices(
        StaticResolver::new().with_record("mail.klinik.kim.de", std::net::Ipv4Addr::LOCALHOST),
    )
    .0
}

/// A gateway serving `config` with `collaborators`.
///
/// # Panics
///
/// * the gateway cannot be built from `config`
#[must_use]
pub fn test_gateway(config: Config, collaborators: Collaborators) -> std::sync::Arc<Gateway> {
    std::sync::Arc::new(Gateway::new(std::sync::Arc::new(config), collaborators).unwrap())
}

/// Serve `input` as a client of protocol `kind` would send it, and return
/// the outcome of the session with what the gateway answered.
///
/// # Panics
///
/// * [`CLIENT_ADDR`] is not a socket address
pub async fn run_session(
    kind: SessionKind,
    gateway: std::sync::Arc<Gateway>,
    input: &[u8],
) -> (anyhow::Result<()>, String) {
    let mock = Mock::new(input.to_vec());
    let written = mock.written();
    let conn = Connection::new(
        kind,
        CLIENT_ADDR.parse().unwrap(),
        gateway.config.clone(),
        mock,
    );

    let result = match kind {
        SessionKind::Smtp => smtp::handle_connection(conn, gateway).await,
        SessionKind::Pop3 => pop3::handle_connection(conn, gateway).await,
    };
    let written = String::from_utf8_lossy(&lock(&written)).into_owned();
    (result, written)
}

/// Login of the gateway pointing to a backend listening on `port` of the
/// loopback.
#[must_use]
pub fn account(user: &str, port: u16) -> String {
    format!("{user}#127.0.0.1:{port}#mandant-1#client-1#workplace-1")
}

async fn listen() -> (tokio::net::TcpListener, u16) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// A backend sending `greeting`, answering its first commands with `replies`
/// and then closing the connection.
pub async fn hanging_up_server(greeting: &'static str, replies: &'static [&'static str]) -> u16 {
    let (listener, port) = listen().await;
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            let mut io = AbstractIO::new(stream);
            let served = async {
                io.write_all(greeting.as_bytes()).await?;
                for reply in replies {
                    io.next_line(TIMEOUT).await?;
                    io.write_all(reply.as_bytes()).await?;
                }
                std::io::Result::Ok(())
            };
            let _ = served.await;
        }
    });
    port
}

#[derive(Debug, Default)]
struct SmtpJournal {
    commands: Vec<String>,
    messages: Vec<Vec<u8>>,
}

/// A SMTP server accepting the [`BACKEND_PASSWORD`] for every user, and
/// every recipient but the ones it is told to reject.
#[derive(Debug)]
pub struct FakeSmtpServer {
    port: u16,
    journal: std::sync::Arc<std::sync::Mutex<SmtpJournal>>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for FakeSmtpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl FakeSmtpServer {
    /// Listen on a free port of the loopback.
    ///
    /// # Panics
    ///
    /// * cannot bind the loopback
    pub async fn start(rejected: &[&str]) -> Self {
        let (listener, port) = listen().await;
        let journal = std::sync::Arc::<std::sync::Mutex<SmtpJournal>>::default();
        let rejected = std::sync::Arc::new(
            rejected
                .iter()
                .map(|address| format!("<{}>", address.to_lowercase()))
                .collect::<Vec<_>>(),
        );

        let task = {
            let journal = journal.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let (journal, rejected) = (journal.clone(), rejected.clone());
                    tokio::spawn(async move {
                        let _ = Self::serve(stream, journal, rejected).await;
                    });
                }
            })
        };

        Self {
            port,
            journal,
            task,
        }
    }

    ///
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// every command received, in order
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        lock(&self.journal).commands.clone()
    }

    /// the messages received, transparency removed
    #[must_use]
    pub fn messages(&self) -> Vec<Vec<u8>> {
        lock(&self.journal).messages.clone()
    }

    async fn serve(
        stream: tokio::net::TcpStream,
        journal: std::sync::Arc<std::sync::Mutex<SmtpJournal>>,
        rejected: std::sync::Arc<Vec<String>>,
    ) -> std::io::Result<()> {
        let mut io = AbstractIO::new(stream);
        io.write_all(b"220 mail.klinik.kim.de ESMTP ready\r\n").await?;

        loop {
            let line = io.next_line(TIMEOUT).await?;
            lock(&journal).commands.push(line.clone());

            let verb = line
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_ascii_uppercase();
            let reply = match verb.as_str() {
                "EHLO" => "250-mail.klinik.kim.de\r\n250 AUTH LOGIN PLAIN\r\n",
                "AUTH" => {
                    io.write_all(b"334 VXNlcm5hbWU6\r\n").await?;
                    io.next_line(TIMEOUT).await?;
                    io.write_all(b"334 UGFzc3dvcmQ6\r\n").await?;
                    let password = io.next_line(TIMEOUT).await?;
                    if base64::decode(password.trim()).unwrap_or_default()
                        == BACKEND_PASSWORD.as_bytes()
                    {
                        "235 2.7.0 Authentication successful\r\n"
                    } else {
                        "535 5.7.8 Authentication credentials invalid\r\n"
                    }
                }
                "MAIL" => "250 2.1.0 Ok\r\n",
                "RCPT" if rejected.iter().any(|r| line.to_lowercase().contains(r)) => {
                    "550 5.1.1 Mailbox unavailable\r\n"
                }
                "RCPT" => "250 2.1.5 Ok\r\n",
                "DATA" => {
                    io.write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                        .await?;
                    let mut message = vec![];
                    loop {
                        let line = io.next_raw_line(TIMEOUT).await?;
                        if line == b"." {
                            break;
                        }
                        message.extend_from_slice(unstuff(&line));
                        message.extend_from_slice(b"\r\n");
                    }
                    lock(&journal).messages.push(message);
                    "250 2.0.0 Ok: queued\r\n"
                }
                "RSET" | "NOOP" => "250 2.0.0 Ok\r\n",
                "QUIT" => {
                    io.write_all(b"221 2.0.0 Bye\r\n").await?;
                    return Ok(());
                }
                _ => "500 5.5.2 Command unrecognized\r\n",
            };
            io.write_all(reply.as_bytes()).await?;
        }
    }
}

#[derive(Debug, Default)]
struct Pop3Journal {
    commands: Vec<String>,
    /// deletions are applied on `QUIT`
    mailbox: Vec<Vec<u8>>,
}

/// A POP3 server accepting the [`BACKEND_PASSWORD`] for every user, all the
/// users share one mailbox.
#[derive(Debug)]
pub struct FakePop3Server {
    port: u16,
    journal: std::sync::Arc<std::sync::Mutex<Pop3Journal>>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for FakePop3Server {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl FakePop3Server {
    /// Listen on a free port of the loopback, serving `mailbox`.
    ///
    /// # Panics
    ///
    /// * cannot bind the loopback
    pub async fn start(mailbox: Vec<Vec<u8>>) -> Self {
        let (listener, port) = listen().await;
        let journal = std::sync::Arc::new(std::sync::Mutex::new(Pop3Journal {
            commands: vec![],
            mailbox,
        }));

        let task = {
            let journal = journal.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let journal = journal.clone();
                    tokio::spawn(async move {
                        let _ = Self::serve(stream, journal).await;
                    });
                }
            })
        };

        Self {
            port,
            journal,
            task,
        }
    }

    ///
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// every command received, in order
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        lock(&self.journal).commands.clone()
    }

    /// the messages left in the mailbox
    #[must_use]
    pub fn mailbox(&self) -> Vec<Vec<u8>> {
        lock(&self.journal).mailbox.clone()
    }

    /// the message `number` of `mailbox`, unless marked as deleted
    fn message<'a>(
        mailbox: &'a [Vec<u8>],
        deleted: &[usize],
        number: Option<&str>,
    ) -> Option<(usize, &'a [u8])> {
        let index = number?.parse::<usize>().ok()?.checked_sub(1)?;
        if deleted.contains(&index) {
            return None;
        }
        mailbox
            .get(index)
            .map(|message| (index + 1, message.as_slice()))
    }

    async fn serve(
        stream: tokio::net::TcpStream,
        journal: std::sync::Arc<std::sync::Mutex<Pop3Journal>>,
    ) -> std::io::Result<()> {
        let mut io = AbstractIO::new(stream);
        io.write_all(b"+OK POP3 ready\r\n").await?;

        let mut authenticated = false;
        let mut deleted = Vec::<usize>::new();
        loop {
            let line = io.next_line(TIMEOUT).await?;
            lock(&journal).commands.push(line.clone());
            let mailbox = lock(&journal).mailbox.clone();

            let mut words = line.split_whitespace();
            let verb = words.next().unwrap_or_default().to_ascii_uppercase();
            let (first, second) = (words.next(), words.next());

            let response = match (verb.as_str(), authenticated) {
                ("USER", false) => "+OK\r\n".to_string(),
                ("PASS", false) if first == Some(BACKEND_PASSWORD) => {
                    authenticated = true;
                    "+OK mailbox locked\r\n".to_string()
                }
                ("PASS", false) => "-ERR invalid credentials\r\n".to_string(),
                ("STAT", true) => {
                    let (count, size) = mailbox
                        .iter()
                        .enumerate()
                        .filter(|(index, _)| !deleted.contains(index))
                        .fold((0, 0), |(count, size), (_, message)| {
                            (count + 1, size + message.len())
                        });
                    format!("+OK {count} {size}\r\n")
                }
                ("LIST" | "UIDL", true) if first.is_none() => {
                    let mut response = "+OK\r\n".to_string();
                    for (index, message) in mailbox.iter().enumerate() {
                        if !deleted.contains(&index) {
                            response.push_str(&if verb == "LIST" {
                                format!("{} {}\r\n", index + 1, message.len())
                            } else {
                                format!("{} uid-{}\r\n", index + 1, index + 1)
                            });
                        }
                    }
                    response.push_str(".\r\n");
                    response
                }
                ("LIST", true) => match Self::message(&mailbox, &deleted, first) {
                    Some((number, message)) => format!("+OK {number} {}\r\n", message.len()),
                    None => "-ERR no such message\r\n".to_string(),
                },
                ("UIDL", true) => match Self::message(&mailbox, &deleted, first) {
                    Some((number, _)) => format!("+OK {number} uid-{number}\r\n"),
                    None => "-ERR no such message\r\n".to_string(),
                },
                ("RETR" | "TOP", true) => match Self::message(&mailbox, &deleted, first) {
                    Some((_, message)) => {
                        let message = match second.and_then(|lines| lines.parse::<usize>().ok())
                        {
                            Some(lines) if verb == "TOP" => top(message, lines),
                            _ => message.to_vec(),
                        };
                        let mut response = format!("+OK {} octets\r\n", message.len()).into_bytes();
                        response.extend_from_slice(&stuff(&message));
                        response.extend_from_slice(b".\r\n");
                        io.write_all(&response).await?;
                        continue;
                    }
                    None => "-ERR no such message\r\n".to_string(),
                },
                ("DELE", true) => match Self::message(&mailbox, &deleted, first) {
                    Some((number, _)) => {
                        deleted.push(number - 1);
                        format!("+OK message {number} deleted\r\n")
                    }
                    None => "-ERR no such message\r\n".to_string(),
                },
                ("RSET", true) => {
                    deleted.clear();
                    "+OK\r\n".to_string()
                }
                ("NOOP", true) => "+OK\r\n".to_string(),
                ("QUIT", _) => {
                    {
                        let mut journal = lock(&journal);
                        journal.mailbox = std::mem::take(&mut journal.mailbox)
                            .into_iter()
                            .enumerate()
                            .filter(|(index, _)| !deleted.contains(index))
                            .map(|(_, message)| message)
                            .collect();
                    }
                    io.write_all(b"+OK bye\r\n").await?;
                    return Ok(());
                }
                _ => "-ERR command not allowed\r\n".to_string(),
            };
            io.write_all(response.as_bytes()).await?;
        }
    }
}

/// the headers of `message` and the first `lines` of its body
fn top(message: &[u8], lines: usize) -> Vec<u8> {
    let mut out = vec![];
    let mut in_body = false;
    let mut body_lines = 0;
    for line in message.split_inclusive(|byte| *byte == b'\n') {
        if in_body {
            if body_lines == lines {
                break;
            }
            body_lines += 1;
        } else if line == b"\r\n" || line == b"\n" {
            in_body = true;
        }
        out.extend_from_slice(line);
    }
    out
}
