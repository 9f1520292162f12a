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

use vkim_common::{
    logger::SessionKind,
    re::{anyhow, tracing},
    Reply,
};
use vkim_config::Config;

/// A byte stream a session talks through, plain or under tls.
pub trait Io: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Sync + Unpin {}

impl<T> Io for T where T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Sync + Unpin {}

/// Line oriented reader over a stream.
#[derive(Debug)]
pub struct AbstractIO<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    ///
    pub inner: S,
    buffer: Vec<u8>,
}

impl<S> AbstractIO<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    ///
    pub const fn new(stream: S) -> Self {
        Self {
            inner: stream,
            buffer: Vec::new(),
        }
    }

    async fn read_line(&mut self) -> std::io::Result<Vec<u8>> {
        loop {
            if let Some(end) = self.buffer.iter().position(|byte| *byte == b'\n') {
                let mut line = self.buffer.drain(..=end).collect::<Vec<_>>();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(line);
            }

            let mut chunk = [0; 4096];
            match tokio::io::AsyncReadExt::read(&mut self.inner, &mut chunk).await? {
                0 => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed by peer",
                    ))
                }
                size => self.buffer.extend_from_slice(&chunk[..size]),
            }
        }
    }

    /// The next line, without its line ending.
    ///
    /// # Errors
    ///
    /// * timed-out
    /// * the peer closed the connection
    /// * stream's error
    pub async fn next_raw_line(
        &mut self,
        timeout: std::time::Duration,
    ) -> std::io::Result<Vec<u8>> {
        tokio::time::timeout(timeout, self.read_line())
            .await
            .map_err(|t| std::io::Error::new(std::io::ErrorKind::TimedOut, t))?
    }

    /// The next line as text, invalid utf8 is replaced.
    ///
    /// # Errors
    ///
    /// * see [`Self::next_raw_line`]
    pub async fn next_line(&mut self, timeout: std::time::Duration) -> std::io::Result<String> {
        self.next_raw_line(timeout)
            .await
            .map(|line| String::from_utf8_lossy(&line).into_owned())
    }

    /// `true` if bytes were received after the last line read
    #[must_use]
    pub fn has_pending_input(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Write all of `bytes`.
    ///
    /// # Errors
    ///
    /// * stream's error
    pub async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        tokio::io::AsyncWriteExt::write_all(&mut self.inner, bytes).await?;
        tokio::io::AsyncWriteExt::flush(&mut self.inner).await
    }
}

/// Instance containing the state of a client connection
pub struct Connection {
    /// protocol served
    pub kind: SessionKind,
    /// connection timestamp
    pub timestamp: std::time::SystemTime,
    /// is still alive
    pub is_alive: bool,
    /// server's configuration
    pub config: std::sync::Arc<Config>,
    /// peer socket address
    pub client_addr: std::net::SocketAddr,
    /// is under tls (STARTTLS / STLS)
    pub is_secured: bool,
    /// abstraction of the stream
    pub io_stream: AbstractIO<Box<dyn Io>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("kind", &self.kind)
            .field("client_addr", &self.client_addr)
            .field("is_alive", &self.is_alive)
            .field("is_secured", &self.is_secured)
            .finish_non_exhaustive()
    }
}

impl Connection {
    ///
    pub fn new(
        kind: SessionKind,
        client_addr: std::net::SocketAddr,
        config: std::sync::Arc<Config>,
        io_stream: impl Io + 'static,
    ) -> Self {
        Self {
            kind,
            timestamp: std::time::SystemTime::now(),
            is_alive: true,
            config,
            client_addr,
            is_secured: false,
            io_stream: AbstractIO::new(Box::new(io_stream)),
        }
    }

    /// idle timeout of the protocol served
    #[must_use]
    pub fn idle_timeout(&self) -> std::time::Duration {
        match self.kind {
            SessionKind::Smtp => self.config.gateway.smtp.idle_timeout,
            SessionKind::Pop3 => self.config.gateway.pop3.idle_timeout,
        }
    }

    /// Send a buffer
    ///
    /// # Errors
    ///
    /// * internal connection writer error
    pub async fn send(&mut self, reply: &str) -> anyhow::Result<()> {
        tracing::debug!(client = %self.client_addr, "send=\"{}\"", reply.trim_end());
        self.io_stream
            .write_all(reply.as_bytes())
            .await
            .map_err(anyhow::Error::new)
    }

    /// Send bytes as is, used for the messages.
    ///
    /// # Errors
    ///
    /// * internal connection writer error
    pub async fn send_raw(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        tracing::debug!(client = %self.client_addr, size = bytes.len(), "send raw");
        self.io_stream
            .write_all(bytes)
            .await
            .map_err(anyhow::Error::new)
    }

    /// Send a SMTP reply
    ///
    /// # Errors
    ///
    /// * internal connection writer error
    pub async fn send_reply(&mut self, reply: &Reply) -> anyhow::Result<()> {
        self.send(&reply.fold()).await
    }

    /// read a line from the client
    ///
    /// # Errors
    ///
    /// * timed-out
    /// * stream's error
    pub async fn read(&mut self) -> std::io::Result<String> {
        let timeout = self.idle_timeout();
        let line = self.io_stream.next_line(timeout).await?;
        tracing::debug!(client = %self.client_addr, "recv=\"{line}\"");
        Ok(line)
    }

    /// read a line of a message from the client
    ///
    /// # Errors
    ///
    /// * timed-out
    /// * stream's error
    pub async fn read_raw(&mut self) -> std::io::Result<Vec<u8>> {
        let timeout = self.idle_timeout();
        self.io_stream.next_raw_line(timeout).await
    }

    /// Complete the tls handshake and continue the connection over it.
    ///
    /// # Errors
    ///
    /// * the client sent commands after the one starting tls
    /// * the handshake failed or timed-out
    pub async fn upgrade_tls(
        self,
        acceptor: &tokio_rustls::TlsAcceptor,
        handshake_timeout: std::time::Duration,
    ) -> anyhow::Result<Self> {
        if self.io_stream.has_pending_input() {
            anyhow::bail!("plaintext received after the tls upgrade was requested");
        }

        let Self {
            kind,
            timestamp,
            is_alive,
            config,
            client_addr,
            io_stream,
            ..
        } = self;

        let stream = tokio::time::timeout(handshake_timeout, acceptor.accept(io_stream.inner))
            .await
            .map_err(|t| std::io::Error::new(std::io::ErrorKind::TimedOut, t))??;
        tracing::info!(client = %client_addr, "tls handshake completed");

        Ok(Self {
            kind,
            timestamp,
            is_alive,
            config,
            client_addr,
            is_secured: true,
            io_stream: AbstractIO::new(Box::new(stream)),
        })
    }
}

/// Undo the transparency of a line of a message (RFC 5321 4.5.2).
#[must_use]
pub fn unstuff(line: &[u8]) -> &[u8] {
    if line.starts_with(b"..") {
        &line[1..]
    } else {
        line
    }
}

/// Apply the transparency to a message, lines are CRLF terminated and the
/// final "." line is not added.
#[must_use]
pub fn stuff(content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 16);
    for line in content.split_inclusive(|byte| *byte == b'\n') {
        if line.first() == Some(&b'.') {
            out.push(b'.');
        }
        if line.ends_with(b"\r\n") {
            out.extend_from_slice(line);
        } else {
            let line = line.strip_suffix(b"\n").unwrap_or(line);
            out.extend_from_slice(line);
            out.extend_from_slice(b"\r\n");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{stuff, unstuff, AbstractIO};

    #[tokio::test]
    async fn lines() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut io = AbstractIO::new(client);
        tokio::io::AsyncWriteExt::write_all(&mut server, b"NOOP\r\nQUIT\nlast")
            .await
            .unwrap();
        drop(server);

        let timeout = std::time::Duration::from_secs(1);
        pretty_assertions::assert_eq!(io.next_line(timeout).await.unwrap(), "NOOP");
        pretty_assertions::assert_eq!(io.next_line(timeout).await.unwrap(), "QUIT");
        assert!(io.has_pending_input());
        pretty_assertions::assert_eq!(
            io.next_line(timeout).await.unwrap_err().kind(),
            std::io::ErrorKind::UnexpectedEof
        );
    }

    #[tokio::test]
    async fn idle() {
        let (client, _server) = tokio::io::duplex(64);
        let mut io = AbstractIO::new(client);
        pretty_assertions::assert_eq!(
            io.next_line(std::time::Duration::from_millis(10))
                .await
                .unwrap_err()
                .kind(),
            std::io::ErrorKind::TimedOut
        );
    }

    #[test]
    fn transparency() {
        pretty_assertions::assert_eq!(
            stuff(b"a\r\n.b\r\n..\nc"),
            b"a\r\n..b\r\n...\r\nc\r\n".to_vec()
        );
        pretty_assertions::assert_eq!(unstuff(b"..b"), b".b");
        pretty_assertions::assert_eq!(unstuff(b".b"), b".b");
        pretty_assertions::assert_eq!(unstuff(b"b"), b"b");
    }
}
