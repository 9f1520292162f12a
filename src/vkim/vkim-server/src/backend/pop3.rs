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

use super::{BackendConnection, BackendTarget};
use crate::connection::{unstuff, AbstractIO, Io};
use vkim_common::re::{anyhow, tracing};
use vkim_config::BackendSecurity;

/// Response of a POP3 server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pop3Response {
    /// the status line, `+OK ...` or `-ERR ...`
    pub status: String,
    /// the lines of a multi-line response, still dot-stuffed, without the
    /// final "."
    pub lines: Vec<Vec<u8>>,
}

impl Pop3Response {
    ///
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status.starts_with("+OK")
    }

    /// the response as sent on the wire
    #[must_use]
    pub fn to_wire(&self, multiline: bool) -> Vec<u8> {
        let mut out = format!("{}\r\n", self.status).into_bytes();
        if multiline && self.is_ok() {
            for line in &self.lines {
                out.extend_from_slice(line);
                out.extend_from_slice(b"\r\n");
            }
            out.extend_from_slice(b".\r\n");
        }
        out
    }

    /// the content of a multi-line response, transparency removed
    #[must_use]
    pub fn content(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.lines.iter().map(|l| l.len() + 2).sum());
        for line in &self.lines {
            out.extend_from_slice(unstuff(line));
            out.extend_from_slice(b"\r\n");
        }
        out
    }
}

/// Client of the POP3 server of an account.
pub struct Pop3Backend {
    io: AbstractIO<Box<dyn Io>>,
    timeout: std::time::Duration,
}

impl std::fmt::Debug for Pop3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pop3Backend")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Pop3Backend {
    /// Connect to `target`.
    ///
    /// # Errors
    ///
    /// * the connection or the tls handshake failed
    /// * the server is not ready, or refused `STLS`
    pub async fn connect(target: &BackendTarget) -> anyhow::Result<Self> {
        let mut backend = Self {
            io: target.open().await?,
            timeout: target.timeout,
        };

        let greeting = backend.read_status().await?;
        if !greeting.starts_with("+OK") {
            anyhow::bail!("backend not ready: {greeting}");
        }

        if target.security == BackendSecurity::Starttls {
            let response = backend.command("STLS").await?;
            if !response.is_ok() {
                anyhow::bail!("backend refused STLS: {}", response.status);
            }
            backend.io = AbstractIO::new(target.secure(backend.io.inner).await?);
        }
        Ok(backend)
    }

    /// `USER` and `PASS`, `false` if the credentials were refused.
    ///
    /// # Errors
    ///
    /// * the connection failed
    pub async fn login(&mut self, user: &str, password: &str) -> anyhow::Result<bool> {
        for command in [format!("USER {user}"), format!("PASS {password}")] {
            let response = self.command(&command).await?;
            if !response.is_ok() {
                tracing::debug!(status = %response.status, "backend refused the login");
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn read_status(&mut self) -> anyhow::Result<String> {
        Ok(self.io.next_line(self.timeout).await?)
    }

    /// A command with a single line response.
    ///
    /// # Errors
    ///
    /// * the connection failed
    pub async fn command(&mut self, command: &str) -> anyhow::Result<Pop3Response> {
        self.io
            .write_all(format!("{command}\r\n").as_bytes())
            .await?;
        Ok(Pop3Response {
            status: self.read_status().await?,
            lines: vec![],
        })
    }

    /// A command with a multi-line response if positive.
    ///
    /// # Errors
    ///
    /// * the connection failed
    pub async fn multiline(&mut self, command: &str) -> anyhow::Result<Pop3Response> {
        let mut response = self.command(command).await?;
        if response.is_ok() {
            loop {
                let line = self.io.next_raw_line(self.timeout).await?;
                if line == b"." {
                    break;
                }
                response.lines.push(line);
            }
        }
        Ok(response)
    }

    /// `QUIT`, the deletions are committed by the server.
    ///
    /// # Errors
    ///
    /// * the connection failed
    pub async fn quit(&mut self) -> anyhow::Result<Pop3Response> {
        let response = self.command("QUIT").await?;
        tokio::io::AsyncWriteExt::shutdown(&mut self.io.inner).await?;
        Ok(response)
    }
}

#[async_trait::async_trait]
impl BackendConnection for Pop3Backend {
    async fn close(&mut self) -> anyhow::Result<()> {
        self.quit().await.map(|_| ())
    }
}
