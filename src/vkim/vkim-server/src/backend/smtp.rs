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

use super::BackendTarget;
use crate::connection::{stuff, AbstractIO, Io};
use vkim_common::{
    re::{anyhow, base64, tracing},
    Address, Reply,
};
use vkim_config::BackendSecurity;

/// Client of the SMTP server of an account, authenticated with the
/// credentials of the gateway's client.
pub struct SmtpBackend {
    io: AbstractIO<Box<dyn Io>>,
    timeout: std::time::Duration,
}

impl std::fmt::Debug for SmtpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpBackend")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SmtpBackend {
    /// Connect to `target` and introduce the gateway as `helo`.
    ///
    /// # Errors
    ///
    /// * the connection or the tls handshake failed
    /// * the server is not ready, or refused `EHLO` or `STARTTLS`
    pub async fn connect(target: &BackendTarget, helo: &str) -> anyhow::Result<Self> {
        let mut backend = Self {
            io: target.open().await?,
            timeout: target.timeout,
        };

        let greeting = backend.read_reply().await?;
        if greeting.code() != 220 {
            anyhow::bail!("backend not ready: {greeting}");
        }
        backend.ehlo(helo).await?;

        if target.security == BackendSecurity::Starttls {
            let reply = backend.command("STARTTLS").await?;
            if reply.code() != 220 {
                anyhow::bail!("backend refused STARTTLS: {reply}");
            }
            backend.io = AbstractIO::new(target.secure(backend.io.inner).await?);
            backend.ehlo(helo).await?;
        }
        Ok(backend)
    }

    async fn ehlo(&mut self, helo: &str) -> anyhow::Result<()> {
        let reply = self.command(&format!("EHLO {helo}")).await?;
        if !reply.is_positive() {
            anyhow::bail!("backend refused EHLO: {reply}");
        }
        Ok(())
    }

    /// `AUTH LOGIN` with `user` and `password`, `false` if the credentials
    /// were refused.
    ///
    /// # Errors
    ///
    /// * the connection failed
    pub async fn authenticate(&mut self, user: &str, password: &str) -> anyhow::Result<bool> {
        for (command, expected) in [
            ("AUTH LOGIN".to_string(), 334),
            (base64::encode(user), 334),
            (base64::encode(password), 235),
        ] {
            let reply = self.command(&command).await?;
            if reply.code() != expected {
                tracing::debug!(%reply, "backend refused the authentication");
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn command(&mut self, command: &str) -> anyhow::Result<Reply> {
        self.io
            .write_all(format!("{command}\r\n").as_bytes())
            .await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> anyhow::Result<Reply> {
        let mut lines = vec![];
        loop {
            let line = self.io.next_line(self.timeout).await?;
            let last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line);
            if last {
                break;
            }
        }
        Ok(Reply::parse(&lines)?)
    }
}

#[async_trait::async_trait]
impl vkim_pipeline::Relay for SmtpBackend {
    async fn mail_from(&mut self, from: &Address) -> anyhow::Result<Reply> {
        self.command(&format!("MAIL FROM:<{}>", from.full())).await
    }

    async fn rcpt_to(&mut self, to: &Address) -> anyhow::Result<Reply> {
        self.command(&format!("RCPT TO:<{}>", to.full())).await
    }

    async fn data(&mut self, content: &[u8]) -> anyhow::Result<Reply> {
        let reply = self.command("DATA").await?;
        if reply.code() != 354 {
            return Ok(reply);
        }
        let mut content = stuff(content);
        content.extend_from_slice(b".\r\n");
        self.io.write_all(&content).await?;
        self.read_reply().await
    }

    async fn reset(&mut self) -> anyhow::Result<Reply> {
        self.command("RSET").await
    }

    async fn quit(&mut self) -> anyhow::Result<()> {
        let reply = self.command("QUIT").await?;
        tracing::debug!(%reply, "backend closed");
        tokio::io::AsyncWriteExt::shutdown(&mut self.io.inner).await?;
        Ok(())
    }
}

