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

use crate::connection::{AbstractIO, Io};
use vkim_common::re::{anyhow, tracing};
use vkim_config::BackendSecurity;

mod pop3;
mod smtp;

pub use pop3::{Pop3Backend, Pop3Response};
pub use smtp::SmtpBackend;

/// A connection to a backend that must be closed with the session.
#[async_trait::async_trait]
pub trait BackendConnection: Send {
    /// say goodbye to the backend
    async fn close(&mut self) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
impl BackendConnection for dyn vkim_pipeline::Relay {
    async fn close(&mut self) -> anyhow::Result<()> {
        self.quit().await
    }
}

/// Where and how to reach the mail server of an account.
#[derive(Clone)]
pub struct BackendTarget {
    /// name given by the client, used to verify the certificate
    pub host: String,
    /// resolved address
    pub address: std::net::SocketAddr,
    ///
    pub security: BackendSecurity,
    ///
    pub tls_config: std::sync::Arc<tokio_rustls::rustls::ClientConfig>,
    /// applied to the connection and to every reply
    pub timeout: std::time::Duration,
}

impl std::fmt::Debug for BackendTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendTarget")
            .field("host", &self.host)
            .field("address", &self.address)
            .field("security", &self.security)
            .finish_non_exhaustive()
    }
}

impl BackendTarget {
    /// Open the tcp connection, secured if the security is [`BackendSecurity::Tls`].
    pub(crate) async fn open(&self) -> anyhow::Result<AbstractIO<Box<dyn Io>>> {
        tracing::debug!(target = ?self, "connecting to the backend");
        let stream = tokio::time::timeout(
            self.timeout,
            tokio::net::TcpStream::connect(self.address),
        )
        .await
        .map_err(|t| std::io::Error::new(std::io::ErrorKind::TimedOut, t))??;

        let stream: Box<dyn Io> = match self.security {
            BackendSecurity::Tls => self.secure(Box::new(stream)).await?,
            BackendSecurity::Plain | BackendSecurity::Starttls => Box::new(stream),
        };
        Ok(AbstractIO::new(stream))
    }

    /// Complete a tls handshake as client over `stream`.
    pub(crate) async fn secure(&self, stream: Box<dyn Io>) -> anyhow::Result<Box<dyn Io>> {
        let server_name = tokio_rustls::rustls::ServerName::try_from(
            self.host.trim_matches(['[', ']']),
        )
        .map_err(|e| anyhow::anyhow!("invalid backend name '{}': {e}", self.host))?;

        let stream = tokio::time::timeout(
            self.timeout,
            tokio_rustls::TlsConnector::from(self.tls_config.clone()).connect(server_name, stream),
        )
        .await
        .map_err(|t| std::io::Error::new(std::io::ErrorKind::TimedOut, t))??;
        Ok(Box::new(stream))
    }
}
