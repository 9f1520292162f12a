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

//! vKIM mail gateway
//!
//! Sits between the mail clients of a practice and their KIM mail server.
//! Outgoing messages are signed and encrypted on the way through SMTP,
//! incoming ones are decrypted and verified when retrieved with POP3.

#![doc(html_no_source)]
#![deny(missing_docs)]
//
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
//
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

mod args;
mod offline;
/// install the global `tracing` subscriber
pub mod logs;

pub use args::{Args, Commands};
pub use offline::{OfflineConnector, OfflineDirectory};

pub use vkim_common;
pub use vkim_config;
pub use vkim_pipeline;
pub use vkim_server;

use vkim_common::re::anyhow;
use vkim_config::Config;
use vkim_pipeline::{Collaborators, TrustDnsResolver};
use vkim_server::{Gateway, ServerVKIM};

/// The configuration at `path`, or the default one if `None`.
///
/// # Errors
///
/// * the file cannot be read
/// * the configuration is not valid
pub fn load_config(path: Option<&str>) -> anyhow::Result<Config> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read the configuration '{path}': {e}"))
            .and_then(|content| Config::from_toml(&content)),
        None => Config::builder()
            .with_current_version()
            .with_hostname()
            .with_default_limits()
            .with_default_smtp()
            .with_default_pop3()
            .without_tls()
            .with_connector(true, None)
            .with_default_directory()
            .with_default_logs()
            .validate(),
    }
}

/// Collaborators available to this binary: the system's DNS resolver, the
/// directory and the connector being offline.
///
/// # Errors
///
/// * the system DNS configuration cannot be read
pub fn offline_collaborators(config: &Config) -> anyhow::Result<Collaborators> {
    tracing::warn!(
        "no directory nor connector client linked, secured messages will be deferred"
    );

    Ok(Collaborators {
        directory: std::sync::Arc::new(OfflineDirectory),
        connector: std::sync::Arc::new(OfflineConnector::new(
            config.connector.ecc_encryption_available,
        )),
        resolver: std::sync::Arc::new(TrustDnsResolver::from_system_conf()?),
    })
}

/// Bind the SMTP and POP3 listeners and serve until the server fails or
/// `shutdown` completes.
///
/// # Errors
///
/// * the listeners cannot be bound
/// * the tls configuration is not valid
/// * the server failed
pub async fn start(
    config: Config,
    collaborators: Collaborators,
    shutdown: impl std::future::Future<Output = ()> + Send,
) -> anyhow::Result<()> {
    let sockets = (
        std::net::TcpListener::bind(config.gateway.smtp.addr)?,
        std::net::TcpListener::bind(config.gateway.pop3.addr)?,
    );

    let gateway = std::sync::Arc::new(Gateway::new(std::sync::Arc::new(config), collaborators)?);
    let mut server = ServerVKIM::new(gateway, sockets)?;
    let (smtp, pop3) = server.addr()?;
    tracing::info!(%smtp, %pop3, "listening");

    tokio::select! {
        result = server.listen_and_serve() => result,
        () = shutdown => {
            tracing::info!("shutting down");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::load_config;

    #[test]
    fn default_config() {
        let config = load_config(None).unwrap();
        pretty_assertions::assert_eq!(config.gateway.smtp.addr.port(), 10025);
        assert!(config.gateway.tls.is_none());
    }

    #[test]
    fn missing_config() {
        assert!(load_config(Some("/nonexistent/vkim.toml")).is_err());
    }
}
