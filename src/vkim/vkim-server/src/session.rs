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

use crate::{
    backend::{BackendConnection, BackendTarget},
    BackendAccount,
};
use vkim_common::{
    logger::LoggerRegistry,
    re::{anyhow, tracing},
    GatewayError,
};
use vkim_config::{get_backend_client_config, get_rustls_config, BackendSecurity, Config};
use vkim_pipeline::{
    operation::builtin::resolve_host, Collaborators, InboundPipeline, OperationRegistry,
    OutboundPipeline,
};

/// Everything the sessions share: configuration, collaborators, operations
/// and the registry of their logs.
pub struct Gateway {
    ///
    pub config: std::sync::Arc<Config>,
    ///
    pub collaborators: Collaborators,
    ///
    pub registry: std::sync::Arc<OperationRegistry>,
    /// logs of the active sessions
    pub loggers: std::sync::Arc<LoggerRegistry>,
    ///
    pub outbound: OutboundPipeline,
    ///
    pub inbound: InboundPipeline,
    /// `None` if tls is not configured, STARTTLS and STLS are then refused
    pub tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
    /// used to reach the backends over tls
    pub backend_tls: std::sync::Arc<tokio_rustls::rustls::ClientConfig>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("registry", &self.registry)
            .field("loggers", &self.loggers)
            .field("tls", &self.tls_acceptor.is_some())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Build the shared context of the sessions.
    ///
    /// # Errors
    ///
    /// * an operation is registered twice
    /// * cannot initialize the [`rustls`](tokio_rustls::rustls) configurations
    pub fn new(
        config: std::sync::Arc<Config>,
        collaborators: Collaborators,
    ) -> anyhow::Result<Self> {
        let registry = OperationRegistry::builtin(&collaborators, &config);
        registry.validate()?;
        let registry = std::sync::Arc::new(registry);

        Ok(Self {
            loggers: std::sync::Arc::new(LoggerRegistry::new(config.logs.session_dir.clone())),
            outbound: OutboundPipeline::new(
                config.clone(),
                registry.clone(),
                collaborators.connector.clone(),
            ),
            inbound: InboundPipeline::new(
                config.clone(),
                registry.clone(),
                collaborators.connector.clone(),
            ),
            tls_acceptor: match &config.gateway.tls {
                Some(tls) => Some(tokio_rustls::TlsAcceptor::from(std::sync::Arc::new(
                    get_rustls_config(tls)?,
                ))),
                None => None,
            },
            backend_tls: std::sync::Arc::new(get_backend_client_config(
                &config.gateway.backend_tls,
            )?),
            registry,
            collaborators,
            config,
        })
    }

    /// Resolve the backend of `account`, an ip literal is used as is.
    ///
    /// # Errors
    ///
    /// * the host name has no address
    /// * the name resolution failed
    pub async fn backend_target(
        &self,
        account: &BackendAccount,
        security: BackendSecurity,
        timeout: std::time::Duration,
    ) -> Result<BackendTarget, GatewayError> {
        let ip = resolve_host(&self.registry, &account.host)
            .await?
            .ok_or_else(|| {
                GatewayError::Collaborator(anyhow::anyhow!(
                    "ip-address for domain {} not found",
                    account.host
                ))
            })?;

        Ok(BackendTarget {
            host: account.host.clone(),
            address: std::net::SocketAddr::new(ip, account.port),
            security,
            tls_config: self.backend_tls.clone(),
            timeout,
        })
    }
}

/// Protocol state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// not authenticated
    Connect,
    /// POP3 `USER` received, waiting for `PASS`
    UserSet,
    /// authenticated, the commands are proxied to the backend
    Proxy,
    /// the backend connection failed, the session is closed after the reply
    BackendLost,
}

/// What every gateway session exposes, whatever its protocol.
#[async_trait::async_trait]
pub trait TransportSession: Send {
    /// connection to the backend of the session
    type Backend: BackendConnection + ?Sized;

    /// identifier of the session and its log
    fn id(&self) -> &str;

    /// append a line to the session log
    fn log(&self, line: &str);

    ///
    fn backend_mut(&mut self) -> &mut Option<Box<Self::Backend>>;

    ///
    fn state(&self) -> SessionState;

    /// the registry the log of the session is in
    fn loggers(&self) -> &LoggerRegistry;

    /// Close the backend connection and unregister the session log.
    async fn cleanup(&mut self) {
        self.log("cleanup");
        if let Some(mut backend) = self.backend_mut().take() {
            if let Err(error) = backend.close().await {
                tracing::warn!(session_id = %self.id(), %error, "backend not closed cleanly");
            }
        }
        if self.loggers().remove(self.id()).is_none() {
            tracing::debug!(session_id = %self.id(), "session log already removed");
        }
    }
}
