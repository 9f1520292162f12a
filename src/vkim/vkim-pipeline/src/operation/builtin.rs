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

use super::{execute_with, Operation, OperationContext, OperationRegistry, OperationResult};
use crate::{
    collaborator::{Collaborators, NameResolver},
    dsn::{self, Report},
    format::{check_encrypted_format, EncryptedFormat},
    identity::IdentityResolver,
    relay::Relay,
};
use vkim_common::{
    message::RawMessage,
    re::{anyhow, tracing},
    Address, CertificateIdentity, CodeLedger, ErrorCode, GatewayError, MessageLedgers, Reply,
};
use vkim_config::Config;

/// vendor of the gateway's own operations
pub const BUILTIN: &str = "builtin";

impl OperationRegistry {
    /// The operations of the gateway, one per key.
    #[must_use]
    pub fn builtin(collaborators: &Collaborators, config: &Config) -> Self {
        Self::new(vec![
            std::sync::Arc::new(LoadCertificates::new(IdentityResolver::new(
                collaborators.directory.clone(),
                config.directory.search_base.clone(),
                config.gateway.kim_version,
                config.connector.ecc_encryption_available
                    && collaborators.connector.ecc_encryption_available(),
            ))),
            std::sync::Arc::new(DnsRequest::new(collaborators.resolver.clone())),
            std::sync::Arc::new(CheckEncryptedFormat),
            std::sync::Arc::new(SendDsn),
        ])
    }
}

/// Resolve the certificates of addresses.
///
/// Reads `addresses`, `is_sender`, `is_recipient` and `ledgers`, writes back
/// `ledgers` in both outcomes and `identities` on success.
#[derive(Debug)]
pub struct LoadCertificates {
    resolver: IdentityResolver,
}

impl LoadCertificates {
    ///
    pub const NAME: &'static str = "LoadCertificates";

    ///
    #[must_use]
    pub const fn new(resolver: IdentityResolver) -> Self {
        Self { resolver }
    }

    async fn run(&self, context: &mut OperationContext) -> Result<(), GatewayError> {
        let addresses = context.require::<Vec<Address>>(Self::NAME, "addresses")?;
        let is_sender = context.require::<bool>(Self::NAME, "is_sender")?;
        let is_recipient = context.require::<bool>(Self::NAME, "is_recipient")?;
        let mut ledgers = context
            .take::<MessageLedgers>(Self::NAME, "ledgers")
            .unwrap_or_default();

        let result = self
            .resolver
            .load_certificates(&mut ledgers, &addresses, is_sender, is_recipient)
            .await;
        context.set(Self::NAME, "ledgers", ledgers);

        context.set(Self::NAME, "identities", result?);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Operation for LoadCertificates {
    fn vendor(&self) -> &str {
        BUILTIN
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    async fn execute(&self, mut context: OperationContext) -> OperationResult {
        match self.run(&mut context).await {
            Ok(()) => Ok(context),
            Err(error) => Err((context, error)),
        }
    }
}

/// Resolve the IPv4 address of a host name.
///
/// Reads `name`, writes `address`: `None` if the name has no A record.
pub struct DnsRequest {
    resolver: std::sync::Arc<dyn NameResolver>,
}

impl std::fmt::Debug for DnsRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsRequest").finish_non_exhaustive()
    }
}

impl DnsRequest {
    ///
    pub const NAME: &'static str = "DnsRequest";

    ///
    #[must_use]
    pub fn new(resolver: std::sync::Arc<dyn NameResolver>) -> Self {
        Self { resolver }
    }

    async fn run(&self, context: &mut OperationContext) -> Result<(), GatewayError> {
        let name = context.require::<String>(Self::NAME, "name")?;
        let records = self.resolver.lookup_a(&name).await?;
        tracing::debug!(%name, records = records.len(), "A lookup");
        context.set(Self::NAME, "address", records.first().copied());
        Ok(())
    }
}

#[async_trait::async_trait]
impl Operation for DnsRequest {
    fn vendor(&self) -> &str {
        BUILTIN
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    async fn execute(&self, mut context: OperationContext) -> OperationResult {
        match self.run(&mut context).await {
            Ok(()) => Ok(context),
            Err(error) => Err((context, error)),
        }
    }
}

/// Check the format of a received envelope.
///
/// Reads `message`, writes `codes` and, if the envelope is valid, `format`.
#[derive(Debug)]
pub struct CheckEncryptedFormat;

impl CheckEncryptedFormat {
    ///
    pub const NAME: &'static str = "CheckEncryptedFormat";
}

#[async_trait::async_trait]
impl Operation for CheckEncryptedFormat {
    fn vendor(&self) -> &str {
        BUILTIN
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    async fn execute(&self, mut context: OperationContext) -> OperationResult {
        let message = match context.require::<RawMessage>(Self::NAME, "message") {
            Ok(message) => message,
            Err(error) => return Err((context, error)),
        };

        let mut codes = CodeLedger::default();
        let format = check_encrypted_format(&message, &mut codes);
        context.set(Self::NAME, "codes", codes);
        if let Some(format) = format {
            context.set(Self::NAME, "format", format);
        }
        Ok(context)
    }
}

/// Send a delivery status notification through the backend of the session.
///
/// Reads `relay` and `report`, writes back `relay` in both outcomes and
/// `reply` on success.
#[derive(Debug)]
pub struct SendDsn;

type SharedRelay = std::sync::Mutex<Box<dyn Relay>>;

impl SendDsn {
    ///
    pub const NAME: &'static str = "SendDsn";

    async fn run(
        relay: &mut dyn Relay,
        report: &Report,
    ) -> Result<Reply, GatewayError> {
        let reply = relay
            .send_message(&report.to, std::slice::from_ref(&report.to), &dsn::build(report))
            .await?;

        if reply.is_positive() {
            Ok(reply)
        } else {
            Err(GatewayError::Collaborator(anyhow::anyhow!(
                "the backend refused the report: {reply}"
            )))
        }
    }
}

#[async_trait::async_trait]
impl Operation for SendDsn {
    fn vendor(&self) -> &str {
        BUILTIN
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    async fn execute(&self, mut context: OperationContext) -> OperationResult {
        let report = match context.require::<Report>(Self::NAME, "report") {
            Ok(report) => report,
            Err(error) => return Err((context, error)),
        };
        let relay = match context.require::<SharedRelay>(Self::NAME, "relay") {
            Ok(relay) => relay,
            Err(error) => return Err((context, error)),
        };
        let mut relay = match relay.into_inner() {
            Ok(relay) => relay,
            Err(poisoned) => poisoned.into_inner(),
        };

        let result = Self::run(relay.as_mut(), &report).await;
        context.set(Self::NAME, "relay", std::sync::Mutex::new(relay));

        match result {
            Ok(reply) => {
                context.set(Self::NAME, "reply", reply);
                Ok(context)
            }
            Err(error) => Err((context, error)),
        }
    }
}

/// Resolve the certificates of `addresses` with the registered
/// [`LoadCertificates`], `ledgers` is updated in every outcome but a panic.
///
/// # Errors
///
/// * the operation is not registered once
/// * see [`IdentityResolver::load_certificates`]
pub async fn load_certificates_with(
    registry: &OperationRegistry,
    ledgers: &mut MessageLedgers,
    addresses: &[Address],
    is_sender: bool,
    is_recipient: bool,
) -> Result<Vec<CertificateIdentity>, GatewayError> {
    const NAME: &str = LoadCertificates::NAME;
    let operation = registry.get(BUILTIN, NAME)?;

    let mut context = OperationContext::new();
    context.set(NAME, "addresses", addresses.to_vec());
    context.set(NAME, "is_sender", is_sender);
    context.set(NAME, "is_recipient", is_recipient);
    context.set(NAME, "ledgers", ledgers.clone());

    let (updated, result) = execute_with(
        operation.as_ref(),
        context,
        |mut context| {
            let identities = context
                .take::<Vec<CertificateIdentity>>(NAME, "identities")
                .ok_or_else(|| GatewayError::InvalidArgument("no identity returned".to_string()));
            (context.take::<MessageLedgers>(NAME, "ledgers"), identities)
        },
        |context, error| {
            (
                context.and_then(|mut context| context.take::<MessageLedgers>(NAME, "ledgers")),
                Err(error),
            )
        },
    )
    .await;

    if let Some(updated) = updated {
        *ledgers = updated;
    }
    result
}

/// The address of `host` with the registered [`DnsRequest`]. An IP literal
/// is returned as is, `None` if the name has no A record.
///
/// # Errors
///
/// * the operation is not registered once
/// * the resolver failed
pub async fn resolve_host(
    registry: &OperationRegistry,
    host: &str,
) -> Result<Option<std::net::IpAddr>, GatewayError> {
    const NAME: &str = DnsRequest::NAME;
    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<std::net::IpAddr>() {
        return Ok(Some(ip));
    }
    let operation = registry.get(BUILTIN, NAME)?;

    let mut context = OperationContext::new();
    context.set(NAME, "name", host.to_string());

    execute_with(
        operation.as_ref(),
        context,
        |mut context| {
            Ok(context
                .take::<Option<std::net::Ipv4Addr>>(NAME, "address")
                .flatten()
                .map(std::net::IpAddr::V4))
        },
        |_, error| Err(error),
    )
    .await
}

/// Check `message` with the registered [`CheckEncryptedFormat`].
///
/// A failure of the operation itself is reported as an unexpected format
/// error.
///
/// # Errors
///
/// * the operation is not registered once
pub async fn check_encrypted_format_with(
    registry: &OperationRegistry,
    message: &RawMessage,
) -> Result<(Option<EncryptedFormat>, CodeLedger), GatewayError> {
    const NAME: &str = CheckEncryptedFormat::NAME;
    let operation = registry.get(BUILTIN, NAME)?;

    let mut context = OperationContext::new();
    context.set(NAME, "message", message.clone());

    Ok(execute_with(
        operation.as_ref(),
        context,
        |mut context| {
            (
                context.take::<EncryptedFormat>(NAME, "format"),
                context.take::<CodeLedger>(NAME, "codes").unwrap_or_default(),
            )
        },
        |_, error| {
            tracing::warn!(%error, "format check failed");
            let mut codes = CodeLedger::default();
            codes.add(ErrorCode::X020);
            (None, codes)
        },
    )
    .await)
}

/// Send `report` with the registered [`SendDsn`] through `backend`.
///
/// The relay is moved into the operation and put back afterwards, it is
/// lost if the operation panics.
///
/// # Errors
///
/// * the operation is not registered once
/// * there is no backend, or it failed or refused the report
pub async fn send_dsn_with(
    registry: &OperationRegistry,
    backend: &mut Option<Box<dyn Relay>>,
    report: Report,
) -> Result<Reply, GatewayError> {
    const NAME: &str = SendDsn::NAME;
    let operation = registry.get(BUILTIN, NAME)?;
    let relay = backend
        .take()
        .ok_or_else(|| GatewayError::Collaborator(anyhow::anyhow!("no backend connection")))?;

    let mut context = OperationContext::new();
    context.set(NAME, "relay", std::sync::Mutex::new(relay));
    context.set(NAME, "report", report);

    let take_relay = |context: &mut OperationContext| {
        context
            .take::<SharedRelay>(NAME, "relay")
            .map(|relay| match relay.into_inner() {
                Ok(relay) => relay,
                Err(poisoned) => poisoned.into_inner(),
            })
    };

    let (relay, result) = execute_with(
        operation.as_ref(),
        context,
        |mut context| {
            let reply = context
                .take::<Reply>(NAME, "reply")
                .ok_or_else(|| GatewayError::InvalidArgument("no reply returned".to_string()));
            (take_relay(&mut context), reply)
        },
        |context, error| (context.and_then(|mut context| take_relay(&mut context)), Err(error)),
    )
    .await;

    *backend = relay;
    result
}
