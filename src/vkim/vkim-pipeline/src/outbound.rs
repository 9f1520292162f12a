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
    collaborator::{Card, Connector},
    dsn::{Failure, RecipientStatus, Report},
    format::{
        is_embedded_envelope, CONTENT_DISPOSITION, CONTENT_TYPE_AUTH_ENVELOPED,
        CONTENT_TYPE_SIGNED, RFC822_PRE_HEADER, SUBJECT_KOM_LE_NACHRICHT, X_KOM_LE_VERSION,
    },
    operation::{
        builtin::{load_certificates_with, send_dsn_with},
        OperationRegistry,
    },
    relay::Relay,
};
use vkim_common::{
    logger::LoggerContext,
    message::{encode_base64_wrapped, RawMessage},
    re::{anyhow, time, tracing},
    Address, CertificateIdentity, ErrorCode, GatewayError, Reply,
};
use vkim_config::{Config, TiMode};

/// service identifier written when the client did not set one
pub const DEFAULT_DIENSTKENNUNG: &str = "KIM-Mail;Default;V1.5";

/// What the SMTP session received for one message.
#[derive(Debug, Clone)]
pub struct OutboundEnvelope {
    /// `MAIL FROM`
    pub sender: Address,
    /// every `RCPT TO`, including the ones which failed
    pub recipients: Vec<Address>,
    /// the identities of the recipients accepted
    pub recipient_identities: Vec<CertificateIdentity>,
    /// name of the client, as given in `HELO`
    pub peer: Option<String>,
    ///
    pub arrival: time::OffsetDateTime,
}

/// Outcome of [`OutboundPipeline::process`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// the message was handed to the backend, with its reply
    Relayed(Reply),
    /// the message was dropped and the sender notified
    SoftDeny {
        ///
        codes: Vec<ErrorCode>,
    },
    /// the message was dropped and the notification could not be sent
    Deny {
        ///
        codes: Vec<ErrorCode>,
    },
}

/// Sign and encrypt the messages sent through the SMTP proxy.
#[derive(Clone)]
pub struct OutboundPipeline {
    config: std::sync::Arc<Config>,
    registry: std::sync::Arc<OperationRegistry>,
    connector: std::sync::Arc<dyn Connector>,
}

impl std::fmt::Debug for OutboundPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundPipeline")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl OutboundPipeline {
    ///
    #[must_use]
    pub fn new(
        config: std::sync::Arc<Config>,
        registry: std::sync::Arc<OperationRegistry>,
        connector: std::sync::Arc<dyn Connector>,
    ) -> Self {
        Self {
            config,
            registry,
            connector,
        }
    }

    fn ecc_capable(&self) -> bool {
        self.config.connector.ecc_encryption_available && self.connector.ecc_encryption_available()
    }

    /// Transform `content` into a KIM envelope and relay it, or drop it and
    /// send a notification to the sender.
    ///
    /// The certificate ledger must hold the failures of the `RCPT TO` stage.
    ///
    /// # Errors
    ///
    /// * the backend connection is missing or failed
    /// * an operation is not registered
    pub async fn process(
        &self,
        context: &mut LoggerContext,
        backend: &mut Option<Box<dyn Relay>>,
        envelope: &OutboundEnvelope,
        content: &[u8],
    ) -> Result<Outcome, GatewayError> {
        if self.config.gateway.ti_mode == TiMode::NoTi {
            context.log("ti mode disabled, message relayed unchanged");
            return Ok(Outcome::Relayed(Self::data(backend, content).await?));
        }
        let message = RawMessage::parse(content);

        let failed = envelope
            .recipients
            .iter()
            .filter(|rcpt| context.ledgers.certificates.is_error(rcpt))
            .cloned()
            .collect::<Vec<_>>();
        if failed.is_empty() && envelope.recipient_identities.is_empty() {
            return Err(GatewayError::InvalidArgument(
                "no recipient to encrypt for".to_string(),
            ));
        }
        if !failed.is_empty() {
            let all = failed.len() == envelope.recipients.len();
            context.log(&format!(
                "certificate errors for the recipients: {}",
                join(&failed)
            ));
            let report = self.recipients_report(context, envelope, &message, &failed, all);
            return Ok(self.abort(context, backend, report).await);
        }

        let Some(sender_identities) = self.resolve_sender(context, envelope, &message).await? else {
            let codes = self.sender_codes(context, envelope, &message);
            let report = self.report(
                Failure::Sender(envelope.sender.clone()),
                envelope,
                &message,
                codes,
            );
            return Ok(self.abort(context, backend, report).await);
        };

        let checked = match check_origin_message(
            &message,
            &envelope.sender,
            &envelope.recipient_identities,
        ) {
            Ok(checked) => checked,
            Err(reason) => {
                context.log(&format!("origin message check failed: {reason}"));
                context.ledgers.sign_encrypt.add(ErrorCode::X013);
                return Ok(self.abort_sign_encrypt(context, backend, envelope, &message).await);
            }
        };

        let Some(composed) = self
            .sign_encrypt(context, &checked, &sender_identities, &envelope.recipient_identities)
            .await
        else {
            return Ok(self.abort_sign_encrypt(context, backend, envelope, &message).await);
        };

        let reply = Self::data(backend, &composed).await?;
        context.log(&format!("envelope relayed: {reply}"));

        if reply.is_positive() && !context.ledgers.recipient_rejects.is_empty() {
            let rejected = context
                .ledgers
                .recipient_rejects
                .iter()
                .map(|(address, _)| address.clone())
                .collect::<Vec<_>>();
            let report = self.recipients_report(context, envelope, &message, &rejected, false);
            if let Err(error) = send_dsn_with(&self.registry, backend, report).await {
                tracing::warn!(session_id = context.session_id(), %error, "report of the rejected recipients not sent");
            }
        }
        Ok(Outcome::Relayed(reply))
    }

    async fn data(
        backend: &mut Option<Box<dyn Relay>>,
        content: &[u8],
    ) -> Result<Reply, GatewayError> {
        match backend {
            Some(relay) => relay.data(content).await.map_err(GatewayError::BackendLost),
            None => Err(GatewayError::BackendLost(anyhow::anyhow!(
                "no backend connection"
            ))),
        }
    }

    /// the sender plus the distinct `Sender:` address, `None` if one of
    /// them is in error
    async fn resolve_sender(
        &self,
        context: &mut LoggerContext,
        envelope: &OutboundEnvelope,
        message: &RawMessage,
    ) -> Result<Option<Vec<CertificateIdentity>>, GatewayError> {
        let senders = sender_addresses(envelope, message);

        let result = load_certificates_with(
            &self.registry,
            &mut context.ledgers,
            &senders,
            true,
            false,
        )
        .await;

        let in_error = senders.iter().any(|sender| {
            context.ledgers.certificates.is_error(sender) || context.ledgers.versions.is_error(sender)
        });

        match result {
            Ok(identities) if !in_error => Ok(Some(identities)),
            Ok(_) => {
                context.log("sender in error");
                Ok(None)
            }
            Err(GatewayError::IdentityResolutionFailed { address, reason }) => {
                context.log(&format!("sender '{address}' not resolved: {reason}"));
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    fn sender_codes(
        &self,
        context: &LoggerContext,
        envelope: &OutboundEnvelope,
        message: &RawMessage,
    ) -> Vec<ErrorCode> {
        let mut codes = vec![];
        for sender in sender_addresses(envelope, message) {
            for code in context
                .ledgers
                .certificates
                .codes_for(&sender)
                .iter()
                .chain(context.ledgers.versions.codes_for(&sender))
            {
                if !codes.contains(code) {
                    codes.push(*code);
                }
            }
        }
        if codes.is_empty() {
            codes.push(ErrorCode::X006);
        }
        codes
    }

    async fn sign_card(&self) -> anyhow::Result<Option<Card>> {
        let cards = self.connector.cards().await?;
        Ok(match &self.config.connector.sign_card_handle {
            Some(handle) => cards.into_iter().find(|card| &card.handle == handle),
            None => cards.into_iter().find(Card::is_usable_smcb),
        })
    }

    /// Sign, encrypt and compose the envelope, the failures are recorded in
    /// the sign/encrypt ledger.
    async fn sign_encrypt(
        &self,
        context: &mut LoggerContext,
        checked: &RawMessage,
        senders: &[CertificateIdentity],
        recipients: &[CertificateIdentity],
    ) -> Option<Vec<u8>> {
        let card = match self.sign_card().await {
            Ok(Some(card)) => card,
            Ok(None) => {
                context.log("no card to sign with");
                context.ledgers.sign_encrypt.add(ErrorCode::X010);
                return None;
            }
            Err(error) => {
                tracing::warn!(session_id = context.session_id(), %error, "card inventory failed");
                context.ledgers.sign_encrypt.add(ErrorCode::X010);
                return None;
            }
        };

        let signed = match self
            .connector
            .sign(&card.handle, &[RFC822_PRE_HEADER, &checked.to_bytes()[..]].concat())
            .await
        {
            Ok(signed) => signed,
            Err(error) => {
                tracing::warn!(session_id = context.session_id(), card = %card.handle, %error, "signature failed");
                context.ledgers.sign_encrypt.add(ErrorCode::X009);
                return None;
            }
        };
        context.log(&format!("signed with card {}", card.handle));

        let mut wrapped = RawMessage::default();
        wrapped.add_header("Content-Type", CONTENT_TYPE_SIGNED);
        wrapped.add_header("Content-Transfer-Encoding", "base64");
        wrapped.add_header("Content-Disposition", CONTENT_DISPOSITION);
        wrapped.set_body(encode_base64_wrapped(&signed).into_bytes());

        let encrypted = match self.encrypt(recipients, senders, &wrapped.to_bytes()).await {
            Ok(encrypted) => encrypted,
            Err(error) => {
                tracing::warn!(session_id = context.session_id(), %error, "encryption failed");
                context.ledgers.sign_encrypt.add(ErrorCode::X011);
                return None;
            }
        };

        match compose(checked, &encrypted, &self.config) {
            Ok(composed) => Some(composed.to_bytes()),
            Err(error) => {
                tracing::warn!(session_id = context.session_id(), %error, "composition failed");
                context.ledgers.sign_encrypt.add(ErrorCode::X012);
                None
            }
        }
    }

    async fn encrypt(
        &self,
        recipients: &[CertificateIdentity],
        senders: &[CertificateIdentity],
        content: &[u8],
    ) -> anyhow::Result<Vec<u8>> {
        let ecc_capable = self.ecc_capable();

        let mut identities = Vec::<CertificateIdentity>::new();
        for identity in recipients.iter().chain(senders) {
            if !identities.iter().any(|i| i.address == identity.address) {
                identities.push(identity.clone());
            }
        }

        let mut certificates = Vec::<Vec<u8>>::new();
        for certificate in identities
            .iter()
            .flat_map(|identity| identity.certificates_for(ecc_capable))
        {
            if !certificates.contains(certificate) {
                certificates.push(certificate.clone());
            }
        }
        if certificates.is_empty() {
            anyhow::bail!("no certificate to encrypt for");
        }

        let attribute = vkim_cms::build_recipient_emails_attribute(&identities, ecc_capable)
            .map_err(|e| anyhow::anyhow!(e))?;
        self.connector
            .encrypt(&certificates, content, &[attribute])
            .await
    }

    fn report(
        &self,
        failure: Failure,
        envelope: &OutboundEnvelope,
        message: &RawMessage,
        codes: Vec<ErrorCode>,
    ) -> Report {
        Report {
            failure,
            to: envelope.sender.clone(),
            reporting_mta: self.config.gateway.domain.clone(),
            received_from_mta: envelope.peer.clone(),
            arrival_date: Some(envelope.arrival),
            recipients: envelope
                .recipients
                .iter()
                .map(|address| RecipientStatus {
                    address: address.clone(),
                    codes: codes.clone(),
                    last_attempt_date: None,
                })
                .collect(),
            codes,
            original: message.clone(),
        }
    }

    fn recipients_report(
        &self,
        context: &LoggerContext,
        envelope: &OutboundEnvelope,
        message: &RawMessage,
        failed: &[Address],
        all: bool,
    ) -> Report {
        let now = time::OffsetDateTime::now_utc();
        let recipients = failed
            .iter()
            .map(|address| {
                let mut codes = context.ledgers.certificates.codes_for(address).to_vec();
                codes.extend(
                    context
                        .ledgers
                        .recipient_rejects
                        .iter()
                        .filter(|(rejected, _)| *rejected == address)
                        .map(|(_, code)| *code),
                );
                RecipientStatus {
                    address: address.clone(),
                    codes,
                    last_attempt_date: Some(now),
                }
            })
            .collect::<Vec<_>>();

        let mut codes = Vec::<ErrorCode>::new();
        for code in recipients.iter().flat_map(|rcpt| rcpt.codes.iter()) {
            if !codes.contains(code) {
                codes.push(*code);
            }
        }

        Report {
            recipients,
            codes: codes.clone(),
            ..self.report(Failure::Recipients { all }, envelope, message, codes)
        }
    }

    async fn abort_sign_encrypt(
        &self,
        context: &mut LoggerContext,
        backend: &mut Option<Box<dyn Relay>>,
        envelope: &OutboundEnvelope,
        message: &RawMessage,
    ) -> Outcome {
        let codes = context.ledgers.sign_encrypt.codes().to_vec();
        let report = self.report(Failure::SignEncrypt, envelope, message, codes);
        self.abort(context, backend, report).await
    }

    /// Reset the backend transaction and notify the sender.
    async fn abort(
        &self,
        context: &mut LoggerContext,
        backend: &mut Option<Box<dyn Relay>>,
        report: Report,
    ) -> Outcome {
        let codes = report.codes.clone();
        context.log(&format!(
            "message dropped: {}",
            codes.iter().map(|c| c.id()).collect::<Vec<_>>().join(", ")
        ));

        if let Some(relay) = backend.as_mut() {
            if let Err(error) = relay.reset().await {
                tracing::warn!(session_id = context.session_id(), %error, "backend reset failed");
            }
        }

        match send_dsn_with(&self.registry, backend, report).await {
            Ok(reply) => {
                context.log(&format!("delivery status notification sent: {reply}"));
                Outcome::SoftDeny { codes }
            }
            Err(error) => {
                tracing::warn!(session_id = context.session_id(), %error, "delivery status notification not sent");
                Outcome::Deny { codes }
            }
        }
    }
}

fn join(addresses: &[Address]) -> String {
    addresses
        .iter()
        .map(Address::full)
        .collect::<Vec<_>>()
        .join(",")
}

fn sender_addresses(envelope: &OutboundEnvelope, message: &RawMessage) -> Vec<Address> {
    let mut senders = vec![envelope.sender.clone()];
    if let Some(header) = message.addresses("Sender").into_iter().next() {
        if header != envelope.sender {
            senders.push(header);
        }
    }
    senders
}

/// Check the message submitted by the client before signing it.
///
/// `From:` must be the envelope sender, a different `Reply-To:` is
/// removed, the recipients without certificate are removed from the
/// recipient headers. A forwarded envelope is kept as is.
///
/// # Errors
///
/// * the `From:` header is missing, repeated or not the sender
/// * no recipient header is left
pub fn check_origin_message(
    message: &RawMessage,
    sender: &Address,
    recipients: &[CertificateIdentity],
) -> Result<RawMessage, String> {
    match message.addresses("From").as_slice() {
        [] => return Err(format!("no From header for the sender '{sender}'")),
        [from] if from != sender => {
            return Err(format!("From header '{from}' is not the sender '{sender}'"))
        }
        [_] => {}
        _ => return Err(format!("more than one From header for the sender '{sender}'")),
    }

    if is_embedded_envelope(message) {
        return Ok(message.clone());
    }

    let mut checked = message.clone();
    if checked
        .addresses("Reply-To")
        .iter()
        .any(|reply_to| reply_to != sender)
    {
        checked.remove_header("Reply-To");
    }

    let mut remaining = 0;
    for name in ["To", "Cc", "Bcc"] {
        let addresses = checked.addresses(name);
        let kept = addresses
            .iter()
            .filter(|address| recipients.iter().any(|identity| &identity.address == *address))
            .map(Address::full)
            .collect::<Vec<_>>();

        if kept.len() != addresses.len() {
            checked.remove_header(name);
            if !kept.is_empty() {
                checked.add_header(name, &kept.join(", "));
            }
        }
        remaining += kept.len();
    }

    if remaining == 0 {
        return Err("no recipient left in the recipient headers".to_string());
    }
    Ok(checked)
}

/// The KIM envelope sealing `encrypted`, with the outer headers of `checked`.
///
/// # Errors
///
/// * `checked` has no `From:` header
pub fn compose(
    checked: &RawMessage,
    encrypted: &[u8],
    config: &Config,
) -> Result<RawMessage, GatewayError> {
    if checked.get_header("From").is_none() {
        return Err(GatewayError::SecurityTransformFailed(
            "no From header to compose the envelope".to_string(),
        ));
    }

    let mut composed = RawMessage::default();
    match checked.get_header("Date") {
        Some(date) => composed.add_header("Date", &date),
        None => {
            if let Ok(date) = time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc2822)
            {
                composed.add_header("Date", &date);
            }
        }
    }
    for name in ["From", "Sender", "Reply-To", "To", "Cc"] {
        if let Some(value) = checked.get_header(name) {
            composed.add_header(name, &value);
        }
    }
    composed.add_header(
        "Message-ID",
        &checked.get_header("Message-ID").unwrap_or_else(|| {
            format!(
                "<{}@{}>",
                vkim_common::re::uuid::Uuid::new_v4().simple(),
                config.gateway.domain
            )
        }),
    );

    for header in checked.headers() {
        if header.name.to_ascii_lowercase().starts_with("x-kim") {
            composed.set_header(&header.name, &header.unfolded());
        }
    }
    if composed.get_header("X-KIM-Dienstkennung").is_none() {
        composed.add_header("X-KIM-Dienstkennung", DEFAULT_DIENSTKENNUNG);
    }

    composed.add_header(X_KOM_LE_VERSION, config.gateway.kim_version.as_ref());
    composed.add_header("Subject", SUBJECT_KOM_LE_NACHRICHT);
    composed.add_header("MIME-Version", "1.0");
    composed.add_header("Content-Type", CONTENT_TYPE_AUTH_ENVELOPED);
    composed.add_header("Content-Disposition", CONTENT_DISPOSITION);
    composed.add_header("Content-Transfer-Encoding", "base64");
    composed.set_body(encode_base64_wrapped(encrypted).into_bytes());
    Ok(composed)
}
