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
    dsn::{self, Failure, RecipientStatus, Report},
    format::{EncryptedFormat, RFC822_PRE_HEADER, X_KOM_LE_VERSION},
    operation::{builtin::check_encrypted_format_with, OperationRegistry},
};
use vkim_cms::{IssuerAndSerial, RecipientIdentifier, RecipientInfo};
use vkim_common::{
    logger::LoggerContext,
    message::{build_multipart, new_boundary, RawMessage},
    re::tracing,
    Address, ErrorCode, GatewayError, KimVersion,
};
use vkim_config::{Config, TiMode};

/// header listing the codes of a failed decryption
pub const X_KIM_DECRYPTION_RESULT: &str = "X-KIM-Decryption-Result";

/// appended to every message whose signature was verified
pub const VERIFICATION_NOTICE: &str = "----------------------------------\r\n\
    !!!Die Signatur wurde erfolgreich geprueft!!!\r\n\
    ----------------------------------";

const DECRYPTION_FAILED_SUBJECT: &str =
    "Beim Entschlüsseln ist ein Fehler aufgetreten. Die Gründe werden aufgeführt.";

/// What the POP3 client receives for `RETR`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retrieved {
    /// not a KIM envelope, or the gateway is not in TI mode
    PassThrough(Vec<u8>),
    /// the verified plaintext
    Decrypted(Vec<u8>),
    /// the original message embedded with the decryption errors
    DecryptionFailed(Vec<u8>),
    /// a report of the verification errors, the plaintext is withheld
    VerificationFailed(Vec<u8>),
}

impl Retrieved {
    ///
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::PassThrough(bytes)
            | Self::Decrypted(bytes)
            | Self::DecryptionFailed(bytes)
            | Self::VerificationFailed(bytes) => bytes,
        }
    }
}

/// Decrypt and verify the messages retrieved through the POP3 proxy.
#[derive(Clone)]
pub struct InboundPipeline {
    config: std::sync::Arc<Config>,
    registry: std::sync::Arc<OperationRegistry>,
    connector: std::sync::Arc<dyn Connector>,
}

impl std::fmt::Debug for InboundPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundPipeline")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl InboundPipeline {
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

    /// Turn the message retrieved for `mailbox` into what its client sees.
    ///
    /// The ledgers of `context` are reset, then hold the failures of this
    /// message. The ciphertext is never returned.
    ///
    /// # Errors
    ///
    /// * an operation is not registered
    pub async fn decrypt_verify(
        &self,
        context: &mut LoggerContext,
        mailbox: &Address,
        content: &[u8],
    ) -> Result<Retrieved, GatewayError> {
        context.ledgers.reset();
        let message = RawMessage::parse(content);

        if self.config.gateway.ti_mode == TiMode::NoTi
            || message.get_header(X_KOM_LE_VERSION).is_none()
        {
            context.log(&format!("no {X_KOM_LE_VERSION} header, message passed through"));
            return Ok(Retrieved::PassThrough(content.to_vec()));
        }

        match self.decrypt(context, mailbox, &message).await? {
            Some(plaintext) => {
                if context.ledgers.sign_verify.is_empty() {
                    context.log("message decrypted and verified");
                    Ok(Retrieved::Decrypted(plaintext.to_bytes()))
                } else {
                    Ok(Retrieved::VerificationFailed(
                        self.verification_report(context, mailbox, &message),
                    ))
                }
            }
            None if !context.ledgers.sign_verify.is_empty() => Ok(Retrieved::VerificationFailed(
                self.verification_report(context, mailbox, &message),
            )),
            None => Ok(Retrieved::DecryptionFailed(decryption_failed(
                context, &message,
            ))),
        }
    }

    /// the plaintext, `None` if a stage failed and recorded its codes
    async fn decrypt(
        &self,
        context: &mut LoggerContext,
        mailbox: &Address,
        message: &RawMessage,
    ) -> Result<Option<RawMessage>, GatewayError> {
        let version = message
            .get_header(X_KOM_LE_VERSION)
            .map(|version| KimVersion::parse(&version));
        match version {
            Some(Ok(version)) if KimVersion::is_newer(self.config.gateway.kim_version, version) => {
                context.log(&format!("version {version} is not supported"));
                context.ledgers.decrypt.add(ErrorCode::C4008);
                return Ok(None);
            }
            Some(Ok(_)) => {}
            Some(Err(_)) | None => {
                context.log("invalid version");
                context.ledgers.decrypt.extend([ErrorCode::X014, ErrorCode::C4008]);
                return Ok(None);
            }
        }

        let (format, codes) = check_encrypted_format_with(&self.registry, message).await?;
        context.ledgers.encrypt_format.extend(codes.codes().iter().copied());
        let Some(format) = format else {
            context.log("the envelope format is wrong");
            context.ledgers.decrypt.add(ErrorCode::C4010);
            return Ok(None);
        };

        let Some(card) = self.decrypt_card(context, mailbox, &format).await else {
            return Ok(None);
        };

        let decrypted = match self.connector.decrypt(&card.handle, &format.envelope).await {
            Ok(decrypted) => decrypted,
            Err(error) => {
                tracing::warn!(session_id = context.session_id(), card = %card.handle, %error, "decryption failed");
                context.ledgers.decrypt.add(ErrorCode::C4011);
                return Ok(None);
            }
        };
        context.log(&format!("decrypted with card {}", card.handle));

        let signed_part = RawMessage::parse(&decrypted);
        let (signed, payload) = match (
            signed_part.decoded_body(),
            vkim_cms::extract_signed_payload(&signed_part, true),
        ) {
            (Ok(signed), Ok(Some(payload))) => (signed, payload),
            (signed, payload) => {
                tracing::debug!(
                    session_id = context.session_id(),
                    transfer_encoding_error = signed.is_err(),
                    payload_error = payload.is_err(),
                    "no signed payload"
                );
                context.ledgers.decrypt.extend([ErrorCode::X023, ErrorCode::C4253]);
                return Ok(None);
            }
        };

        match self.connector.verify(&card.handle, &signed).await {
            Ok(report) if report.valid => {}
            Ok(report) => {
                context.log("the signature is not valid");
                context.ledgers.sign_verify.add(ErrorCode::C4115);
                if let Some(code) = report.code {
                    context.ledgers.sign_verify.add(code);
                }
                return Ok(None);
            }
            Err(error) => {
                tracing::warn!(session_id = context.session_id(), %error, "verification failed");
                context.ledgers.sign_verify.add(ErrorCode::C4115);
                return Ok(None);
            }
        }

        cross_check_recipient_emails(context, &format, &signed);

        let Some(inner) = payload.strip_prefix(RFC822_PRE_HEADER) else {
            context.log("the signed payload is not a message/rfc822");
            context.ledgers.decrypt.extend([ErrorCode::X023, ErrorCode::C4253]);
            return Ok(None);
        };
        let mut plaintext = RawMessage::parse(inner);

        for name in ["From", "Sender", "Reply-To", "To", "Cc"] {
            if !same_addresses(&message.addresses(name), &plaintext.addresses(name)) {
                context.log(&format!("the header '{name}' differs from the envelope"));
                context.ledgers.sign_verify.add(ErrorCode::X001);
            }
        }

        if let Some(return_path) = message.get_header("Return-Path") {
            plaintext.set_header("Return-Path", &return_path);
        }
        for received in message.get_headers("Received") {
            plaintext.add_header("Received", &received);
        }
        if let Some(reply_to) = message.get_header("Reply-To") {
            plaintext.set_header("Reply-To", &reply_to);
        }

        Ok(Some(with_verification_notice(plaintext)))
    }

    /// the usable SMC-B holding a certificate the envelope was encrypted for
    async fn decrypt_card(
        &self,
        context: &mut LoggerContext,
        mailbox: &Address,
        format: &EncryptedFormat,
    ) -> Option<Card> {
        let pairs = match vkim_cms::extract_issuer_and_serial_for_address(
            &format.data,
            mailbox.full(),
        ) {
            Ok(pairs) if !pairs.is_empty() => pairs,
            _ => {
                context.log(&format!("no certificate of the envelope is bound to '{mailbox}'"));
                context.ledgers.decrypt.add(ErrorCode::X022);
                return None;
            }
        };

        let cards = match self.connector.cards().await {
            Ok(cards) => cards,
            Err(error) => {
                tracing::warn!(session_id = context.session_id(), %error, "card inventory failed");
                vec![]
            }
        };

        let card = cards.into_iter().filter(Card::is_usable_smcb).find(|card| {
            card.encryption_certificates.iter().any(|certificate| {
                vkim_cms::issuer_and_serial(certificate)
                    .map_or(false, |issuer_and_serial| pairs.contains(&issuer_and_serial))
            })
        });

        if card.is_none() {
            context.log(&format!("no usable card for '{mailbox}'"));
            context.ledgers.decrypt.extend([ErrorCode::C4009, ErrorCode::X021]);
        }
        card
    }

    fn verification_report(
        &self,
        context: &LoggerContext,
        mailbox: &Address,
        message: &RawMessage,
    ) -> Vec<u8> {
        let codes = context.ledgers.sign_verify.codes().to_vec();
        context.log(&format!(
            "verification failed: {}",
            codes.iter().map(|c| c.id()).collect::<Vec<_>>().join(", ")
        ));
        dsn::build(&Report {
            failure: Failure::SignVerify,
            to: mailbox.clone(),
            reporting_mta: self.config.gateway.domain.clone(),
            received_from_mta: None,
            arrival_date: None,
            recipients: vec![RecipientStatus {
                address: mailbox.clone(),
                codes: codes.clone(),
                last_attempt_date: None,
            }],
            codes,
            original: message.clone(),
        })
    }
}

/// The binding of the recipient-emails attribute: every pair must be a
/// recipient of the envelope, and the copy signed by the sender must be
/// the same.
fn cross_check_recipient_emails(
    context: &mut LoggerContext,
    format: &EncryptedFormat,
    signed: &[u8],
) {
    let mut envelope_emails = match vkim_cms::recipient_emails(&format.data.unauth_attributes) {
        Ok(emails) => emails,
        Err(_) => return,
    };

    let rids = format
        .data
        .recipient_infos
        .iter()
        .flat_map(recipient_info_rids)
        .collect::<Vec<_>>();
    if envelope_emails
        .iter()
        .any(|(_, issuer_and_serial)| !rids.contains(&issuer_and_serial))
    {
        context.log("the recipient-emails attribute names a certificate which is not a recipient");
        context.ledgers.sign_verify.add(ErrorCode::C4014);
    }

    let signed_emails = vkim_cms::SignedData::parse(signed)
        .ok()
        .and_then(|signed| signed.recipient_emails());
    if let Some(mut signed_emails) = signed_emails {
        envelope_emails.sort();
        signed_emails.sort();
        if envelope_emails != signed_emails {
            context.log("the signed recipient-emails attribute differs from the envelope");
            context.ledgers.sign_verify.add(ErrorCode::X003);
        }
    }
}

fn recipient_info_rids(info: &RecipientInfo) -> Vec<&IssuerAndSerial> {
    fn as_issuer_and_serial(rid: &RecipientIdentifier) -> Option<&IssuerAndSerial> {
        match rid {
            RecipientIdentifier::IssuerAndSerial(issuer_and_serial) => Some(issuer_and_serial),
            RecipientIdentifier::SubjectKeyIdentifier(_) | RecipientIdentifier::Other(_) => None,
        }
    }

    match info {
        RecipientInfo::KeyTrans { rid } => as_issuer_and_serial(rid).into_iter().collect(),
        RecipientInfo::KeyAgree { rids } => rids.iter().filter_map(as_issuer_and_serial).collect(),
        RecipientInfo::Other { .. } => vec![],
    }
}

/// same number of addresses, each found in the other list
fn same_addresses(outer: &[Address], inner: &[Address]) -> bool {
    outer.len() == inner.len()
        && outer.iter().all(|address| inner.contains(address))
        && inner.iter().all(|address| outer.contains(address))
}

fn with_verification_notice(mut message: RawMessage) -> RawMessage {
    let content_type = message.content_type();
    let is_base64 = message
        .get_header("Content-Transfer-Encoding")
        .map_or(false, |cte| cte.eq_ignore_ascii_case("base64"));

    match content_type {
        Some(content_type) if content_type.is_multipart() => {
            if let (Some(boundary), Some(parts)) = (content_type.param("boundary"), message.parts())
            {
                let mut parts = parts.iter().map(RawMessage::to_bytes).collect::<Vec<_>>();
                parts.push(notice_part());
                message.set_body(build_multipart(boundary, &parts));
            }
            message
        }
        content_type
            if !is_base64
                && content_type
                    .as_ref()
                    .map_or(true, |content_type| content_type.mime() == "text/plain") =>
        {
            let mut body = message.body().to_vec();
            if !body.is_empty() && !body.ends_with(b"\n") {
                body.extend_from_slice(b"\r\n");
            }
            body.extend_from_slice(VERIFICATION_NOTICE.as_bytes());
            body.extend_from_slice(b"\r\n");
            message.set_body(body);
            message
        }
        _ => {
            let mut original = RawMessage::default();
            for name in ["Content-Type", "Content-Transfer-Encoding", "Content-Disposition"] {
                if let Some(value) = message.get_header(name) {
                    original.add_header(name, &value);
                }
                message.remove_header(name);
            }
            original.set_body(message.body().to_vec());

            let boundary = new_boundary();
            message.add_header(
                "Content-Type",
                &format!("multipart/mixed; boundary=\"{boundary}\""),
            );
            message.set_body(build_multipart(
                &boundary,
                &[original.to_bytes(), notice_part()],
            ));
            message
        }
    }
}

fn notice_part() -> Vec<u8> {
    [
        b"Content-Type: text/plain; charset=utf-8\r\n\r\n".as_slice(),
        VERIFICATION_NOTICE.as_bytes(),
        b"\r\n",
    ]
    .concat()
}

/// The original message as a `message/rfc822` part, after a text part
/// listing the codes of the failed stages.
fn decryption_failed(context: &LoggerContext, original: &RawMessage) -> Vec<u8> {
    let mut codes = Vec::<ErrorCode>::new();
    for code in context
        .ledgers
        .encrypt_format
        .codes()
        .iter()
        .chain(context.ledgers.decrypt.codes())
    {
        if !codes.contains(code) {
            codes.push(*code);
        }
    }
    context.log(&format!(
        "decryption failed: {}",
        codes.iter().map(|c| c.id()).collect::<Vec<_>>().join(", ")
    ));

    let boundary = new_boundary();
    let mut message = RawMessage::default();
    for name in ["Date", "From", "Sender", "Reply-To", "To", "Cc"] {
        if let Some(value) = original.get_header(name) {
            message.add_header(name, &value);
        }
    }
    message.add_header("Subject", DECRYPTION_FAILED_SUBJECT);
    for code in &codes {
        message.add_header(X_KIM_DECRYPTION_RESULT, code.id());
    }
    message.add_header("MIME-Version", "1.0");
    message.add_header(
        "Content-Type",
        &format!("multipart/mixed; boundary=\"{boundary}\""),
    );

    let text = codes
        .iter()
        .map(|code| format!("{}\r\n", code.text()))
        .collect::<String>();
    message.set_body(build_multipart(
        &boundary,
        &[
            [
                b"Content-Type: text/plain; charset=utf-8\r\nContent-Transfer-Encoding: 8bit\r\n\r\n"
                    .as_slice(),
                text.as_bytes(),
            ]
            .concat(),
            [
                b"Content-Type: message/rfc822\r\n\r\n".as_slice(),
                &original.to_bytes()[..],
            ]
            .concat(),
        ],
    ));
    message.to_bytes()
}
