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

use vkim_cms::{AuthEnvelopedData, CmsError};
use vkim_common::{
    message::RawMessage, re::tracing, CodeLedger, ErrorCode, KimVersion,
};

/// header carrying the KIM version of an envelope
pub const X_KOM_LE_VERSION: &str = "X-KOM-LE-Version";
/// subject of every envelope, the real subject is inside
pub const SUBJECT_KOM_LE_NACHRICHT: &str = "KOM-LE-Nachricht";
/// content type of an envelope
pub const CONTENT_TYPE_AUTH_ENVELOPED: &str =
    "application/pkcs7-mime; smime-type=authenticated-enveloped-data; name=smime.p7m";
/// content type of the signed message inside an envelope
pub const CONTENT_TYPE_SIGNED: &str =
    "application/pkcs7-mime; smime-type=signed-data; name=smime.p7m";
///
pub const CONTENT_DISPOSITION: &str = "attachment; filename=smime.p7m";
/// line prepended to a message before signing
pub const RFC822_PRE_HEADER: &[u8] = b"Content-Type: message/rfc822\r\n\r\n";

/// An envelope which passed [`check_encrypted_format`]
#[derive(Debug, Clone)]
pub struct EncryptedFormat {
    ///
    pub version: KimVersion,
    /// the CMS structure, transfer encoding removed
    pub envelope: Vec<u8>,
    ///
    pub data: AuthEnvelopedData,
}

/// Check that `message` is a well-formed KIM envelope.
///
/// The first failing check records its codes in `ledger`, nothing is
/// recorded on success.
pub fn check_encrypted_format(
    message: &RawMessage,
    ledger: &mut CodeLedger,
) -> Option<EncryptedFormat> {
    let versions = message.get_headers(X_KOM_LE_VERSION);
    let version = match versions.as_slice() {
        [version] => KimVersion::parse(version).ok(),
        _ => None,
    };
    let Some(version) = version else {
        ledger.extend([ErrorCode::X014, ErrorCode::C4008]);
        return None;
    };

    if message.get_header("Subject").as_deref() != Some(SUBJECT_KOM_LE_NACHRICHT) {
        ledger.add(ErrorCode::X015);
        return None;
    }

    let is_pkcs7 = message.content_type().map_or(false, |content_type| {
        matches!(
            content_type.mime(),
            "application/pkcs7-mime" | "application/x-pkcs7-mime"
        )
    });
    let is_attachment = message
        .get_header("Content-Disposition")
        .map_or(false, |disposition| {
            disposition
                .trim_start()
                .to_ascii_lowercase()
                .starts_with("attachment")
        });
    if !is_pkcs7 || !is_attachment || message.body().iter().all(u8::is_ascii_whitespace) {
        ledger.add(ErrorCode::X016);
        return None;
    }

    let envelope = match message.decoded_body() {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::debug!(%error, "envelope is not base64");
            ledger.add(ErrorCode::X020);
            return None;
        }
    };

    let data = match vkim_cms::parse_auth_enveloped(&envelope) {
        Ok(data) => data,
        Err(CmsError::LegacyEnvelopedData) => {
            ledger.add(ErrorCode::X017);
            return None;
        }
        Err(error) => {
            tracing::debug!(%error, "envelope cannot be parsed");
            ledger.add(ErrorCode::X020);
            return None;
        }
    };

    if !vkim_cms::recipient_infos_are_fully_identified(&data) {
        ledger.add(ErrorCode::X018);
        return None;
    }

    match vkim_cms::recipient_emails(&data.unauth_attributes) {
        Ok(emails) if !emails.is_empty() => {}
        Ok(_) => {
            ledger.add(ErrorCode::X019);
            return None;
        }
        Err(error) => {
            tracing::debug!(%error, "recipient-emails attribute");
            ledger.add(ErrorCode::X019);
            return None;
        }
    }

    Some(EncryptedFormat {
        version,
        envelope,
        data,
    })
}

/// A message forwarding a KIM envelope: a `multipart/mixed` of two parts,
/// one of them a `message/rfc822` which is itself a valid envelope.
#[must_use]
pub fn is_embedded_envelope(message: &RawMessage) -> bool {
    let is_mixed = message
        .content_type()
        .map_or(false, |content_type| content_type.mime() == "multipart/mixed");
    if !is_mixed {
        return false;
    }
    let Some(parts) = message.parts() else {
        return false;
    };

    parts.len() == 2
        && parts.iter().any(|part| {
            part.content_type()
                .map_or(false, |content_type| content_type.mime() == "message/rfc822")
                && check_encrypted_format(&RawMessage::parse(part.body()), &mut CodeLedger::default())
                    .is_some()
        })
}
