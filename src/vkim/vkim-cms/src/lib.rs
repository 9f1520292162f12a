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

//! vKIM codec: the CMS envelopes of the KOM-LE profile and the X.509 helpers

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

#[cfg(test)]
mod tests;

/// BER/DER access through der_parser, and the writer of the attributes and fixtures
pub mod der;
/// object identifiers
pub mod oid;

mod cms;
mod x509;

/// builders of certificates and envelopes, used by the tests of every crate
/// of the workspace
///
/// not marked as #[cfg(test)] because it is used by the test doubles of
/// vkim-test
pub mod test_helpers;

pub use cms::{
    build_recipient_emails_attribute, build_recipient_emails_attribute_with,
    extract_issuer_and_serial_for_address, extract_signed_payload, parse_auth_enveloped,
    recipient_emails, recipient_infos_are_fully_identified, Attribute, AuthEnvelopedData,
    IssuerAndSerial, RecipientIdentifier, RecipientInfo, SignedData, SignerInfo,
};
pub use der::Encoding;
pub use x509::{
    extract_practitioner_id, filter_rsa_certificates, is_ecc, issuer_and_serial, mail_addresses,
};

/// Failures of the codec
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CmsError {
    ///
    #[error(transparent)]
    Der(#[from] der::DerError),
    /// the top-level content type is the legacy enveloped-data
    #[error("legacy enveloped-data ({}) instead of authenticated-enveloped-data ({})", oid::ENVELOPED_DATA, oid::AUTH_ENVELOPED_DATA)]
    LegacyEnvelopedData,
    ///
    #[error("unexpected content type '{0}'")]
    UnexpectedContentType(String),
    /// a mandatory element is absent
    #[error("missing {0}")]
    Missing(&'static str),
    ///
    #[error("invalid certificate: {0}")]
    Certificate(String),
    /// the transfer encoding of a mime part is broken
    #[error("invalid transfer encoding: {0}")]
    TransferEncoding(String),
}

impl From<CmsError> for vkim_common::GatewayError {
    fn from(error: CmsError) -> Self {
        Self::MalformedEnvelope(error.to_string())
    }
}
