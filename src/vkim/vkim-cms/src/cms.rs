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
    der::{self, tag, Encoding, Reader, Tlv},
    oid, CmsError,
};
use vkim_common::{message::RawMessage, CertificateIdentity};

/// `IssuerAndSerialNumber`, the issuer name kept DER encoded
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IssuerAndSerial {
    /// the `Name`, DER encoded, header included
    pub issuer: Vec<u8>,
    /// the content octets of the `INTEGER`
    pub serial: Vec<u8>,
}

impl IssuerAndSerial {
    /// parse the SEQUENCE, the issuer is normalized to definite lengths
    ///
    /// # Errors
    ///
    /// * not a SEQUENCE of a Name and an INTEGER
    pub fn parse(tlv: &Tlv<'_>) -> Result<Self, CmsError> {
        if tlv.tag != tag::SEQUENCE {
            return Err(der::DerError::UnexpectedTag {
                expected: tag::SEQUENCE,
                found: tlv.tag,
            }
            .into());
        }
        let mut children = tlv.children();
        let issuer = der::to_definite(&children.expect(tag::SEQUENCE)?)?;
        let serial = children.expect(tag::INTEGER)?.value.to_vec();
        Ok(Self { issuer, serial })
    }

    ///
    #[must_use]
    pub fn to_der(&self, encoding: Encoding) -> Vec<u8> {
        der::sequence(
            &[self.issuer.clone(), der::tlv(tag::INTEGER, &self.serial)],
            encoding,
        )
    }

    /// serial number in hexadecimal, for the logs
    #[must_use]
    pub fn serial_hex(&self) -> String {
        self.serial.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// How a recipient (or a signer) is designated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientIdentifier {
    ///
    IssuerAndSerial(IssuerAndSerial),
    ///
    SubjectKeyIdentifier(Vec<u8>),
    /// any other choice, with its tag
    Other(u8),
}

impl RecipientIdentifier {
    fn parse(tlv: &Tlv<'_>) -> Result<Self, CmsError> {
        Ok(match tlv.tag {
            tag::SEQUENCE => Self::IssuerAndSerial(IssuerAndSerial::parse(tlv)?),
            // subjectKeyIdentifier [0] IMPLICIT
            t if t == tag::CONTEXT_PRIMITIVE => Self::SubjectKeyIdentifier(tlv.value.to_vec()),
            // rKeyId [0] IMPLICIT RecipientKeyIdentifier
            t if t == tag::CONTEXT => Self::SubjectKeyIdentifier(
                tlv.children().expect(tag::OCTET_STRING)?.value.to_vec(),
            ),
            other => Self::Other(other),
        })
    }

    ///
    #[must_use]
    pub const fn is_issuer_and_serial(&self) -> bool {
        matches!(self, Self::IssuerAndSerial(_))
    }
}

/// One entry of `recipientInfos`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientInfo {
    /// `ktri`, used with rsa certificates
    KeyTrans {
        ///
        rid: RecipientIdentifier,
    },
    /// `kari`, used with elliptic-curve certificates
    KeyAgree {
        /// one per `RecipientEncryptedKey`
        rids: Vec<RecipientIdentifier>,
    },
    /// `kekri`, `pwri` or `ori`
    Other {
        ///
        tag: u8,
    },
}

impl RecipientInfo {
    fn parse(tlv: &Tlv<'_>) -> Result<Self, CmsError> {
        match tlv.tag {
            tag::SEQUENCE => {
                let mut children = tlv.children();
                children.expect(tag::INTEGER)?;
                let rid = RecipientIdentifier::parse(&children.read()?)?;
                Ok(Self::KeyTrans { rid })
            }
            t if t == tag::CONTEXT | 1 => {
                let mut children = tlv.children();
                children.expect(tag::INTEGER)?;
                children.expect(tag::CONTEXT)?;
                children.optional(tag::CONTEXT | 1)?;
                children.expect(tag::SEQUENCE)?;
                let keys = children.expect(tag::SEQUENCE)?;
                let rids = keys
                    .children()
                    .map(|key| {
                        let key = key?;
                        RecipientIdentifier::parse(&key.children().read()?)
                    })
                    .collect::<Result<Vec<_>, CmsError>>()?;
                Ok(Self::KeyAgree { rids })
            }
            tag => Ok(Self::Other { tag }),
        }
    }
}

/// An `Attribute`, each value kept encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// dotted notation
    pub oid: String,
    /// the encoding of every value of the SET
    pub values: Vec<Vec<u8>>,
}

impl Attribute {
    fn parse(tlv: &Tlv<'_>) -> Result<Self, CmsError> {
        let mut children = tlv.children();
        let oid = children.expect(tag::OID)?.oid()?;
        let values = children
            .expect(tag::SET)?
            .children()
            .map(|value| value.map(|value| value.raw.to_vec()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { oid, values })
    }

    fn parse_set(tlv: &Tlv<'_>) -> Result<Vec<Self>, CmsError> {
        tlv.children()
            .map(|attribute| Self::parse(&attribute?))
            .collect()
    }
}

/// The content of an `AuthEnvelopedData`, what the gateway needs of it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEnvelopedData {
    ///
    pub version: u64,
    ///
    pub recipient_infos: Vec<RecipientInfo>,
    /// content type of the encrypted content
    pub content_type: String,
    ///
    pub encrypted_content: Vec<u8>,
    ///
    pub mac: Vec<u8>,
    ///
    pub unauth_attributes: Vec<Attribute>,
    /// the whole `ContentInfo`
    pub raw: Vec<u8>,
}

/// Parse a `ContentInfo` holding an `AuthEnvelopedData`.
///
/// # Errors
///
/// * [`CmsError::LegacyEnvelopedData`] if the content type is enveloped-data
/// * [`CmsError::UnexpectedContentType`] for any other content type
/// * the encoding is malformed
pub fn parse_auth_enveloped(bytes: &[u8]) -> Result<AuthEnvelopedData, CmsError> {
    let content_info = der::parse(bytes)?;
    let mut children = sequence_children(&content_info)?;

    match children.expect(tag::OID)?.oid()?.as_str() {
        oid::AUTH_ENVELOPED_DATA => {}
        oid::ENVELOPED_DATA => return Err(CmsError::LegacyEnvelopedData),
        other => return Err(CmsError::UnexpectedContentType(other.to_string())),
    }

    let data = children.expect(tag::CONTEXT)?.children().expect(tag::SEQUENCE)?;
    let mut children = data.children();

    let version = children.expect(tag::INTEGER)?.small_integer()?;
    // originatorInfo
    children.optional(tag::CONTEXT)?;

    let recipient_infos = children
        .expect(tag::SET)?
        .children()
        .map(|info| RecipientInfo::parse(&info?))
        .collect::<Result<Vec<_>, _>>()?;

    let content_info = children.expect(tag::SEQUENCE)?;
    let (content_type, encrypted_content) = {
        let mut children = content_info.children();
        let content_type = children.expect(tag::OID)?.oid()?;
        children.expect(tag::SEQUENCE)?;
        let content = match children.read() {
            Ok(content) if content.tag == tag::CONTEXT_PRIMITIVE => content.value.to_vec(),
            Ok(content) if content.tag == tag::CONTEXT => content
                .children()
                .map(|chunk| chunk.and_then(|chunk| chunk.octet_string()))
                .collect::<Result<Vec<_>, _>>()?
                .concat(),
            _ => return Err(CmsError::Missing("encryptedContent")),
        };
        (content_type, content)
    };

    // authAttrs
    children.optional(tag::CONTEXT | 1)?;
    let mac = children.read()?.octet_string()?;
    let unauth_attributes = match children.optional(tag::CONTEXT | 2)? {
        Some(set) => Attribute::parse_set(&set)?,
        None => vec![],
    };

    Ok(AuthEnvelopedData {
        version,
        recipient_infos,
        content_type,
        encrypted_content,
        mac,
        unauth_attributes,
        raw: bytes.to_vec(),
    })
}

fn sequence_children<'a>(tlv: &Tlv<'a>) -> Result<Reader<'a>, CmsError> {
    if tlv.tag == tag::SEQUENCE {
        Ok(tlv.children())
    } else {
        Err(der::DerError::UnexpectedTag {
            expected: tag::SEQUENCE,
            found: tlv.tag,
        }
        .into())
    }
}

/// Every `recipientInfo` designates its recipient by issuer and serial
/// number. An envelope without recipient is not identified.
#[must_use]
pub fn recipient_infos_are_fully_identified(data: &AuthEnvelopedData) -> bool {
    !data.recipient_infos.is_empty()
        && data.recipient_infos.iter().all(|info| match info {
            RecipientInfo::KeyTrans { rid } => rid.is_issuer_and_serial(),
            RecipientInfo::KeyAgree { rids } => {
                !rids.is_empty() && rids.iter().all(RecipientIdentifier::is_issuer_and_serial)
            }
            RecipientInfo::Other { .. } => false,
        })
}

/// Build the recipient-emails attribute, in DER.
///
/// # Errors
///
/// * see [`build_recipient_emails_attribute_with`]
pub fn build_recipient_emails_attribute(
    identities: &[CertificateIdentity],
    ecc_capable: bool,
) -> Result<Vec<u8>, CmsError> {
    build_recipient_emails_attribute_with(identities, ecc_capable, Encoding::Der)
}

/// Build the recipient-emails attribute: one (address, issuer and serial)
/// entry per certificate the message is encrypted for.
///
/// `ecc_capable` selects every certificate of an identity, the rsa subset
/// otherwise.
///
/// # Errors
///
/// * a certificate cannot be parsed
pub fn build_recipient_emails_attribute_with(
    identities: &[CertificateIdentity],
    ecc_capable: bool,
    encoding: Encoding,
) -> Result<Vec<u8>, CmsError> {
    let mut entries = vec![];
    for identity in identities {
        for certificate in identity.certificates_for(ecc_capable) {
            let issuer_and_serial = crate::x509::issuer_and_serial(certificate)?;
            entries.push(der::sequence(
                &[
                    der::ia5_string(identity.address.full()),
                    issuer_and_serial.to_der(encoding),
                ],
                encoding,
            ));
        }
    }

    Ok(der::sequence(
        &[
            der::oid(oid::RECIPIENT_EMAILS)?,
            der::set_of(&entries, encoding),
        ],
        encoding,
    ))
}

/// Every (address, issuer and serial) entry of the recipient-emails
/// attribute found in `attributes`, in order.
///
/// Entries are accepted as direct values of the attribute or wrapped in a
/// SEQUENCE OF, both forms are emitted by existing toolchains.
///
/// # Errors
///
/// * the attribute is absent
/// * an entry is malformed
pub fn recipient_emails(
    attributes: &[Attribute],
) -> Result<Vec<(String, IssuerAndSerial)>, CmsError> {
    let attribute = attributes
        .iter()
        .find(|attribute| attribute.oid == oid::RECIPIENT_EMAILS)
        .ok_or(CmsError::Missing("recipient-emails attribute"))?;

    let mut out = vec![];
    for value in &attribute.values {
        let value = der::parse(value)?;
        let first = value.children().peek_tag();
        let entries = if first == Some(tag::SEQUENCE) {
            value.children().collect::<Result<Vec<_>, _>>()?
        } else {
            vec![value]
        };

        for entry in entries {
            let mut children = sequence_children(&entry)?;
            let address = children.read()?.string()?;
            let issuer_and_serial = IssuerAndSerial::parse(&children.expect(tag::SEQUENCE)?)?;
            out.push((address, issuer_and_serial));
        }
    }
    Ok(out)
}

/// The issuer and serial numbers bound to `address` by the recipient-emails
/// attribute of the envelope, the comparison ignores the case.
///
/// # Errors
///
/// * see [`recipient_emails`]
pub fn extract_issuer_and_serial_for_address(
    data: &AuthEnvelopedData,
    address: &str,
) -> Result<Vec<IssuerAndSerial>, CmsError> {
    Ok(recipient_emails(&data.unauth_attributes)?
        .into_iter()
        .filter(|(email, _)| email.trim().eq_ignore_ascii_case(address.trim()))
        .map(|(_, issuer_and_serial)| issuer_and_serial)
        .collect())
}

/// One `SignerInfo`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerInfo {
    ///
    pub sid: RecipientIdentifier,
    ///
    pub digest_algorithm: String,
    ///
    pub signed_attributes: Vec<Attribute>,
    ///
    pub signature: Vec<u8>,
}

/// A `SignedData`, parsed as a whole
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedData {
    ///
    pub version: u64,
    ///
    pub digest_algorithms: Vec<String>,
    /// `eContentType`
    pub content_type: String,
    /// `eContent`, absent for a detached signature
    pub content: Option<Vec<u8>>,
    /// DER encoded
    pub certificates: Vec<Vec<u8>>,
    ///
    pub signer_infos: Vec<SignerInfo>,
}

impl SignedData {
    /// Parse a `ContentInfo` holding a `SignedData`
    ///
    /// # Errors
    ///
    /// * the content type is not signed-data
    /// * the encoding is malformed
    pub fn parse(bytes: &[u8]) -> Result<Self, CmsError> {
        let content_info = der::parse(bytes)?;
        let mut children = signed_data_children(&content_info)?;

        let version = children.expect(tag::INTEGER)?.small_integer()?;
        let digest_algorithms = children
            .expect(tag::SET)?
            .children()
            .map(|algorithm| algorithm_oid(&algorithm?))
            .collect::<Result<Vec<_>, _>>()?;

        let (content_type, content) = encapsulated_content(&children.expect(tag::SEQUENCE)?)?;

        let certificates = match children.optional(tag::CONTEXT)? {
            Some(certificates) => certificates
                .children()
                .map(|certificate| der::to_definite(&certificate?))
                .collect::<Result<Vec<_>, _>>()?,
            None => vec![],
        };
        // crls
        children.optional(tag::CONTEXT | 1)?;

        let signer_infos = children
            .expect(tag::SET)?
            .children()
            .map(|info| SignerInfo::parse(&info?))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            version,
            digest_algorithms,
            content_type,
            content,
            certificates,
            signer_infos,
        })
    }

    /// the recipient-emails attribute signed by the first signer carrying one
    #[must_use]
    pub fn recipient_emails(&self) -> Option<Vec<(String, IssuerAndSerial)>> {
        self.signer_infos
            .iter()
            .find_map(|signer| recipient_emails(&signer.signed_attributes).ok())
    }
}

impl SignerInfo {
    fn parse(tlv: &Tlv<'_>) -> Result<Self, CmsError> {
        let mut children = sequence_children(tlv)?;
        children.expect(tag::INTEGER)?;
        let sid = RecipientIdentifier::parse(&children.read()?)?;
        let digest_algorithm = algorithm_oid(&children.expect(tag::SEQUENCE)?)?;
        let signed_attributes = match children.optional(tag::CONTEXT)? {
            Some(set) => Attribute::parse_set(&set)?,
            None => vec![],
        };
        children.expect(tag::SEQUENCE)?;
        let signature = children.read()?.octet_string()?;
        Ok(Self {
            sid,
            digest_algorithm,
            signed_attributes,
            signature,
        })
    }
}

fn algorithm_oid(tlv: &Tlv<'_>) -> Result<String, CmsError> {
    Ok(sequence_children(tlv)?.expect(tag::OID)?.oid()?)
}

fn signed_data_children<'a>(content_info: &Tlv<'a>) -> Result<Reader<'a>, CmsError> {
    let mut children = sequence_children(content_info)?;
    let content_type = children.expect(tag::OID)?.oid()?;
    if content_type != oid::SIGNED_DATA {
        return Err(CmsError::UnexpectedContentType(content_type));
    }
    let signed_data = children.expect(tag::CONTEXT)?.children().expect(tag::SEQUENCE)?;
    Ok(signed_data.children())
}

fn encapsulated_content(tlv: &Tlv<'_>) -> Result<(String, Option<Vec<u8>>), CmsError> {
    let mut children = sequence_children(tlv)?;
    let content_type = children.expect(tag::OID)?.oid()?;
    let content = match children.optional(tag::CONTEXT)? {
        Some(explicit) => Some(explicit.children().read()?.octet_string()?),
        None => None,
    };
    Ok((content_type, content))
}

/// Read `eContent` walking the encoding once, the certificates and the
/// signer infos are skipped.
fn stream_signed_content(bytes: &[u8]) -> Result<Vec<u8>, CmsError> {
    let mut reader = Reader::new(bytes);
    let content_info = reader.expect(tag::SEQUENCE)?;
    let mut children = signed_data_children(&content_info)?;
    children.expect(tag::INTEGER)?;
    children.expect(tag::SET)?;
    encapsulated_content(&children.expect(tag::SEQUENCE)?)?
        .1
        .ok_or(CmsError::Missing("eContent"))
}

/// Extract the signed content of a `application/pkcs7-mime` part.
///
/// Returns `None` if `part` is of another media type. `streaming` selects
/// a single pass over the encoding, otherwise the whole `SignedData` is
/// parsed first.
///
/// # Errors
///
/// * the body is not base64
/// * the `SignedData` is malformed or has no `eContent`
pub fn extract_signed_payload(
    part: &RawMessage,
    streaming: bool,
) -> Result<Option<Vec<u8>>, CmsError> {
    let is_pkcs7 = part.content_type().map_or(false, |content_type| {
        matches!(
            content_type.mime(),
            "application/pkcs7-mime" | "application/x-pkcs7-mime"
        )
    });
    if !is_pkcs7 {
        return Ok(None);
    }

    let bytes = part
        .decoded_body()
        .map_err(|e| CmsError::TransferEncoding(e.to_string()))?;

    let content = if streaming {
        stream_signed_content(&bytes)?
    } else {
        SignedData::parse(&bytes)?
            .content
            .ok_or(CmsError::Missing("eContent"))?
    };
    Ok(Some(content))
}
