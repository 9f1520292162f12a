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
    der::{self, tag, Tlv},
    oid, CmsError, IssuerAndSerial,
};
use vkim_common::{re::tracing, CertificateIdentity, PractitionerIdResult, X509ErrorCode};
use x509_parser::{certificate::X509Certificate, extensions::GeneralName, prelude::FromDer};

fn parse(certificate: &[u8]) -> Result<X509Certificate<'_>, CmsError> {
    X509Certificate::from_der(certificate)
        .map(|(_, certificate)| certificate)
        .map_err(|e| CmsError::Certificate(e.to_string()))
}

/// The issuer name and serial number of a DER encoded certificate.
///
/// # Errors
///
/// * the certificate cannot be parsed
pub fn issuer_and_serial(certificate: &[u8]) -> Result<IssuerAndSerial, CmsError> {
    let certificate = parse(certificate)?;
    let issuer = der::to_definite(&der::parse(certificate.tbs_certificate.issuer.as_raw())?)?;
    Ok(IssuerAndSerial {
        issuer,
        serial: certificate.tbs_certificate.raw_serial().to_vec(),
    })
}

/// Is the subject public key an elliptic-curve one.
///
/// # Errors
///
/// * the certificate cannot be parsed
pub fn is_ecc(certificate: &[u8]) -> Result<bool, CmsError> {
    Ok(parse(certificate)?
        .public_key()
        .algorithm
        .algorithm
        .to_id_string()
        == oid::EC_PUBLIC_KEY)
}

/// Keep in `rsa_certificates` the certificates which are not elliptic-curve.
/// A certificate which cannot be parsed is left out of the subset.
pub fn filter_rsa_certificates(identity: &mut CertificateIdentity) {
    identity.rsa_certificates = identity
        .certificates
        .iter()
        .filter(|certificate| matches!(is_ecc(certificate), Ok(false)))
        .cloned()
        .collect();
}

/// Mail addresses of the subject: rfc822 names of the alternative name
/// extension, then the email attributes of the subject name.
///
/// # Errors
///
/// * the certificate or its alternative name extension cannot be parsed
pub fn mail_addresses(certificate: &[u8]) -> Result<Vec<String>, CmsError> {
    let certificate = parse(certificate)?;
    let mut out = vec![];

    if let Some(alt_names) = certificate
        .subject_alternative_name()
        .map_err(|e| CmsError::Certificate(e.to_string()))?
    {
        for name in &alt_names.value.general_names {
            if let GeneralName::RFC822Name(address) = name {
                out.push((*address).to_lowercase());
            }
        }
    }

    for attribute in certificate.subject().iter_email() {
        if let Ok(address) = attribute.as_str() {
            let address = address.to_lowercase();
            if !out.contains(&address) {
                out.push(address);
            }
        }
    }
    Ok(out)
}

/// Accumulate the practitioner id carried by the admission extension of
/// `certificate` into `acc`.
///
/// The accumulator is returned unchanged if it already carries an error.
/// The first registration number found sets the id, a different one ends
/// the scan with [`X509ErrorCode::MoreThanOneId`]. A certificate without
/// admission extension, or which cannot be parsed, sets
/// [`X509ErrorCode::Other`].
#[must_use]
pub fn extract_practitioner_id(
    certificate: &[u8],
    mut acc: PractitionerIdResult,
) -> PractitionerIdResult {
    if !acc.error.is_ok() {
        return acc;
    }

    let registration_numbers = match registration_numbers(certificate) {
        Ok(numbers) => numbers,
        Err(error) => {
            tracing::warn!(%error, detail = %acc.describe(), "cannot extract the practitioner id");
            acc.error = X509ErrorCode::Other;
            return acc;
        }
    };

    for number in registration_numbers {
        match acc.id.as_deref().map(str::trim) {
            None | Some("") => acc.id = Some(number),
            Some(id) if id == number => {}
            Some(_) => {
                tracing::warn!(detail = %acc.describe(), other = %number, "more than one practitioner id");
                acc.error = X509ErrorCode::MoreThanOneId;
                return acc;
            }
        }
    }
    acc
}

fn registration_numbers(certificate: &[u8]) -> Result<Vec<String>, CmsError> {
    let certificate = parse(certificate)?;
    let extension = certificate
        .extensions()
        .iter()
        .find(|extension| extension.oid.to_id_string() == oid::ADMISSION)
        .ok_or(CmsError::Missing("admission extension"))?;

    let admission_syntax = der::parse(extension.value)?;
    let mut children = admission_syntax.children();
    // admissionAuthority, a GeneralName
    if children.peek_tag() != Some(tag::SEQUENCE) {
        children.read()?;
    }

    let mut out = vec![];
    for admissions in children.expect(tag::SEQUENCE)?.children() {
        let admissions = admissions?;
        let mut children = admissions.children();
        // admissionAuthority [0], namingAuthority [1]
        children.optional(tag::CONTEXT)?;
        children.optional(tag::CONTEXT | 1)?;
        for profession_info in children.expect(tag::SEQUENCE)?.children() {
            if let Some(number) = registration_number(&profession_info?)? {
                out.push(number);
            }
        }
    }
    Ok(out)
}

fn registration_number(profession_info: &Tlv<'_>) -> Result<Option<String>, CmsError> {
    let mut children = profession_info.children();
    // namingAuthority [0]
    children.optional(tag::CONTEXT)?;
    // professionItems
    children.expect(tag::SEQUENCE)?;
    // professionOIDs
    children.optional(tag::SEQUENCE)?;

    match children.peek_tag() {
        Some(tag::PRINTABLE_STRING | tag::UTF8_STRING | tag::IA5_STRING) => {
            Ok(Some(children.read()?.string()?))
        }
        _ => Ok(None),
    }
}
