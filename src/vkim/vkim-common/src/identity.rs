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

use crate::Address;

/// outcome of a certificate or practitioner-id lookup
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, strum::AsRefStr, serde::Serialize, serde::Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum X509ErrorCode {
    ///
    #[default]
    Ok,
    /// the directory has no entry for the address
    NotFound,
    /// the certificates carry distinct practitioner ids, terminal
    MoreThanOneId,
    /// any other failure (parse error, directory failure)
    Other,
}

impl X509ErrorCode {
    ///
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl std::fmt::Display for X509ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Accumulator of the practitioner id (telematik id) found across the
/// certificates of one address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PractitionerIdResult {
    /// registration number read from the admission extension
    pub id: Option<String>,
    ///
    pub email: Option<String>,
    /// serial number of the card the certificate belongs to
    pub icssn: Option<String>,
    ///
    pub error: X509ErrorCode,
}

impl PractitionerIdResult {
    /// text used in logs, only the fields that are known
    #[must_use]
    pub fn describe(&self) -> String {
        [
            ("Email", &self.email),
            ("Icssn", &self.icssn),
            ("TelematikId", &self.id),
        ]
        .into_iter()
        .filter_map(|(k, v)| {
            v.as_deref()
                .filter(|v| !v.trim().is_empty())
                .map(|v| format!("{k}: {v}"))
        })
        .collect::<Vec<_>>()
        .join(", ")
    }
}

/// Certificates resolved for one address of one message.
///
/// Never cached across messages, the directory may change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateIdentity {
    ///
    pub address: Address,
    /// every certificate returned by the directory, DER encoded
    pub certificates: Vec<Vec<u8>>,
    /// the subset of `certificates` which are not elliptic-curve
    pub rsa_certificates: Vec<Vec<u8>>,
    ///
    pub practitioner_id: PractitionerIdResult,
    /// newest version advertised by the directory entries, if any
    pub directory_version: Option<String>,
    ///
    pub error: X509ErrorCode,
}

impl CertificateIdentity {
    /// an identity without any certificate yet
    #[must_use]
    pub fn new(address: Address) -> Self {
        Self {
            address,
            certificates: vec![],
            rsa_certificates: vec![],
            practitioner_id: PractitionerIdResult::default(),
            directory_version: None,
            error: X509ErrorCode::Ok,
        }
    }

    /// both the certificate set and the practitioner id resolved
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_ok() && self.practitioner_id.error.is_ok()
    }

    /// the certificates to encrypt for, depending on the connector capability
    #[must_use]
    pub fn certificates_for(&self, ecc_capable: bool) -> &[Vec<u8>] {
        if ecc_capable {
            &self.certificates
        } else {
            &self.rsa_certificates
        }
    }
}
