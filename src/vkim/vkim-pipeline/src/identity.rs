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

use crate::collaborator::{Directory, DirectoryEntry};
use vkim_common::{
    re::tracing, Address, CertificateIdentity, ErrorCode, GatewayError, KimVersion,
    MessageLedgers, X509ErrorCode,
};

/// Resolve the certificates of mail addresses with the directory service,
/// recording every failure in the ledgers of the message.
#[derive(Clone)]
pub struct IdentityResolver {
    directory: std::sync::Arc<dyn Directory>,
    search_base: String,
    kim_version: KimVersion,
    ecc_encryption_available: bool,
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("search_base", &self.search_base)
            .field("kim_version", &self.kim_version)
            .field("ecc_encryption_available", &self.ecc_encryption_available)
            .finish_non_exhaustive()
    }
}

impl IdentityResolver {
    ///
    #[must_use]
    pub fn new(
        directory: std::sync::Arc<dyn Directory>,
        search_base: impl Into<String>,
        kim_version: KimVersion,
        ecc_encryption_available: bool,
    ) -> Self {
        Self {
            directory,
            search_base: search_base.into(),
            kim_version,
            ecc_encryption_available,
        }
    }

    /// Resolve the identity of every address, for the sender side or for the
    /// recipient side.
    ///
    /// Per-address failures are recorded in `ledgers` and do not stop the
    /// resolution of the other addresses, the call fails as a whole if one
    /// of them failed.
    ///
    /// # Errors
    ///
    /// * [`GatewayError::InvalidArgument`] unless exactly one side is selected
    /// * [`GatewayError::IdentityResolutionFailed`] for the first address
    ///   which could not be resolved, or if `addresses` is empty
    pub async fn load_certificates(
        &self,
        ledgers: &mut MessageLedgers,
        addresses: &[Address],
        is_sender: bool,
        is_recipient: bool,
    ) -> Result<Vec<CertificateIdentity>, GatewayError> {
        if is_sender == is_recipient {
            return Err(GatewayError::InvalidArgument(
                "exactly one of sender or recipient must be selected".to_string(),
            ));
        }

        let mut distinct = Vec::<&Address>::with_capacity(addresses.len());
        for address in addresses {
            if !distinct.contains(&address) {
                distinct.push(address);
            }
        }

        let mut identities = Vec::with_capacity(distinct.len());
        for address in distinct {
            identities.push(self.load_one(ledgers, address, is_sender).await);
        }

        if let Some(failed) = identities.iter().find(|identity| !identity.is_ok()) {
            return Err(GatewayError::identity(
                failed.address.full(),
                if failed.error.is_ok() {
                    failed.practitioner_id.error.to_string()
                } else {
                    failed.error.to_string()
                },
            ));
        }
        if identities.is_empty() {
            return Err(GatewayError::identity("", "no address to resolve"));
        }
        Ok(identities)
    }

    async fn load_one(
        &self,
        ledgers: &mut MessageLedgers,
        address: &Address,
        is_sender: bool,
    ) -> CertificateIdentity {
        let mut identity = CertificateIdentity::new(address.clone());
        let not_found = if is_sender {
            ErrorCode::X006
        } else {
            ErrorCode::X005
        };

        let entries = match self
            .directory
            .search(&self.search_base, address.full(), true, true)
            .await
        {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(%address, %error, "directory search failed");
                identity.error = X509ErrorCode::Other;
                ledgers
                    .certificates
                    .add_identity(&identity, ErrorCode::X004, is_sender);
                return identity;
            }
        };

        identity.certificates = entries
            .iter()
            .flat_map(|entry| entry.certificates.iter().cloned())
            .collect();
        identity.directory_version = newest_version(&entries);

        if identity.certificates.is_empty() {
            tracing::info!(%address, entries = entries.len(), "no certificate found");
            identity.error = X509ErrorCode::NotFound;
            ledgers
                .certificates
                .add_identity(&identity, not_found, is_sender);
            return identity;
        }

        if is_sender {
            self.check_version(ledgers, &identity);
        }

        identity.practitioner_id = identity.certificates.iter().fold(
            vkim_common::PractitionerIdResult {
                email: Some(address.full().to_string()),
                ..Default::default()
            },
            |acc, certificate| vkim_cms::extract_practitioner_id(certificate, acc),
        );

        match identity.practitioner_id.error {
            X509ErrorCode::Ok => {}
            X509ErrorCode::MoreThanOneId if is_sender => {
                ledgers
                    .certificates
                    .add_identity(&identity, ErrorCode::X007, true);
                ledgers
                    .certificates
                    .add_identity(&identity, ErrorCode::C4003, true);
            }
            X509ErrorCode::MoreThanOneId => {
                ledgers
                    .certificates
                    .add_identity(&identity, ErrorCode::C4005, false);
            }
            X509ErrorCode::NotFound | X509ErrorCode::Other => {
                ledgers
                    .certificates
                    .add_identity(&identity, not_found, is_sender);
            }
        }
        tracing::debug!(
            %address,
            certificates = identity.certificates.len(),
            practitioner = %identity.practitioner_id.describe(),
            error = %identity.practitioner_id.error,
            "identity resolved"
        );

        if identity.is_ok() && !self.ecc_encryption_available {
            vkim_cms::filter_rsa_certificates(&mut identity);
        }
        identity
    }

    fn check_version(&self, ledgers: &mut MessageLedgers, identity: &CertificateIdentity) {
        let Some(advertised) = &identity.directory_version else {
            return;
        };
        match KimVersion::parse(advertised) {
            Ok(advertised) if KimVersion::is_newer(self.kim_version, advertised) => {
                tracing::info!(
                    address = %identity.address,
                    own = %self.kim_version,
                    %advertised,
                    "the directory advertises a newer version"
                );
                ledgers
                    .versions
                    .add_identity(identity, ErrorCode::X008, true);
            }
            Ok(_) => {}
            Err(error) => {
                tracing::debug!(address = %identity.address, %error, "version of the directory ignored");
            }
        }
    }
}

/// the newest version advertised by the entries, the first one if none parses
fn newest_version(entries: &[DirectoryEntry]) -> Option<String> {
    let mut advertised = entries.iter().filter_map(|entry| entry.kim_version.as_deref());
    advertised
        .clone()
        .filter_map(|raw| KimVersion::parse(raw).ok().map(|version| (version, raw)))
        .max_by_key(|(version, _)| *version)
        .map(|(_, raw)| raw)
        .or_else(|| advertised.next())
        .map(str::to_string)
}
