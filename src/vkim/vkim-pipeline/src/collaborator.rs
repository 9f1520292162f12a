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

use vkim_common::{re::anyhow, ErrorCode};

/// One entry of the directory service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    ///
    pub mail_addresses: Vec<String>,
    /// KIM version of the client module registered for the entry
    pub kim_version: Option<String>,
    /// encryption certificates, DER encoded
    pub certificates: Vec<Vec<u8>>,
}

/// The directory service, mapping mail addresses to identities.
#[async_trait::async_trait]
pub trait Directory: Send + Sync {
    /// Search the entries below `base` matching `query`.
    ///
    /// An empty result is a valid answer, not an error.
    ///
    /// # Errors
    ///
    /// * the directory cannot be reached
    async fn search(
        &self,
        base: &str,
        query: &str,
        mail_only: bool,
        with_certificates: bool,
    ) -> anyhow::Result<Vec<DirectoryEntry>>;
}

/// Type of a card plugged in the connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[strum(serialize_all = "SCREAMING-KEBAB-CASE")]
pub enum CardKind {
    /// institution card
    SmcB,
    /// health professional card
    Hba,
    ///
    Other,
}

/// PIN status of a card, as reported by the connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PinStatus {
    ///
    Verified,
    ///
    Verifiable,
    ///
    Blocked,
    ///
    TransportPin,
    ///
    EmptyPin,
    ///
    Disabled,
    ///
    Unknown,
}

/// A card of the connector's inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    ///
    pub handle: String,
    ///
    pub kind: CardKind,
    ///
    pub pin_status: PinStatus,
    /// encryption certificates held by the card, DER encoded
    pub encryption_certificates: Vec<Vec<u8>>,
}

impl Card {
    /// an institution card ready to be used
    #[must_use]
    pub fn is_usable_smcb(&self) -> bool {
        self.kind == CardKind::SmcB && self.pin_status == PinStatus::Verified
    }
}

/// Outcome of a signature verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    ///
    pub valid: bool,
    /// diagnostic of the connector when the signature is not valid
    pub code: Option<ErrorCode>,
}

/// The hardware security module, performing the card-backed operations.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// The cards available.
    ///
    /// # Errors
    ///
    /// * the connector cannot be reached
    async fn cards(&self) -> anyhow::Result<Vec<Card>>;

    /// Sign `bytes` with the key of `card`, returns a CMS signed-data.
    ///
    /// # Errors
    ///
    /// * the connector cannot be reached or refused the operation
    async fn sign(&self, card: &str, bytes: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Encrypt `bytes` for every certificate, `unprotected_attributes` are
    /// encoded attributes attached to the envelope.
    ///
    /// # Errors
    ///
    /// * the connector cannot be reached or refused the operation
    async fn encrypt(
        &self,
        certificates: &[Vec<u8>],
        bytes: &[u8],
        unprotected_attributes: &[Vec<u8>],
    ) -> anyhow::Result<Vec<u8>>;

    /// Decrypt an authenticated-enveloped-data with the key of `card`.
    ///
    /// # Errors
    ///
    /// * the connector cannot be reached or refused the operation
    async fn decrypt(&self, card: &str, bytes: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Verify a CMS signed-data.
    ///
    /// # Errors
    ///
    /// * the connector cannot be reached
    async fn verify(&self, card: &str, bytes: &[u8]) -> anyhow::Result<VerificationReport>;

    /// can the connector encrypt for elliptic-curve certificates
    fn ecc_encryption_available(&self) -> bool;
}

/// Name resolution used to reach the backends.
#[async_trait::async_trait]
pub trait NameResolver: Send + Sync {
    /// The A records of `name`, empty if there is none.
    ///
    /// # Errors
    ///
    /// * the resolver or its transport failed
    async fn lookup_a(&self, name: &str) -> anyhow::Result<Vec<std::net::Ipv4Addr>>;
}

/// [`NameResolver`] using the system configuration.
pub struct TrustDnsResolver {
    inner: trust_dns_resolver::TokioAsyncResolver,
}

impl TrustDnsResolver {
    /// Build a resolver from `/etc/resolv.conf` (or the platform equivalent).
    ///
    /// # Errors
    ///
    /// * the system configuration cannot be read
    pub fn from_system_conf() -> anyhow::Result<Self> {
        Ok(Self {
            inner: trust_dns_resolver::TokioAsyncResolver::tokio_from_system_conf()?,
        })
    }
}

#[async_trait::async_trait]
impl NameResolver for TrustDnsResolver {
    async fn lookup_a(&self, name: &str) -> anyhow::Result<Vec<std::net::Ipv4Addr>> {
        match self.inner.ipv4_lookup(name).await {
            Ok(lookup) => Ok(lookup.iter().copied().collect()),
            Err(error) => match error.kind() {
                trust_dns_resolver::error::ResolveErrorKind::NoRecordsFound { .. } => Ok(vec![]),
                _ => Err(error.into()),
            },
        }
    }
}

/// Every collaborator the gateway depends on.
#[derive(Clone)]
pub struct Collaborators {
    ///
    pub directory: std::sync::Arc<dyn Directory>,
    ///
    pub connector: std::sync::Arc<dyn Connector>,
    ///
    pub resolver: std::sync::Arc<dyn NameResolver>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
