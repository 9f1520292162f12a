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
    collaborator::{
        Card, CardKind, Collaborators, Connector, Directory, DirectoryEntry, NameResolver,
        PinStatus, VerificationReport,
    },
    relay::Relay,
};
use vkim_cms::{
    test_helpers::{CertificateBuilder, EnvelopeBuilder},
    Encoding,
};
use vkim_common::{re::anyhow, Address, Reply};

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A [`Directory`] answering from a map of addresses.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    entries: std::collections::HashMap<String, Vec<DirectoryEntry>>,
    failing: Vec<String>,
    searches: std::sync::Mutex<Vec<String>>,
}

impl InMemoryDirectory {
    ///
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// one entry for `address` holding `certificates`
    #[must_use]
    pub fn with_entry(
        mut self,
        address: &str,
        certificates: Vec<Vec<u8>>,
        kim_version: Option<&str>,
    ) -> Self {
        self.entries
            .entry(address.to_lowercase())
            .or_default()
            .push(DirectoryEntry {
                mail_addresses: vec![address.to_lowercase()],
                kim_version: kim_version.map(str::to_string),
                certificates,
            });
        self
    }

    /// searching `address` fails as if the directory was unreachable
    #[must_use]
    pub fn with_failure(mut self, address: &str) -> Self {
        self.failing.push(address.to_lowercase());
        self
    }

    /// the queries received so far
    #[must_use]
    pub fn searches(&self) -> Vec<String> {
        lock(&self.searches).clone()
    }
}

#[async_trait::async_trait]
impl Directory for InMemoryDirectory {
    async fn search(
        &self,
        _: &str,
        query: &str,
        _: bool,
        _: bool,
    ) -> anyhow::Result<Vec<DirectoryEntry>> {
        lock(&self.searches).push(query.to_string());
        let query = query.to_lowercase();
        if self.failing.contains(&query) {
            anyhow::bail!("directory unreachable for '{query}'");
        }
        Ok(self.entries.get(&query).cloned().unwrap_or_default())
    }
}

/// A [`Connector`] signing and sealing with the codec's test builders.
///
/// Signatures are produced with the certificate of the signing card,
/// envelopes are opened whatever the card.
#[derive(Debug)]
pub struct InMemoryConnector {
    cards: Vec<Card>,
    signer: Vec<u8>,
    ecc: bool,
    fail_cards: bool,
    fail_sign: bool,
    fail_encrypt: bool,
    fail_decrypt: bool,
    verification: VerificationReport,
    encrypted_for: std::sync::Mutex<Vec<Vec<Vec<u8>>>>,
}

impl InMemoryConnector {
    /// one SMC-B `handle` with a verified pin, holding `certificate`
    #[must_use]
    pub fn new(handle: &str, certificate: Vec<u8>) -> Self {
        Self {
            cards: vec![Card {
                handle: handle.to_string(),
                kind: CardKind::SmcB,
                pin_status: PinStatus::Verified,
                encryption_certificates: vec![certificate.clone()],
            }],
            signer: certificate,
            ecc: true,
            fail_cards: false,
            fail_sign: false,
            fail_encrypt: false,
            fail_decrypt: false,
            verification: VerificationReport {
                valid: true,
                code: None,
            },
            encrypted_for: std::sync::Mutex::new(vec![]),
        }
    }

    /// replace the inventory
    #[must_use]
    pub fn with_cards(mut self, cards: Vec<Card>) -> Self {
        self.cards = cards;
        self
    }

    ///
    #[must_use]
    pub const fn with_ecc(mut self, ecc: bool) -> Self {
        self.ecc = ecc;
        self
    }

    ///
    #[must_use]
    pub const fn failing_cards(mut self) -> Self {
        self.fail_cards = true;
        self
    }

    ///
    #[must_use]
    pub const fn failing_sign(mut self) -> Self {
        self.fail_sign = true;
        self
    }

    ///
    #[must_use]
    pub const fn failing_encrypt(mut self) -> Self {
        self.fail_encrypt = true;
        self
    }

    ///
    #[must_use]
    pub const fn failing_decrypt(mut self) -> Self {
        self.fail_decrypt = true;
        self
    }

    /// every verification returns `report`
    #[must_use]
    pub fn with_verification(mut self, report: VerificationReport) -> Self {
        self.verification = report;
        self
    }

    /// the certificates of every `encrypt` call, in order
    #[must_use]
    pub fn encrypted_for(&self) -> Vec<Vec<Vec<u8>>> {
        lock(&self.encrypted_for).clone()
    }
}

#[async_trait::async_trait]
impl Connector for InMemoryConnector {
    async fn cards(&self) -> anyhow::Result<Vec<Card>> {
        if self.fail_cards {
            anyhow::bail!("connector unreachable");
        }
        Ok(self.cards.clone())
    }

    async fn sign(&self, card: &str, bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
        if self.fail_sign {
            anyhow::bail!("card '{card}' refused to sign");
        }
        Ok(vkim_cms::test_helpers::signed_data(
            bytes,
            &self.signer,
            Encoding::Der,
        )?)
    }

    async fn encrypt(
        &self,
        certificates: &[Vec<u8>],
        bytes: &[u8],
        unprotected_attributes: &[Vec<u8>],
    ) -> anyhow::Result<Vec<u8>> {
        if self.fail_encrypt {
            anyhow::bail!("encryption refused");
        }
        lock(&self.encrypted_for).push(certificates.to_vec());

        let builder = certificates
            .iter()
            .fold(EnvelopeBuilder::new(), |builder, certificate| {
                builder.recipient(certificate)
            });
        let builder = unprotected_attributes
            .iter()
            .fold(builder, |builder, attribute| {
                builder.unauth_attribute(attribute.clone())
            });
        Ok(builder.build(bytes)?)
    }

    async fn decrypt(&self, card: &str, bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
        if self.fail_decrypt {
            anyhow::bail!("card '{card}' refused to decrypt");
        }
        Ok(vkim_cms::test_helpers::open(bytes)?)
    }

    async fn verify(&self, _: &str, _: &[u8]) -> anyhow::Result<VerificationReport> {
        Ok(self.verification.clone())
    }

    fn ecc_encryption_available(&self) -> bool {
        self.ecc
    }
}

/// A [`NameResolver`] answering from a map.
#[derive(Debug, Default)]
pub struct StaticResolver {
    records: std::collections::HashMap<String, Vec<std::net::Ipv4Addr>>,
    failing: bool,
}

impl StaticResolver {
    ///
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    ///
    #[must_use]
    pub fn with_record(mut self, name: &str, address: std::net::Ipv4Addr) -> Self {
        self.records
            .entry(name.to_string())
            .or_default()
            .push(address);
        self
    }

    /// every lookup fails as if the transport was down
    #[must_use]
    pub const fn failing(mut self) -> Self {
        self.failing = true;
        self
    }
}

#[async_trait::async_trait]
impl NameResolver for StaticResolver {
    async fn lookup_a(&self, name: &str) -> anyhow::Result<Vec<std::net::Ipv4Addr>> {
        if self.failing {
            anyhow::bail!("no route to the name server");
        }
        Ok(self.records.get(name).cloned().unwrap_or_default())
    }
}

/// One command received by a [`RecordingRelay`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayCommand {
    ///
    MailFrom(Address),
    ///
    RcptTo(Address),
    ///
    Data(Vec<u8>),
    ///
    Reset,
    ///
    Quit,
}

/// A [`Relay`] accepting everything but the recipients listed, and
/// recording the commands in a shared journal.
#[derive(Debug, Clone, Default)]
pub struct RecordingRelay {
    journal: std::sync::Arc<std::sync::Mutex<Vec<RelayCommand>>>,
    rejected: Vec<Address>,
    refuse_data: bool,
    broken: bool,
}

impl RecordingRelay {
    ///
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `RCPT TO` for `address` gets a 550
    #[must_use]
    pub fn rejecting(mut self, address: &Address) -> Self {
        self.rejected.push(address.clone());
        self
    }

    /// `DATA` gets a 554
    #[must_use]
    pub const fn refusing_data(mut self) -> Self {
        self.refuse_data = true;
        self
    }

    /// every command fails as if the connection was lost
    #[must_use]
    pub const fn broken(mut self) -> Self {
        self.broken = true;
        self
    }

    /// the commands received so far
    #[must_use]
    pub fn journal(&self) -> Vec<RelayCommand> {
        lock(&self.journal).clone()
    }

    /// the content of every `DATA`, in order
    #[must_use]
    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.journal()
            .into_iter()
            .filter_map(|command| match command {
                RelayCommand::Data(content) => Some(content),
                _ => None,
            })
            .collect()
    }

    fn record(&self, command: RelayCommand) -> anyhow::Result<()> {
        if self.broken {
            anyhow::bail!("connection reset by peer");
        }
        lock(&self.journal).push(command);
        Ok(())
    }

    /// as a backend of a session
    #[must_use]
    pub fn boxed(&self) -> Option<Box<dyn Relay>> {
        Some(Box::new(self.clone()))
    }
}

#[async_trait::async_trait]
impl Relay for RecordingRelay {
    async fn mail_from(&mut self, from: &Address) -> anyhow::Result<Reply> {
        self.record(RelayCommand::MailFrom(from.clone()))?;
        Ok(Reply::enhanced(250, "2.1.0", "Ok"))
    }

    async fn rcpt_to(&mut self, to: &Address) -> anyhow::Result<Reply> {
        self.record(RelayCommand::RcptTo(to.clone()))?;
        if self.rejected.contains(to) {
            return Ok(Reply::enhanced(550, "5.1.1", "Mailbox unavailable"));
        }
        Ok(Reply::enhanced(250, "2.1.5", "Ok"))
    }

    async fn data(&mut self, content: &[u8]) -> anyhow::Result<Reply> {
        self.record(RelayCommand::Data(content.to_vec()))?;
        if self.refuse_data {
            return Ok(Reply::enhanced(554, "5.6.0", "Message refused"));
        }
        Ok(Reply::enhanced(250, "2.0.0", "Ok: queued"))
    }

    async fn reset(&mut self) -> anyhow::Result<Reply> {
        self.record(RelayCommand::Reset)?;
        Ok(Reply::enhanced(250, "2.0.0", "Ok"))
    }

    async fn quit(&mut self) -> anyhow::Result<()> {
        self.record(RelayCommand::Quit)
    }
}

/// The collaborators of a test gateway.
#[must_use]
pub fn collaborators(
    directory: InMemoryDirectory,
    connector: InMemoryConnector,
    resolver: StaticResolver,
) -> (
    Collaborators,
    std::sync::Arc<InMemoryDirectory>,
    std::sync::Arc<InMemoryConnector>,
) {
    let directory = std::sync::Arc::new(directory);
    let connector = std::sync::Arc::new(connector);
    (
        Collaborators {
            directory: directory.clone(),
            connector: connector.clone(),
            resolver: std::sync::Arc::new(resolver),
        },
        directory,
        connector,
    )
}

/// A practitioner with a card in the directory
pub const ALICE: &str = "alice@praxis.kim.de";
/// A clinic, the connector holds its card
pub const BOB: &str = "bob@klinik.kim.de";

/// An rsa certificate bound to `email`, serials must differ across a test.
///
/// # Panics
///
/// * the certificate cannot be encoded
#[must_use]
pub fn certificate(email: &str, serial: u64, registration_number: &str) -> Vec<u8> {
    CertificateBuilder::new(email)
        .serial(serial)
        .email(email)
        .registration_number(registration_number)
        .build()
        .unwrap()
}

/// [`ALICE`] and [`BOB`] in the directory, the card of [`BOB`] in the
/// connector.
#[must_use]
pub fn practices(
    resolver: StaticResolver,
) -> (
    Collaborators,
    std::sync::Arc<InMemoryDirectory>,
    std::sync::Arc<InMemoryConnector>,
) {
    let alice = certificate(ALICE, 1, "1-20-ARZT-Alice");
    let bob = certificate(BOB, 2, "5-KLINIK-Bob");
    collaborators(
        InMemoryDirectory::new()
            .with_entry(ALICE, vec![alice], Some("1.5"))
            .with_entry(BOB, vec![bob.clone()], Some("1.5")),
        InMemoryConnector::new("smcb-bob", bob),
        resolver,
    )
}
