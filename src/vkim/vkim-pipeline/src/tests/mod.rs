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
    test_helpers::{practices, InMemoryConnector, InMemoryDirectory, StaticResolver},
    Collaborators, OperationRegistry,
};
use vkim_common::{
    logger::{LoggerContext, LoggerRegistry, SessionKind},
    message::RawMessage,
    Address, CertificateIdentity,
};
use vkim_config::Config;

mod format;
mod operation;

pub use crate::test_helpers::{certificate, ALICE, BOB};

pub const CAROL: &str = "carol@apotheke.kim.de";

pub fn addr(address: &str) -> Address {
    Address::new(address).unwrap()
}

pub fn context() -> LoggerContext {
    LoggerContext::new(LoggerRegistry::new(None).create(SessionKind::Smtp), true)
}

/// a directory knowing alice and bob, a connector holding the card of bob
pub fn gateway() -> (
    Collaborators,
    std::sync::Arc<InMemoryDirectory>,
    std::sync::Arc<InMemoryConnector>,
) {
    practices(StaticResolver::new())
}

pub fn registry(collaborators: &Collaborators, config: &Config) -> std::sync::Arc<OperationRegistry> {
    let registry = OperationRegistry::builtin(collaborators, config);
    registry.validate().unwrap();
    std::sync::Arc::new(registry)
}

pub fn identity(address: &str, certificate: Vec<u8>) -> CertificateIdentity {
    let mut identity = CertificateIdentity::new(addr(address));
    identity.certificates = vec![certificate];
    identity
}

/// the outer message of a KIM envelope from alice to bob sealing `envelope`
pub fn kim_message(envelope: &[u8]) -> RawMessage {
    let checked = RawMessage::parse(
        format!("From: {ALICE}\r\nTo: {BOB}\r\nSubject: Befund\r\n\r\nHallo\r\n").as_bytes(),
    );
    crate::outbound::compose(&checked, envelope, &Config::local_test()).unwrap()
}
