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

//! vKIM security pipeline

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

/// the services the gateway depends on: directory, connector, name resolution
pub mod collaborator;
/// delivery status notifications
pub mod dsn;
/// format of the KIM envelopes
pub mod format;
/// certificate resolution of mail addresses
pub mod identity;
/// decryption and verification of the retrieved messages
pub mod inbound;
/// operations, their context and their registry
pub mod operation;
/// signature and encryption of the submitted messages
pub mod outbound;
/// the backend SMTP connection as seen by the pipeline
pub mod relay;

// NOTE: not marked as #[cfg(test)] because it is used by vkim-server and vkim-test
/// test doubles of the collaborators
pub mod test_helpers;

pub use collaborator::{
    Card, CardKind, Collaborators, Connector, Directory, DirectoryEntry, NameResolver, PinStatus,
    TrustDnsResolver, VerificationReport,
};
pub use identity::IdentityResolver;
pub use inbound::{InboundPipeline, Retrieved};
pub use operation::{execute_with, Operation, OperationContext, OperationRegistry};
pub use outbound::{OutboundEnvelope, OutboundPipeline, Outcome};
pub use relay::Relay;
