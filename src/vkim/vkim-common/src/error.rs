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

/// Failures surfaced by the gateway's core.
///
/// The first four variants are recoverable at message granularity (DSN and
/// soft-deny), except `MalformedEnvelope` which is fatal to the message.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// the wire format violates the expected binary grammar
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    /// directory, version or practitioner-id ambiguity for an address
    #[error("identity resolution failed for '{address}': {reason}")]
    IdentityResolutionFailed {
        /// first address that could not be resolved
        address: String,
        ///
        reason: String,
    },
    /// sign, encrypt, decrypt or verify failed
    #[error("security transform failed: {0}")]
    SecurityTransformFailed(String),
    /// a sender or a recipient was refused by policy
    #[error("rejected '{address}': {reason}")]
    ProtocolReject {
        ///
        address: String,
        ///
        reason: String,
    },
    /// a caller broke the contract of an operation
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// no operation registered under this key
    #[error("operation '{vendor}.{name}' not found")]
    NotFound {
        ///
        vendor: String,
        ///
        name: String,
    },
    /// more than one operation registered under this key
    #[error("operation '{vendor}.{name}' is registered {count} times")]
    AmbiguousOperation {
        ///
        vendor: String,
        ///
        name: String,
        ///
        count: usize,
    },
    /// the connection with the backend server is gone, the session cannot go on
    #[error("backend connection lost: {0}")]
    BackendLost(anyhow::Error),
    /// a collaborator (directory, connector, resolver, backend) failed
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl GatewayError {
    /// shorthand used by the identity resolver
    #[must_use]
    pub fn identity(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IdentityResolutionFailed {
            address: address.into(),
            reason: reason.into(),
        }
    }
}
