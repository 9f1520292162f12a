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

//! vKIM common definitions

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

mod address;
mod code;
mod error;
mod identity;
mod ledger;
mod reply;
mod version;

/// per-session protocol logs and their registry
pub mod logger;
/// raw message model and the few MIME helpers the gateway needs
pub mod message;

pub use address::Address;
pub use code::ErrorCode;
pub use error::GatewayError;
pub use identity::{CertificateIdentity, PractitionerIdResult, X509ErrorCode};
pub use ledger::{AddressErrorLedger, CodeLedger, MessageLedgers, RecipientRejectLedger};
pub use reply::Reply;
pub use version::KimVersion;

/// re-exported crates, so that every member of the workspace uses the same version
pub mod re {
    pub use anyhow;
    pub use base64;
    pub use strum;
    pub use time;
    pub use tracing;
    pub use uuid;
}
