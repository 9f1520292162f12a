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

//! vKIM server

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

mod account;
/// clients of the mail servers behind the gateway
pub mod backend;
mod connection;
/// the POP3 side of the gateway
pub mod pop3;
mod server;
mod session;
/// the SMTP side of the gateway
pub mod smtp;

// NOTE: not marked as #[cfg(test)] because it is used by vkim-test
/// boilerplate for the tests
pub mod test_helpers;

pub use account::BackendAccount;
pub use connection::{AbstractIO, Connection, Io};
pub use server::ServerVKIM;
pub use session::{Gateway, SessionState, TransportSession};

/// re-exported dependencies
pub mod re {
    pub use tokio;
    pub use tokio_rustls;
}
