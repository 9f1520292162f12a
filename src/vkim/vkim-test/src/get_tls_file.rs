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

use vkim_config::{Config, FieldBackendTls, FieldGatewayTls};
use vkim_server::re::tokio_rustls;

/// certificate of `testserver.com`, issued by [`get_root_ca`]
#[must_use]
pub const fn get_certificate() -> &'static str {
    include_str!("../certs/server.crt")
}

/// private key of [`get_certificate`]
#[must_use]
pub const fn get_private_key() -> &'static str {
    include_str!("../certs/server.key")
}

/// the test certificate authority
#[must_use]
pub const fn get_root_ca() -> &'static str {
    include_str!("../certs/ca.crt")
}

/// [`Config::local_test`] offering STARTTLS and STLS with the test certificate
///
/// # Panics
///
/// * the test certificate cannot be loaded
#[must_use]
pub fn local_test_with_tls() -> Config {
    let mut config = Config::local_test();
    config.gateway.tls =
        Some(FieldGatewayTls::from_pem(get_certificate(), get_private_key()).unwrap());
    config
}

/// a client trusting only the test certificate authority
///
/// # Panics
///
/// * the test certificate authority cannot be loaded
#[must_use]
pub fn get_tls_connector() -> tokio_rustls::TlsConnector {
    let config =
        vkim_config::get_backend_client_config(&FieldBackendTls::from_pem(get_root_ca()).unwrap())
            .unwrap();
    tokio_rustls::TlsConnector::from(std::sync::Arc::new(config))
}
