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

use crate::{FieldBackendTls, FieldGatewayTls};
use vkim_common::re::anyhow;

/// Build the configuration used for STARTTLS / STLS toward the clients
///
/// # Errors
///
/// * the private key does not match the certificate, or is not supported
pub fn get_rustls_config(config: &FieldGatewayTls) -> anyhow::Result<rustls::ServerConfig> {
    rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(
            vec![config.certificate.inner.clone()],
            config.private_key.inner.clone(),
        )
        .map_err(|e| anyhow::anyhow!("cannot build the tls configuration: {e}"))
}

/// Build the configuration used to reach the backends over tls
///
/// # Errors
///
/// * one of the configured root certificates is invalid
pub fn get_backend_client_config(config: &FieldBackendTls) -> anyhow::Result<rustls::ClientConfig> {
    let mut root_store = rustls::RootCertStore::empty();

    match &config.root_ca {
        Some(root_ca) => {
            for certificate in &root_ca.inner {
                root_store.add(certificate).map_err(|e| {
                    anyhow::anyhow!(
                        "invalid root certificate in '{}': {e:?}",
                        root_ca.path.display()
                    )
                })?;
            }
        }
        None => {
            root_store.add_server_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(
                |ta| {
                    rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                        ta.subject,
                        ta.spki,
                        ta.name_constraints,
                    )
                },
            ));
        }
    }

    Ok(rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth())
}

impl FieldGatewayTls {
    /// Build the section from PEM content (or paths to PEM files).
    ///
    /// # Errors
    ///
    /// * no certificate or no private key could be read
    pub fn from_pem(certificate: &str, private_key: &str) -> anyhow::Result<Self> {
        use serde::de::IntoDeserializer;

        let certificate = crate::parser::tls_certificate::deserialize(
            IntoDeserializer::<serde::de::value::Error>::into_deserializer(certificate),
        )?;
        let private_key = crate::parser::tls_private_key::deserialize(
            IntoDeserializer::<serde::de::value::Error>::into_deserializer(private_key),
        )?;

        Ok(Self {
            handshake_timeout: Self::default_handshake_timeout(),
            certificate,
            private_key,
        })
    }
}

impl FieldBackendTls {
    /// trust only the certificates of `root_ca` (PEM content or path)
    ///
    /// # Errors
    ///
    /// * no certificate could be read
    pub fn from_pem(root_ca: &str) -> anyhow::Result<Self> {
        Ok(Self {
            root_ca: Some(crate::parser::tls_certificate::load_chain::<
                serde::de::value::Error,
            >(root_ca)?),
        })
    }
}
