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

//! vKIM configuration

#![doc(html_no_source)]
#![deny(missing_docs)]
//
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
//
#![allow(clippy::doc_markdown)]

#[cfg(test)]
mod tests;

mod parser {
    pub mod log_level;
    pub mod semver;
    pub mod tls_certificate;
    pub mod tls_private_key;
}

/// builder with a typed state for each section
pub mod builder {
    mod validate;
    ///
    pub mod wants;
    ///
    pub mod with;

    /// Builder for the [`crate::Config`]
    pub struct Builder<State> {
        pub(crate) state: State,
    }
}

mod config;
mod default;
mod rustls_helper;

pub use builder::{wants::*, Builder};
pub use config::{
    BackendSecurity, Config, FieldBackendTls, FieldConnector, FieldDirectory, FieldGateway,
    FieldGatewayPop3, FieldGatewaySmtp, FieldGatewayTls, FieldLogs, LogFormat, TiMode, TlsFile,
};
pub use rustls_helper::{get_backend_client_config, get_rustls_config};

use vkim_common::re::anyhow;

impl Config {
    ///
    #[must_use]
    pub const fn builder() -> Builder<WantsVersion> {
        Builder {
            state: WantsVersion(()),
        }
    }

    /// Parse a [`Config`] with [TOML] format
    ///
    /// # Errors
    ///
    /// * data is not a valid [TOML]
    /// * one field is unknown
    /// * the version requirement are not fulfilled
    /// * a tls file cannot be read
    ///
    /// [TOML]: https://github.com/toml-lang/toml
    pub fn from_toml(input: &str) -> anyhow::Result<Self> {
        #[derive(serde::Deserialize)]
        struct VersionRequirement {
            #[serde(deserialize_with = "crate::parser::semver::deserialize")]
            version_requirement: semver::VersionReq,
        }

        let req = toml::from_str::<VersionRequirement>(input)?;
        let pkg_version = semver::Version::parse(env!("CARGO_PKG_VERSION"))?;

        if !req.version_requirement.matches(&pkg_version) {
            anyhow::bail!(
                "Version requirement not fulfilled: expected '{}' but got '{}'",
                req.version_requirement,
                env!("CARGO_PKG_VERSION")
            );
        }

        toml::from_str::<Self>(input)
            .map_err(anyhow::Error::new)
            .and_then(Builder::<WantsValidate>::ensure)
    }

    /// A configuration listening on ephemeral local ports, used by the tests
    /// and the benchmarks.
    ///
    /// # Panics
    ///
    /// * the builder's own defaults are not valid
    #[must_use]
    pub fn local_test() -> Self {
        let mut config = Self::builder()
            .with_current_version()
            .with_gateway_info("testserver.com")
            .with_default_limits()
            .with_smtp_on("127.0.0.1:0".parse().expect("valid address"))
            .with_pop3_on("127.0.0.1:0".parse().expect("valid address"))
            .without_tls()
            .with_connector(true, None)
            .with_default_directory()
            .with_logs_to_stdout_only()
            .validate()
            .expect("default configuration is valid");

        config.gateway.smtp.backend_security = BackendSecurity::Plain;
        config.gateway.pop3.backend_security = BackendSecurity::Plain;
        config
    }
}
