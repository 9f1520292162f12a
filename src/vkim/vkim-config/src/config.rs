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

use vkim_common::KimVersion;

///
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// semver requirement on the gateway's version
    #[serde(
        serialize_with = "crate::parser::semver::serialize",
        deserialize_with = "crate::parser::semver::deserialize"
    )]
    pub version_requirement: semver::VersionReq,
    ///
    #[serde(default)]
    pub gateway: FieldGateway,
    ///
    #[serde(default)]
    pub connector: FieldConnector,
    ///
    #[serde(default)]
    pub directory: FieldDirectory,
    ///
    #[serde(default)]
    pub logs: FieldLogs,
}

/// How the telematik infrastructure is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TiMode {
    /// messages are signed, encrypted, decrypted and verified
    Full,
    /// messages are relayed unchanged
    NoTi,
}

/// Transport used to reach the backend mail servers
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendSecurity {
    /// clear text, for tests and trusted networks
    Plain,
    /// implicit tls (smtps / pop3s)
    Tls,
    /// clear text upgraded with STARTTLS / STLS
    Starttls,
}

///
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldGateway {
    /// name used in the greetings and in the DSNs
    #[serde(default = "FieldGateway::hostname")]
    pub domain: String,
    ///
    #[serde(default = "FieldGateway::default_greeting_smtp")]
    pub greeting_smtp: String,
    ///
    #[serde(default = "FieldGateway::default_greeting_pop3")]
    pub greeting_pop3: String,
    /// -1 to disable the limit
    #[serde(default = "FieldGateway::default_client_count_max")]
    pub client_count_max: i64,
    /// -1 to disable the limit
    #[serde(default = "FieldGateway::default_client_count_per_ip_max")]
    pub client_count_per_ip_max: i64,
    /// version implemented by this gateway, compared with the directory entries
    #[serde(default = "FieldGateway::default_kim_version")]
    pub kim_version: KimVersion,
    ///
    #[serde(default = "FieldGateway::default_ti_mode")]
    pub ti_mode: TiMode,
    /// in bytes
    #[serde(default = "FieldGateway::default_max_message_size")]
    pub max_message_size: usize,
    ///
    #[serde(default)]
    pub smtp: FieldGatewaySmtp,
    ///
    #[serde(default)]
    pub pop3: FieldGatewayPop3,
    /// enables STARTTLS and STLS toward the clients
    pub tls: Option<FieldGatewayTls>,
    ///
    #[serde(default)]
    pub backend_tls: FieldBackendTls,
}

///
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldGatewaySmtp {
    ///
    #[serde(default = "FieldGatewaySmtp::default_addr")]
    pub addr: std::net::SocketAddr,
    /// maximum delay between two commands of the client
    #[serde(default = "FieldGatewaySmtp::default_idle_timeout")]
    #[serde(with = "humantime_serde")]
    pub idle_timeout: std::time::Duration,
    /// maximum delay for a reply of the backend
    #[serde(default = "FieldGatewaySmtp::default_backend_timeout")]
    #[serde(with = "humantime_serde")]
    pub backend_timeout: std::time::Duration,
    ///
    #[serde(default = "FieldGatewaySmtp::default_backend_security")]
    pub backend_security: BackendSecurity,
}

///
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldGatewayPop3 {
    ///
    #[serde(default = "FieldGatewayPop3::default_addr")]
    pub addr: std::net::SocketAddr,
    ///
    #[serde(default = "FieldGatewayPop3::default_idle_timeout")]
    #[serde(with = "humantime_serde")]
    pub idle_timeout: std::time::Duration,
    ///
    #[serde(default = "FieldGatewayPop3::default_backend_timeout")]
    #[serde(with = "humantime_serde")]
    pub backend_timeout: std::time::Duration,
    ///
    #[serde(default = "FieldGatewayPop3::default_backend_security")]
    pub backend_security: BackendSecurity,
}

/// A tls artifact, kept with the path it was read from
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(transparent)]
pub struct TlsFile<T> {
    ///
    #[serde(skip_serializing)]
    pub inner: T,
    ///
    pub path: std::path::PathBuf,
}

///
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldGatewayTls {
    ///
    #[serde(default = "FieldGatewayTls::default_handshake_timeout")]
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: std::time::Duration,
    /// path to a PEM file, or the PEM content itself
    #[serde(deserialize_with = "crate::parser::tls_certificate::deserialize")]
    pub certificate: TlsFile<rustls::Certificate>,
    /// path to a PEM file, or the PEM content itself
    #[serde(deserialize_with = "crate::parser::tls_private_key::deserialize")]
    pub private_key: TlsFile<rustls::PrivateKey>,
}

///
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldBackendTls {
    /// certificate authorities trusted for the backends, the webpki roots
    /// are used if not provided
    #[serde(default)]
    #[serde(deserialize_with = "crate::parser::tls_certificate::deserialize_opt_chain")]
    pub root_ca: Option<TlsFile<Vec<rustls::Certificate>>>,
}

///
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConnector {
    /// the connector can encrypt for elliptic-curve certificates
    #[serde(default = "FieldConnector::default_ecc_encryption_available")]
    pub ecc_encryption_available: bool,
    /// card used for signing, the first SMC-B with a verified pin otherwise
    #[serde(default)]
    pub sign_card_handle: Option<String>,
}

///
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDirectory {
    ///
    #[serde(default = "FieldDirectory::default_search_base")]
    pub search_base: String,
}

///
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// human readable
    Full,
    ///
    Json,
}

///
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldLogs {
    /// `None` to log on stdout only
    #[serde(default = "FieldLogs::default_filepath")]
    pub filepath: Option<std::path::PathBuf>,
    /// a `tracing_subscriber::EnvFilter` directive, `RUST_LOG` takes precedence
    #[serde(default = "FieldLogs::default_level")]
    #[serde(deserialize_with = "crate::parser::log_level::deserialize")]
    pub level: String,
    ///
    #[serde(default = "FieldLogs::default_format")]
    pub format: LogFormat,
    /// directory where the protocol log of each session is written
    #[serde(default)]
    pub session_dir: Option<std::path::PathBuf>,
    /// print the backend user names in the session logs
    #[serde(default)]
    pub personal_information: bool,
}
