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

use crate::config::{
    BackendSecurity, FieldConnector, FieldDirectory, FieldGateway, FieldGatewayPop3,
    FieldGatewaySmtp, FieldGatewayTls, FieldLogs, LogFormat, TiMode,
};
use vkim_common::KimVersion;

impl Default for FieldGateway {
    fn default() -> Self {
        Self {
            domain: Self::hostname(),
            greeting_smtp: Self::default_greeting_smtp(),
            greeting_pop3: Self::default_greeting_pop3(),
            client_count_max: Self::default_client_count_max(),
            client_count_per_ip_max: Self::default_client_count_per_ip_max(),
            kim_version: Self::default_kim_version(),
            ti_mode: Self::default_ti_mode(),
            max_message_size: Self::default_max_message_size(),
            smtp: FieldGatewaySmtp::default(),
            pop3: FieldGatewayPop3::default(),
            tls: None,
            backend_tls: crate::FieldBackendTls::default(),
        }
    }
}

impl FieldGateway {
    pub(crate) fn hostname() -> String {
        hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub(crate) fn default_greeting_smtp() -> String {
        "vKIM ESMTP KIM Clientmodul".to_string()
    }

    pub(crate) fn default_greeting_pop3() -> String {
        "vKIM POP3 KIM Clientmodul".to_string()
    }

    pub(crate) const fn default_client_count_max() -> i64 {
        64
    }

    pub(crate) const fn default_client_count_per_ip_max() -> i64 {
        16
    }

    pub(crate) const fn default_kim_version() -> KimVersion {
        KimVersion::V1_5Plus
    }

    pub(crate) const fn default_ti_mode() -> TiMode {
        TiMode::Full
    }

    pub(crate) const fn default_max_message_size() -> usize {
        // 500 MiB, the upper bound of the profile
        500 * 1024 * 1024
    }
}

impl Default for FieldGatewaySmtp {
    fn default() -> Self {
        Self {
            addr: Self::default_addr(),
            idle_timeout: Self::default_idle_timeout(),
            backend_timeout: Self::default_backend_timeout(),
            backend_security: Self::default_backend_security(),
        }
    }
}

impl FieldGatewaySmtp {
    pub(crate) fn default_addr() -> std::net::SocketAddr {
        std::net::SocketAddr::new(std::net::Ipv4Addr::LOCALHOST.into(), 10025)
    }

    pub(crate) const fn default_idle_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(5 * 60)
    }

    pub(crate) const fn default_backend_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(30)
    }

    pub(crate) const fn default_backend_security() -> BackendSecurity {
        BackendSecurity::Tls
    }
}

impl Default for FieldGatewayPop3 {
    fn default() -> Self {
        Self {
            addr: Self::default_addr(),
            idle_timeout: Self::default_idle_timeout(),
            backend_timeout: Self::default_backend_timeout(),
            backend_security: Self::default_backend_security(),
        }
    }
}

impl FieldGatewayPop3 {
    pub(crate) fn default_addr() -> std::net::SocketAddr {
        std::net::SocketAddr::new(std::net::Ipv4Addr::LOCALHOST.into(), 10110)
    }

    pub(crate) const fn default_idle_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(10 * 60)
    }

    pub(crate) const fn default_backend_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(30)
    }

    pub(crate) const fn default_backend_security() -> BackendSecurity {
        BackendSecurity::Tls
    }
}

impl FieldGatewayTls {
    pub(crate) const fn default_handshake_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(1)
    }
}

impl Default for FieldConnector {
    fn default() -> Self {
        Self {
            ecc_encryption_available: Self::default_ecc_encryption_available(),
            sign_card_handle: None,
        }
    }
}

impl FieldConnector {
    pub(crate) const fn default_ecc_encryption_available() -> bool {
        true
    }
}

impl Default for FieldDirectory {
    fn default() -> Self {
        Self {
            search_base: Self::default_search_base(),
        }
    }
}

impl FieldDirectory {
    pub(crate) fn default_search_base() -> String {
        "dc=data,dc=vzd".to_string()
    }
}

impl Default for FieldLogs {
    fn default() -> Self {
        Self {
            filepath: Self::default_filepath(),
            level: Self::default_level(),
            format: Self::default_format(),
            session_dir: None,
            personal_information: false,
        }
    }
}

impl FieldLogs {
    pub(crate) fn default_filepath() -> Option<std::path::PathBuf> {
        Some("/var/log/vkim/vkim.log".into())
    }

    pub(crate) fn default_level() -> String {
        "info".to_string()
    }

    pub(crate) const fn default_format() -> LogFormat {
        LogFormat::Full
    }
}
