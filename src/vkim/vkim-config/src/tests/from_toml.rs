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

use crate::{BackendSecurity, Config, LogFormat, TiMode};
use vkim_common::KimVersion;

#[test]
fn minimal() {
    let config = Config::from_toml(&format!(
        "version_requirement = \">={}\"\n",
        env!("CARGO_PKG_VERSION")
    ))
    .unwrap();

    pretty_assertions::assert_eq!(config.gateway.kim_version, KimVersion::V1_5Plus);
    pretty_assertions::assert_eq!(config.gateway.ti_mode, TiMode::Full);
    pretty_assertions::assert_eq!(config.gateway.client_count_max, 64);
    pretty_assertions::assert_eq!(config.gateway.smtp.backend_security, BackendSecurity::Tls);
    pretty_assertions::assert_eq!(config.logs.format, LogFormat::Full);
    assert!(config.gateway.tls.is_none());
    assert!(config.connector.ecc_encryption_available);
}

#[test]
fn full() {
    let config = Config::from_toml(&format!(
        r#"
version_requirement = ">={}"

[gateway]
domain = "kim.example.de"
greeting_smtp = "KIM SMTP ready"
client_count_max = -1
client_count_per_ip_max = 4
kim_version = "1.5"
ti_mode = "no-ti"

[gateway.smtp]
addr = "0.0.0.0:465"
idle_timeout = "1m"
backend_security = "starttls"

[gateway.pop3]
addr = "0.0.0.0:995"
backend_timeout = "10s"
backend_security = "plain"

[connector]
ecc_encryption_available = false
sign_card_handle = "SMC-B-14"

[directory]
search_base = "dc=test"

[logs]
level = "vkim=debug,info"
format = "json"
session_dir = "/tmp/vkim"
personal_information = true
"#,
        env!("CARGO_PKG_VERSION")
    ))
    .unwrap();

    pretty_assertions::assert_eq!(config.gateway.domain, "kim.example.de");
    pretty_assertions::assert_eq!(config.gateway.greeting_smtp, "KIM SMTP ready");
    pretty_assertions::assert_eq!(config.gateway.client_count_max, -1);
    pretty_assertions::assert_eq!(config.gateway.kim_version, KimVersion::V1_5);
    pretty_assertions::assert_eq!(config.gateway.ti_mode, TiMode::NoTi);
    pretty_assertions::assert_eq!(
        config.gateway.smtp.idle_timeout,
        std::time::Duration::from_secs(60)
    );
    pretty_assertions::assert_eq!(
        config.gateway.smtp.backend_security,
        BackendSecurity::Starttls
    );
    pretty_assertions::assert_eq!(
        config.gateway.pop3.backend_timeout,
        std::time::Duration::from_secs(10)
    );
    pretty_assertions::assert_eq!(
        config.connector.sign_card_handle.as_deref(),
        Some("SMC-B-14")
    );
    pretty_assertions::assert_eq!(config.directory.search_base, "dc=test");
    pretty_assertions::assert_eq!(config.logs.format, LogFormat::Json);
    assert!(config.logs.personal_information);
}

#[test]
fn unknown_field() {
    assert!(Config::from_toml(&format!(
        "version_requirement = \">={}\"\n[gateway]\nfoo = 1\n",
        env!("CARGO_PKG_VERSION")
    ))
    .is_err());
}

#[test]
fn version_not_fulfilled() {
    assert!(Config::from_toml("version_requirement = \"<0.1.0\"\n").is_err());
}

#[test]
fn invalid_log_level() {
    assert!(Config::from_toml(&format!(
        "version_requirement = \">={}\"\n[logs]\nlevel = \"vkim=loud\"\n",
        env!("CARGO_PKG_VERSION")
    ))
    .is_err());
}

#[test]
fn per_ip_above_global() {
    assert!(Config::from_toml(&format!(
        "version_requirement = \">={}\"\n[gateway]\nclient_count_max = 2\nclient_count_per_ip_max = 3\n",
        env!("CARGO_PKG_VERSION")
    ))
    .is_err());
}
