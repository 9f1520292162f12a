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

use crate::{BackendSecurity, FieldGatewayTls, LogFormat};

///
pub struct WantsVersion(pub(crate) ());

///
pub struct WantsGateway {
    #[allow(dead_code)]
    pub(crate) parent: WantsVersion,
    pub(super) version_requirement: semver::VersionReq,
}

///
pub struct WantsLimits {
    pub(crate) parent: WantsGateway,
    pub(super) domain: String,
    pub(super) greeting_smtp: String,
    pub(super) greeting_pop3: String,
}

///
pub struct WantsSmtp {
    pub(crate) parent: WantsLimits,
    pub(super) client_count_max: i64,
    pub(super) client_count_per_ip_max: i64,
    pub(super) max_message_size: usize,
}

///
pub struct WantsPop3 {
    pub(crate) parent: WantsSmtp,
    pub(super) addr: std::net::SocketAddr,
    pub(super) idle_timeout: std::time::Duration,
    pub(super) backend_security: BackendSecurity,
}

///
pub struct WantsTls {
    pub(crate) parent: WantsPop3,
    pub(super) addr: std::net::SocketAddr,
    pub(super) idle_timeout: std::time::Duration,
    pub(super) backend_security: BackendSecurity,
}

///
pub struct WantsConnector {
    pub(crate) parent: WantsTls,
    pub(super) tls: Option<FieldGatewayTls>,
}

///
pub struct WantsDirectory {
    pub(crate) parent: WantsConnector,
    pub(super) ecc_encryption_available: bool,
    pub(super) sign_card_handle: Option<String>,
}

///
pub struct WantsLogs {
    pub(crate) parent: WantsDirectory,
    pub(super) search_base: String,
}

///
pub struct WantsValidate {
    pub(crate) parent: WantsLogs,
    pub(super) filepath: Option<std::path::PathBuf>,
    pub(super) level: String,
    pub(super) format: LogFormat,
    pub(super) session_dir: Option<std::path::PathBuf>,
}
