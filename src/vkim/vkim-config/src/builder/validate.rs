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

use super::{wants::WantsValidate, Builder};
use crate::{
    Config, FieldBackendTls, FieldConnector, FieldDirectory, FieldGateway, FieldGatewayPop3,
    FieldGatewaySmtp, FieldLogs,
};
use vkim_common::re::anyhow;

impl Builder<WantsValidate> {
    ///
    ///
    /// # Errors
    ///
    /// * the resulting configuration is not coherent, see [`Self::ensure`]
    pub fn validate(self) -> anyhow::Result<Config> {
        let logs = self.state;
        let directory = logs.parent;
        let connector = directory.parent;
        let tls = connector.parent;
        let pop3 = tls.parent;
        let smtp = pop3.parent;
        let limits = smtp.parent;
        let gateway = limits.parent;
        let version = gateway.parent;

        Self::ensure(Config {
            version_requirement: version.version_requirement,
            gateway: FieldGateway {
                domain: gateway.domain,
                greeting_smtp: gateway.greeting_smtp,
                greeting_pop3: gateway.greeting_pop3,
                client_count_max: limits.client_count_max,
                client_count_per_ip_max: limits.client_count_per_ip_max,
                kim_version: FieldGateway::default_kim_version(),
                ti_mode: FieldGateway::default_ti_mode(),
                max_message_size: limits.max_message_size,
                smtp: FieldGatewaySmtp {
                    addr: smtp.addr,
                    idle_timeout: smtp.idle_timeout,
                    backend_timeout: FieldGatewaySmtp::default_backend_timeout(),
                    backend_security: smtp.backend_security,
                },
                pop3: FieldGatewayPop3 {
                    addr: pop3.addr,
                    idle_timeout: pop3.idle_timeout,
                    backend_timeout: FieldGatewayPop3::default_backend_timeout(),
                    backend_security: pop3.backend_security,
                },
                tls: tls.tls,
                backend_tls: FieldBackendTls::default(),
            },
            connector: FieldConnector {
                ecc_encryption_available: connector.ecc_encryption_available,
                sign_card_handle: connector.sign_card_handle,
            },
            directory: FieldDirectory {
                search_base: directory.search_base,
            },
            logs: FieldLogs {
                filepath: logs.filepath,
                level: logs.level,
                format: logs.format,
                session_dir: logs.session_dir,
                personal_information: false,
            },
        })
    }

    /// Check the invariants a deserialized configuration cannot express.
    ///
    /// # Errors
    ///
    /// * a connection limit is lower than -1
    /// * the per-ip limit is higher than the global limit
    /// * `max_message_size` is zero
    /// * smtp and pop3 listen on the same fixed address
    pub(crate) fn ensure(config: Config) -> anyhow::Result<Config> {
        let gateway = &config.gateway;
        anyhow::ensure!(
            gateway.client_count_max >= -1 && gateway.client_count_per_ip_max >= -1,
            "connection limits must be -1 (unlimited) or positive"
        );
        anyhow::ensure!(
            gateway.client_count_max == -1
                || gateway.client_count_per_ip_max == -1
                || gateway.client_count_per_ip_max <= gateway.client_count_max,
            "'client_count_per_ip_max' ({}) is greater than 'client_count_max' ({})",
            gateway.client_count_per_ip_max,
            gateway.client_count_max
        );
        anyhow::ensure!(
            gateway.max_message_size > 0,
            "'max_message_size' must not be zero"
        );
        anyhow::ensure!(
            gateway.smtp.addr.port() == 0 || gateway.smtp.addr != gateway.pop3.addr,
            "smtp and pop3 cannot listen on the same address '{}'",
            gateway.smtp.addr
        );
        Ok(config)
    }
}
