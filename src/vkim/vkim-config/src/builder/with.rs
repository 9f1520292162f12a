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

use super::{wants::*, Builder};
use crate::{BackendSecurity, FieldGatewayTls, LogFormat};

impl Builder<WantsVersion> {
    ///
    ///
    /// # Panics
    ///
    /// * CARGO_PKG_VERSION is not valid
    #[must_use]
    pub fn with_current_version(self) -> Builder<WantsGateway> {
        self.with_version_str(env!("CARGO_PKG_VERSION"))
            .expect("CARGO_PKG_VERSION is a valid version")
    }

    ///
    /// # Errors
    ///
    /// * `version_requirement` is not a valid semver requirement
    pub fn with_version_str(
        self,
        version_requirement: &str,
    ) -> Result<Builder<WantsGateway>, semver::Error> {
        Ok(Builder::<WantsGateway> {
            state: WantsGateway {
                parent: self.state,
                version_requirement: semver::VersionReq::parse(version_requirement)?,
            },
        })
    }
}

impl Builder<WantsGateway> {
    /// use the host name of the machine and the default banners
    #[must_use]
    pub fn with_hostname(self) -> Builder<WantsLimits> {
        self.with_gateway_info(&crate::FieldGateway::hostname())
    }

    ///
    #[must_use]
    pub fn with_gateway_info(self, domain: &str) -> Builder<WantsLimits> {
        self.with_gateway_info_and_greetings(
            domain,
            &crate::FieldGateway::default_greeting_smtp(),
            &crate::FieldGateway::default_greeting_pop3(),
        )
    }

    ///
    #[must_use]
    pub fn with_gateway_info_and_greetings(
        self,
        domain: &str,
        greeting_smtp: &str,
        greeting_pop3: &str,
    ) -> Builder<WantsLimits> {
        Builder::<WantsLimits> {
            state: WantsLimits {
                parent: self.state,
                domain: domain.to_string(),
                greeting_smtp: greeting_smtp.to_string(),
                greeting_pop3: greeting_pop3.to_string(),
            },
        }
    }
}

impl Builder<WantsLimits> {
    ///
    #[must_use]
    pub fn with_default_limits(self) -> Builder<WantsSmtp> {
        self.with_limits(
            crate::FieldGateway::default_client_count_max(),
            crate::FieldGateway::default_client_count_per_ip_max(),
            crate::FieldGateway::default_max_message_size(),
        )
    }

    /// -1 disables a connection limit
    #[allow(clippy::missing_const_for_fn)]
    #[must_use]
    pub fn with_limits(
        self,
        client_count_max: i64,
        client_count_per_ip_max: i64,
        max_message_size: usize,
    ) -> Builder<WantsSmtp> {
        Builder::<WantsSmtp> {
            state: WantsSmtp {
                parent: self.state,
                client_count_max,
                client_count_per_ip_max,
                max_message_size,
            },
        }
    }
}

impl Builder<WantsSmtp> {
    ///
    #[must_use]
    pub fn with_default_smtp(self) -> Builder<WantsPop3> {
        self.with_smtp_on(crate::FieldGatewaySmtp::default_addr())
    }

    ///
    #[must_use]
    pub fn with_smtp_on(self, addr: std::net::SocketAddr) -> Builder<WantsPop3> {
        self.with_smtp(
            addr,
            crate::FieldGatewaySmtp::default_idle_timeout(),
            crate::FieldGatewaySmtp::default_backend_security(),
        )
    }

    ///
    #[allow(clippy::missing_const_for_fn)]
    #[must_use]
    pub fn with_smtp(
        self,
        addr: std::net::SocketAddr,
        idle_timeout: std::time::Duration,
        backend_security: BackendSecurity,
    ) -> Builder<WantsPop3> {
        Builder::<WantsPop3> {
            state: WantsPop3 {
                parent: self.state,
                addr,
                idle_timeout,
                backend_security,
            },
        }
    }
}

impl Builder<WantsPop3> {
    ///
    #[must_use]
    pub fn with_default_pop3(self) -> Builder<WantsTls> {
        self.with_pop3_on(crate::FieldGatewayPop3::default_addr())
    }

    ///
    #[must_use]
    pub fn with_pop3_on(self, addr: std::net::SocketAddr) -> Builder<WantsTls> {
        self.with_pop3(
            addr,
            crate::FieldGatewayPop3::default_idle_timeout(),
            crate::FieldGatewayPop3::default_backend_security(),
        )
    }

    ///
    #[allow(clippy::missing_const_for_fn)]
    #[must_use]
    pub fn with_pop3(
        self,
        addr: std::net::SocketAddr,
        idle_timeout: std::time::Duration,
        backend_security: BackendSecurity,
    ) -> Builder<WantsTls> {
        Builder::<WantsTls> {
            state: WantsTls {
                parent: self.state,
                addr,
                idle_timeout,
                backend_security,
            },
        }
    }
}

impl Builder<WantsTls> {
    /// STARTTLS and STLS are not advertised
    #[must_use]
    pub fn without_tls(self) -> Builder<WantsConnector> {
        Builder::<WantsConnector> {
            state: WantsConnector {
                parent: self.state,
                tls: None,
            },
        }
    }

    ///
    #[must_use]
    pub fn with_tls(self, tls: FieldGatewayTls) -> Builder<WantsConnector> {
        Builder::<WantsConnector> {
            state: WantsConnector {
                parent: self.state,
                tls: Some(tls),
            },
        }
    }
}

impl Builder<WantsConnector> {
    ///
    #[must_use]
    pub fn with_connector(
        self,
        ecc_encryption_available: bool,
        sign_card_handle: Option<&str>,
    ) -> Builder<WantsDirectory> {
        Builder::<WantsDirectory> {
            state: WantsDirectory {
                parent: self.state,
                ecc_encryption_available,
                sign_card_handle: sign_card_handle.map(str::to_string),
            },
        }
    }
}

impl Builder<WantsDirectory> {
    ///
    #[must_use]
    pub fn with_default_directory(self) -> Builder<WantsLogs> {
        self.with_directory(&crate::FieldDirectory::default_search_base())
    }

    ///
    #[must_use]
    pub fn with_directory(self, search_base: &str) -> Builder<WantsLogs> {
        Builder::<WantsLogs> {
            state: WantsLogs {
                parent: self.state,
                search_base: search_base.to_string(),
            },
        }
    }
}

impl Builder<WantsLogs> {
    ///
    #[must_use]
    pub fn with_default_logs(self) -> Builder<WantsValidate> {
        self.with_logs(
            crate::FieldLogs::default_filepath(),
            &crate::FieldLogs::default_level(),
            None,
        )
    }

    /// no log file, no session log written to disk
    #[must_use]
    pub fn with_logs_to_stdout_only(self) -> Builder<WantsValidate> {
        self.with_logs(None, &crate::FieldLogs::default_level(), None)
    }

    ///
    #[must_use]
    pub fn with_logs(
        self,
        filepath: Option<std::path::PathBuf>,
        level: &str,
        session_dir: Option<std::path::PathBuf>,
    ) -> Builder<WantsValidate> {
        Builder::<WantsValidate> {
            state: WantsValidate {
                parent: self.state,
                filepath,
                level: level.to_string(),
                format: crate::FieldLogs::default_format(),
                session_dir,
            },
        }
    }
}

impl Builder<WantsValidate> {
    ///
    #[allow(clippy::missing_const_for_fn)]
    #[must_use]
    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.state.format = format;
        self
    }
}
