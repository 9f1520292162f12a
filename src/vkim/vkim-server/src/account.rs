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

use vkim_common::GatewayError;

/// The backend account encoded in the user name given by a client:
/// `user#host:port#mandantId#clientSystemId#workplaceId[#userId][#konnektorId]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendAccount {
    /// user name on the backend, usually the mail address
    pub user: String,
    /// host name or ip address of the backend
    pub host: String,
    ///
    pub port: u16,
    /// connector context
    pub mandant_id: String,
    /// connector context
    pub client_system_id: String,
    /// connector context
    pub workplace_id: String,
    /// connector context
    pub user_id: Option<String>,
    ///
    pub konnektor_id: Option<String>,
}

impl BackendAccount {
    /// Parse the user name given by a client.
    ///
    /// # Errors
    ///
    /// * a mandatory part is missing or empty
    /// * the port is not a number
    /// * there are more than seven parts
    pub fn parse(login: &str) -> Result<Self, GatewayError> {
        let invalid = |reason: &str| {
            GatewayError::InvalidArgument(format!("invalid account '{login}': {reason}"))
        };

        let parts = login.trim().split('#').collect::<Vec<_>>();
        if parts.len() < 5 {
            return Err(invalid("expected at least five parts separated by '#'"));
        }
        if parts.len() > 7 {
            return Err(invalid("expected at most seven parts separated by '#'"));
        }
        if parts[..5].iter().any(|part| part.is_empty()) {
            return Err(invalid("empty part"));
        }

        let (host, port) = parts[1]
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected 'host:port'"))?;
        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| invalid(&format!("port: {e}")))?;

        let optional = |idx: usize| {
            parts
                .get(idx)
                .filter(|part| !part.is_empty())
                .map(|part| (*part).to_string())
        };

        Ok(Self {
            user: parts[0].to_string(),
            host: host.to_string(),
            port,
            mandant_id: parts[2].to_string(),
            client_system_id: parts[3].to_string(),
            workplace_id: parts[4].to_string(),
            user_id: optional(5),
            konnektor_id: optional(6),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::BackendAccount;

    #[test]
    fn mandatory_parts() {
        pretty_assertions::assert_eq!(
            BackendAccount::parse("bob@klinik.kim.de#mail.kim.de:465#m1#cs1#wp1").unwrap(),
            BackendAccount {
                user: "bob@klinik.kim.de".to_string(),
                host: "mail.kim.de".to_string(),
                port: 465,
                mandant_id: "m1".to_string(),
                client_system_id: "cs1".to_string(),
                workplace_id: "wp1".to_string(),
                user_id: None,
                konnektor_id: None,
            }
        );
    }

    #[test]
    fn optional_parts() {
        let account =
            BackendAccount::parse("bob#10.0.0.1:995#m1#cs1#wp1#u1#konnektor-2").unwrap();
        pretty_assertions::assert_eq!(account.host, "10.0.0.1");
        pretty_assertions::assert_eq!(account.user_id.as_deref(), Some("u1"));
        pretty_assertions::assert_eq!(account.konnektor_id.as_deref(), Some("konnektor-2"));

        let account = BackendAccount::parse("bob#10.0.0.1:995#m1#cs1#wp1##konnektor-2").unwrap();
        pretty_assertions::assert_eq!(account.user_id, None);
        pretty_assertions::assert_eq!(account.konnektor_id.as_deref(), Some("konnektor-2"));
    }

    #[test]
    fn ipv6_host() {
        let account = BackendAccount::parse("bob#::1:110#m#c#w").unwrap();
        pretty_assertions::assert_eq!(account.host, "::1");
        pretty_assertions::assert_eq!(account.port, 110);
    }

    #[test]
    fn invalid() {
        for login in [
            "",
            "bob",
            "bob#mail.kim.de:465#m1#cs1",
            "bob#mail.kim.de#m1#cs1#wp1",
            "bob#mail.kim.de:port#m1#cs1#wp1",
            "bob#:465#m1#cs1#wp1",
            "bob#mail.kim.de:465##cs1#wp1",
            "bob#mail.kim.de:465#m1#cs1#wp1#u1#k1#extra",
        ] {
            assert!(BackendAccount::parse(login).is_err(), "{login}");
        }
    }
}
