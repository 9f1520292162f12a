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

use crate::test_helpers::{pipeline_doubles, run_session, test_gateway};
use vkim_common::{logger::SessionKind, re::base64};
use vkim_config::Config;

mod auth;

pub const GREETING: &str = "220 testserver.com vKIM ESMTP KIM Clientmodul\r\n";
pub const EHLO_REPLY: &str = "250-testserver.com Hello client.praxis.kim.de [127.0.0.1])\r\n\
    250-SIZE 524288000\r\n\
    250-AUTH LOGIN PLAIN\r\n\
    250-8BITMIME\r\n\
    250 ENHANCEDSTATUSCODES\r\n";
pub const CLOSING: &str = "221 2.0.0 testserver.com Service closing transmission channel\r\n";

pub fn auth_plain(login: &str, password: &str) -> String {
    format!(
        "AUTH PLAIN {}\r\n",
        base64::encode(format!("\0{login}\0{password}"))
    )
}

/// run a session and check it was cleaned up
pub async fn smtp(config: Config, input: &str) -> String {
    let gateway = test_gateway(config, pipeline_doubles());
    let (result, output) = run_session(SessionKind::Smtp, gateway.clone(), input.as_bytes()).await;
    result.unwrap();
    assert!(gateway.loggers.is_empty());
    output
}

#[tokio::test]
async fn greeting_and_quit() {
    pretty_assertions::assert_eq!(
        smtp(Config::local_test(), "QUIT\r\n").await,
        [GREETING, CLOSING].concat()
    );
}

#[tokio::test]
async fn client_leaves_without_quit() {
    pretty_assertions::assert_eq!(
        smtp(Config::local_test(), "NOOP\r\n").await,
        [GREETING, "250 2.0.0 OK\r\n"].concat()
    );
}

#[tokio::test]
async fn helo() {
    pretty_assertions::assert_eq!(
        smtp(
            Config::local_test(),
            "HELO\r\nEHLO\r\nHELO client.praxis.kim.de\r\nEHLO client.praxis.kim.de\r\nQUIT\r\n"
        )
        .await,
        [
            GREETING,
            "501 5.5.4 Syntax: HELO hostname\r\n",
            "501 5.5.4 Syntax: EHLO hostname\r\n",
            "250 testserver.com Hello client.praxis.kim.de [127.0.0.1])\r\n",
            EHLO_REPLY,
            CLOSING
        ]
        .concat()
    );
}

#[tokio::test]
async fn unknown_and_malformed_commands() {
    pretty_assertions::assert_eq!(
        smtp(
            Config::local_test(),
            "VRFY bob\r\nRSET now\r\nRSET\r\nSTARTTLS\r\nQUIT\r\n"
        )
        .await,
        [
            GREETING,
            "500 5.5.2 Syntax error, command unrecognized\r\n",
            "501 5.5.4 Syntax error in parameters or arguments\r\n",
            "250 2.0.0 OK\r\n",
            "454 4.7.0 TLS not available\r\n",
            CLOSING
        ]
        .concat()
    );
}

#[tokio::test]
async fn transaction_requires_authentication() {
    pretty_assertions::assert_eq!(
        smtp(
            Config::local_test(),
            "EHLO client.praxis.kim.de\r\n\
            MAIL FROM:<alice@praxis.kim.de>\r\n\
            RCPT TO:<bob@klinik.kim.de>\r\n\
            DATA\r\n\
            QUIT\r\n"
        )
        .await,
        [
            GREETING,
            EHLO_REPLY,
            "530 5.7.0 Authentication required\r\n",
            "530 5.7.0 Authentication required\r\n",
            "530 5.7.0 Authentication required\r\n",
            CLOSING
        ]
        .concat()
    );
}

#[tokio::test]
async fn idle_timeout() {
    let mut config = Config::local_test();
    config.gateway.smtp.idle_timeout = std::time::Duration::from_millis(50);
    let gateway = test_gateway(config, pipeline_doubles());

    let (client, server) = tokio::io::duplex(1024);
    let conn = crate::Connection::new(
        SessionKind::Smtp,
        crate::test_helpers::CLIENT_ADDR.parse().unwrap(),
        gateway.config.clone(),
        server,
    );
    let session = tokio::spawn(super::handle_connection(conn, gateway));

    let mut client = crate::AbstractIO::new(client);
    let timeout = std::time::Duration::from_secs(5);
    pretty_assertions::assert_eq!(
        client.next_line(timeout).await.unwrap(),
        GREETING.trim_end()
    );
    pretty_assertions::assert_eq!(
        client.next_line(timeout).await.unwrap(),
        "421 4.4.2 testserver.com Idle timeout, closing connection"
    );
    session.await.unwrap().unwrap();
}
