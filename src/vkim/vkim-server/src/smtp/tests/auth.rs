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

use super::{auth_plain, smtp, CLOSING, EHLO_REPLY, GREETING};
use crate::test_helpers::{account, FakeSmtpServer, BACKEND_PASSWORD};
use vkim_common::re::base64;
use vkim_config::Config;
use vkim_pipeline::test_helpers::ALICE;

#[tokio::test]
async fn plain() {
    let backend = FakeSmtpServer::start(&[]).await;
    let login = account(ALICE, backend.port());

    pretty_assertions::assert_eq!(
        smtp(
            Config::local_test(),
            &[
                "EHLO client.praxis.kim.de\r\n",
                auth_plain(&login, BACKEND_PASSWORD).as_str(),
                auth_plain(&login, BACKEND_PASSWORD).as_str(),
                "QUIT\r\n"
            ]
            .concat()
        )
        .await,
        [
            GREETING,
            EHLO_REPLY,
            "235 2.7.0 Authentication successful\r\n",
            "503 5.5.1 Already authenticated\r\n",
            CLOSING
        ]
        .concat()
    );

    let commands = backend.commands();
    pretty_assertions::assert_eq!(commands[0], "EHLO testserver.com");
    pretty_assertions::assert_eq!(commands[1], "AUTH LOGIN");
    // the backend is closed with the session
    pretty_assertions::assert_eq!(commands.last().map(String::as_str), Some("QUIT"));
}

#[tokio::test]
async fn login() {
    let backend = FakeSmtpServer::start(&[]).await;
    let login = account(ALICE, backend.port());

    pretty_assertions::assert_eq!(
        smtp(
            Config::local_test(),
            &[
                "EHLO client.praxis.kim.de\r\n".to_string(),
                "AUTH LOGIN\r\n".to_string(),
                format!("{}\r\n", base64::encode(&login)),
                format!("{}\r\n", base64::encode(BACKEND_PASSWORD)),
                "QUIT\r\n".to_string(),
            ]
            .concat()
        )
        .await,
        [
            GREETING,
            EHLO_REPLY,
            "334 VXNlcm5hbWU6\r\n",
            "334 UGFzc3dvcmQ6\r\n",
            "235 2.7.0 Authentication successful\r\n",
            CLOSING
        ]
        .concat()
    );
}

#[tokio::test]
async fn wrong_password() {
    let backend = FakeSmtpServer::start(&[]).await;

    pretty_assertions::assert_eq!(
        smtp(
            Config::local_test(),
            &[
                auth_plain(&account(ALICE, backend.port()), "guess").as_str(),
                "MAIL FROM:<alice@praxis.kim.de>\r\n",
            ]
            .concat()
        )
        .await,
        [
            GREETING,
            "535 5.7.8 Authentication credentials invalid\r\n",
            "530 5.7.0 Authentication required\r\n",
        ]
        .concat()
    );
}

#[tokio::test]
async fn malformed_login() {
    pretty_assertions::assert_eq!(
        smtp(
            Config::local_test(),
            &[
                auth_plain("alice@praxis.kim.de", BACKEND_PASSWORD),
                auth_plain("alice#mail.klinik.kim.de#m#c", BACKEND_PASSWORD),
            ]
            .concat()
        )
        .await,
        [
            GREETING,
            "535 5.7.8 Authentication credentials invalid\r\n",
            "535 5.7.8 Authentication credentials invalid\r\n",
        ]
        .concat()
    );
}

#[tokio::test]
async fn backend_unreachable() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    pretty_assertions::assert_eq!(
        smtp(
            Config::local_test(),
            &[
                auth_plain(&account(ALICE, port), BACKEND_PASSWORD),
                // not in the name resolution
                auth_plain(
                    &format!("{ALICE}#mail.unknown.kim.de:25#m#c#w"),
                    BACKEND_PASSWORD
                ),
            ]
            .concat()
        )
        .await,
        [
            GREETING,
            "454 4.7.0 Temporary authentication failure\r\n",
            "454 4.7.0 Temporary authentication failure\r\n",
        ]
        .concat()
    );
}

#[tokio::test]
async fn mechanisms() {
    pretty_assertions::assert_eq!(
        smtp(
            Config::local_test(),
            "AUTH CRAM-MD5\r\n\
            AUTH LOGIN\r\n*\r\n\
            AUTH PLAIN\r\n*\r\n\
            AUTH PLAIN not-base64!\r\n\
            AUTH PLAIN dXNlcg==\r\n"
        )
        .await,
        [
            GREETING,
            "504 5.5.4 Unrecognized authentication type\r\n",
            "334 VXNlcm5hbWU6\r\n",
            "501 5.7.0 Authentication aborted\r\n",
            "334 \r\n",
            "501 5.7.0 Authentication aborted\r\n",
            "501 5.5.2 Could not decode parameters for AUTH\r\n",
            "501 5.5.2 Could not decode parameters for AUTH PLAIN\r\n",
        ]
        .concat()
    );
}
