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

use crate::test_helpers::{
    account, hanging_up_server, pipeline_doubles, run_session, test_gateway, FakePop3Server,
    BACKEND_PASSWORD,
};
use vkim_common::{logger::SessionKind, re::base64};
use vkim_config::Config;
use vkim_pipeline::test_helpers::ALICE;

mod proxy;

pub const GREETING: &str = "+OK vKIM POP3 KIM Clientmodul\r\n";
pub const LOGGED_IN: &str = "+OK Logged in.\r\n";
pub const LOGGING_OUT: &str = "+OK Logging out.\r\n";
pub const WRONG_STATE: &str = "-ERR Command not valid in this state\r\n";
pub const INVALID_ARGUMENTS: &str = "-ERR Invalid command arguments\r\n";
pub const AUTHENTICATION_FAILED: &str =
    "-ERR Authentication credentials invalid or Temporary authentication failure\r\n";

/// run a session and check it was cleaned up
pub async fn pop3(config: Config, input: &str) -> String {
    let gateway = test_gateway(config, pipeline_doubles());
    let (result, output) = run_session(SessionKind::Pop3, gateway.clone(), input.as_bytes()).await;
    result.unwrap();
    assert!(gateway.loggers.is_empty());
    output
}

/// `USER` and `PASS` with the account of alice on `backend`
pub fn login(backend: &FakePop3Server) -> String {
    format!(
        "USER {}\r\nPASS {BACKEND_PASSWORD}\r\n",
        account(ALICE, backend.port())
    )
}

#[tokio::test]
async fn greeting_and_quit() {
    pretty_assertions::assert_eq!(
        pop3(Config::local_test(), "QUIT\r\n").await,
        [GREETING, LOGGING_OUT].concat()
    );
}

#[tokio::test]
async fn capabilities() {
    pretty_assertions::assert_eq!(
        pop3(Config::local_test(), "capa\r\n").await,
        [
            GREETING,
            "+OK Capability list follows\r\nUSER\r\nSASL PLAIN\r\nUIDL\r\nTOP\r\n.\r\n"
        ]
        .concat()
    );
}

#[tokio::test]
async fn not_authenticated() {
    pretty_assertions::assert_eq!(
        pop3(
            Config::local_test(),
            "STAT\r\nRETR 1\r\nNOOP\r\nPASS secret\r\nXTND\r\nSTLS\r\nUSER\r\nUSER alice\r\n"
        )
        .await,
        [
            GREETING,
            WRONG_STATE,
            WRONG_STATE,
            WRONG_STATE,
            WRONG_STATE,
            "-ERR Unknown command\r\n",
            "-ERR TLS not available\r\n",
            INVALID_ARGUMENTS,
            INVALID_ARGUMENTS,
        ]
        .concat()
    );
}

#[tokio::test]
async fn user_and_pass() {
    let backend = FakePop3Server::start(vec![]).await;

    pretty_assertions::assert_eq!(
        pop3(
            Config::local_test(),
            &[login(&backend).as_str(), "USER again\r\nQUIT\r\n"].concat()
        )
        .await,
        [GREETING, "+OK\r\n", LOGGED_IN, WRONG_STATE, LOGGING_OUT].concat()
    );

    pretty_assertions::assert_eq!(
        backend.commands(),
        vec![
            format!("USER {ALICE}"),
            format!("PASS {BACKEND_PASSWORD}"),
            "QUIT".to_string()
        ]
    );
}

#[tokio::test]
async fn wrong_password() {
    let backend = FakePop3Server::start(vec![]).await;

    pretty_assertions::assert_eq!(
        pop3(
            Config::local_test(),
            &format!(
                "USER {}\r\nPASS guess\r\nSTAT\r\n",
                account(ALICE, backend.port())
            )
        )
        .await,
        [GREETING, "+OK\r\n", AUTHENTICATION_FAILED, WRONG_STATE].concat()
    );
}

#[tokio::test]
async fn backend_unreachable() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    pretty_assertions::assert_eq!(
        pop3(
            Config::local_test(),
            &format!(
                "USER {}\r\nPASS {BACKEND_PASSWORD}\r\n",
                account(ALICE, port)
            )
        )
        .await,
        [GREETING, "+OK\r\n", AUTHENTICATION_FAILED].concat()
    );
}

#[tokio::test]
async fn backend_lost_ends_the_session() {
    let port = hanging_up_server(
        "+OK POP3 ready\r\n",
        &["+OK\r\n", "+OK mailbox locked\r\n"],
    )
    .await;

    pretty_assertions::assert_eq!(
        pop3(
            Config::local_test(),
            &format!(
                "USER {}\r\nPASS {BACKEND_PASSWORD}\r\nSTAT\r\nSTAT\r\nNOOP\r\nQUIT\r\n",
                account(ALICE, port)
            )
        )
        .await,
        [GREETING, "+OK\r\n", LOGGED_IN, "-ERR Technical error\r\n"].concat()
    );
}

#[tokio::test]
async fn backend_lost_during_retr() {
    let port = hanging_up_server(
        "+OK POP3 ready\r\n",
        &["+OK\r\n", "+OK mailbox locked\r\n"],
    )
    .await;

    pretty_assertions::assert_eq!(
        pop3(
            Config::local_test(),
            &format!(
                "USER {}\r\nPASS {BACKEND_PASSWORD}\r\nRETR 1\r\nNOOP\r\n",
                account(ALICE, port)
            )
        )
        .await,
        [GREETING, "+OK\r\n", LOGGED_IN, "-ERR Technical error\r\n"].concat()
    );
}

#[tokio::test]
async fn sasl_plain() {
    let backend = FakePop3Server::start(vec![]).await;
    let credentials = base64::encode(format!(
        "\0{}\0{BACKEND_PASSWORD}",
        account(ALICE, backend.port())
    ));

    pretty_assertions::assert_eq!(
        pop3(
            Config::local_test(),
            &format!(
                "AUTH LOGIN\r\nAUTH PLAIN\r\n*\r\nAUTH PLAIN %%%\r\nAUTH PLAIN\r\n{credentials}\r\nNOOP\r\n"
            )
        )
        .await,
        [
            GREETING,
            "-ERR Unsupported authentication mechanism\r\n",
            "+ \r\n",
            "-ERR Authentication aborted\r\n",
            INVALID_ARGUMENTS,
            "+ \r\n",
            LOGGED_IN,
            "+OK\r\n",
        ]
        .concat()
    );
}

#[tokio::test]
async fn sasl_plain_initial_response() {
    let backend = FakePop3Server::start(vec![]).await;
    let credentials = base64::encode(format!(
        "\0{}\0{BACKEND_PASSWORD}",
        account(ALICE, backend.port())
    ));

    pretty_assertions::assert_eq!(
        pop3(
            Config::local_test(),
            &format!("AUTH PLAIN {credentials}\r\nAUTH PLAIN {credentials}\r\n")
        )
        .await,
        [GREETING, LOGGED_IN, WRONG_STATE].concat()
    );
}

#[tokio::test]
async fn idle_timeout() {
    let mut config = Config::local_test();
    config.gateway.pop3.idle_timeout = std::time::Duration::from_millis(50);
    let gateway = test_gateway(config, pipeline_doubles());

    let (client, server) = tokio::io::duplex(1024);
    let conn = crate::Connection::new(
        SessionKind::Pop3,
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
        "-ERR Idle timeout, closing connection"
    );
    session.await.unwrap().unwrap();
}
