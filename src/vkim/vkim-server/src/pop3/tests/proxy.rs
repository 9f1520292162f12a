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

use super::{login, pop3, GREETING, INVALID_ARGUMENTS, LOGGED_IN, LOGGING_OUT};
use crate::{connection::stuff, test_helpers::FakePop3Server};
use vkim_config::Config;

const FIRST: &str = "From: carol@apotheke.kim.de\r\n\
    To: alice@praxis.kim.de\r\n\
    Subject: Rezept\r\n\
    \r\n\
    .Hallo Alice,\r\n\
    das Rezept liegt bereit.\r\n";

const SECOND: &str = "From: bob@klinik.kim.de\r\n\
    To: alice@praxis.kim.de\r\n\
    Subject: Termin\r\n\
    \r\n\
    Morgen um 10 Uhr.\r\n";

async fn mailbox() -> FakePop3Server {
    FakePop3Server::start(vec![FIRST.as_bytes().to_vec(), SECOND.as_bytes().to_vec()]).await
}

#[tokio::test]
async fn mailbox_commands() {
    let backend = mailbox().await;

    pretty_assertions::assert_eq!(
        pop3(
            Config::local_test(),
            &[
                login(&backend).as_str(),
                "STAT\r\nLIST\r\nLIST 2\r\nUIDL\r\nUIDL 1\r\nTOP 2 0\r\nNOOP\r\n",
                "DELE 2\r\nLIST 2\r\nRSET\r\nDELE 1\r\nQUIT\r\n"
            ]
            .concat()
        )
        .await,
        [
            GREETING,
            "+OK\r\n",
            LOGGED_IN,
            format!("+OK 2 {}\r\n", FIRST.len() + SECOND.len()).as_str(),
            format!(
                "+OK\r\n1 {}\r\n2 {}\r\n.\r\n",
                FIRST.len(),
                SECOND.len()
            ).as_str(),
            format!("+OK 2 {}\r\n", SECOND.len()).as_str(),
            "+OK\r\n1 uid-1\r\n2 uid-2\r\n.\r\n",
            "+OK 1 uid-1\r\n",
            format!(
                "+OK {} octets\r\n\
                From: bob@klinik.kim.de\r\n\
                To: alice@praxis.kim.de\r\n\
                Subject: Termin\r\n\
                \r\n\
                .\r\n",
                SECOND.len() - "Morgen um 10 Uhr.\r\n".len()
            ).as_str(),
            "+OK\r\n",
            "+OK message 2 deleted\r\n",
            "-ERR no such message\r\n",
            "+OK\r\n",
            "+OK message 1 deleted\r\n",
            LOGGING_OUT,
        ]
        .concat()
    );

    pretty_assertions::assert_eq!(backend.mailbox(), vec![SECOND.as_bytes().to_vec()]);
}

#[tokio::test]
async fn malformed_arguments() {
    let backend = mailbox().await;

    pretty_assertions::assert_eq!(
        pop3(
            Config::local_test(),
            &[
                login(&backend).as_str(),
                "STAT 1\r\nLIST one\r\nDELE\r\nTOP 1\r\nRETR -1\r\nRSET all\r\n"
            ]
            .concat()
        )
        .await,
        [
            GREETING,
            "+OK\r\n",
            LOGGED_IN,
            INVALID_ARGUMENTS,
            INVALID_ARGUMENTS,
            INVALID_ARGUMENTS,
            INVALID_ARGUMENTS,
            INVALID_ARGUMENTS,
            INVALID_ARGUMENTS,
        ]
        .concat()
    );
    // nothing reached the backend but the login and the logout of the cleanup
    pretty_assertions::assert_eq!(backend.commands().len(), 3);
}

#[tokio::test]
async fn retrieve_plain_message() {
    let backend = mailbox().await;
    let expected = stuff(FIRST.as_bytes());
    assert!(expected.len() > FIRST.len());

    pretty_assertions::assert_eq!(
        pop3(
            Config::local_test(),
            &[login(&backend).as_str(), "RETR 1\r\nRETR 3\r\n"].concat()
        )
        .await,
        [
            GREETING,
            "+OK\r\n",
            LOGGED_IN,
            // the size of the message, before transparency
            format!("+OK {} octets\r\n", FIRST.len()).as_str(),
            std::str::from_utf8(&expected).unwrap(),
            ".\r\n",
            "-ERR no such message\r\n",
        ]
        .concat()
    );
    assert!(String::from_utf8(expected).unwrap().contains("\r\n..Hallo Alice,\r\n"));
}
