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

use crate::{account, pipeline_doubles, run_session, test_gateway, FakePop3Server, FakeSmtpServer, BACKEND_PASSWORD};
use vkim_common::{logger::SessionKind, re::base64};
use vkim_config::Config;
use vkim_pipeline::test_helpers::{ALICE, BOB};

const CONTENT: &str = "From: alice@praxis.kim.de\r\n\
    To: bob@klinik.kim.de\r\n\
    Subject: Befund\r\n\
    Date: Mon, 3 Oct 2022 10:00:00 +0200\r\n\
    Message-ID: <2@praxis.kim.de>\r\n\
    \r\n\
    Hallo Bob,\r\n\
    anbei der Befund.\r\n\
    .\r\n";

#[tokio::test]
async fn alice_sends_bob_receives() {
    let gateway = test_gateway(Config::local_test(), pipeline_doubles());

    let outgoing = FakeSmtpServer::start(&[]).await;
    let (result, output) = run_session(
        SessionKind::Smtp,
        gateway.clone(),
        [
            "EHLO client.praxis.kim.de\r\n",
            format!(
                "AUTH PLAIN {}\r\n",
                base64::encode(format!(
                    "\0{}\0{BACKEND_PASSWORD}",
                    account(ALICE, outgoing.port())
                ))
            )
            .as_str(),
            "MAIL FROM:<alice@praxis.kim.de>\r\n",
            "RCPT TO:<bob@klinik.kim.de>\r\n",
            "DATA\r\n",
            CONTENT,
            "QUIT\r\n",
        ]
        .concat()
        .as_bytes(),
    )
    .await;
    result.unwrap();
    assert!(output.contains("250 2.0.0 Message accepted\r\n"), "{output}");

    let sent = outgoing.messages();
    pretty_assertions::assert_eq!(sent.len(), 1);
    let encrypted = String::from_utf8_lossy(&sent[0]).into_owned();
    assert!(!encrypted.contains("anbei der Befund"));

    let incoming = FakePop3Server::start(sent).await;
    let (result, output) = run_session(
        SessionKind::Pop3,
        gateway.clone(),
        format!(
            "USER {}\r\nPASS {BACKEND_PASSWORD}\r\nRETR 1\r\nQUIT\r\n",
            account(BOB, incoming.port())
        )
        .as_bytes(),
    )
    .await;
    result.unwrap();

    assert!(output.contains("+OK Logged in.\r\n"), "{output}");
    assert!(output.contains("Hallo Bob,\r\n"), "{output}");
    assert!(output.contains("anbei der Befund."), "{output}");
    assert!(output.ends_with("+OK Logging out.\r\n"), "{output}");
    assert!(gateway.loggers.is_empty());
}
