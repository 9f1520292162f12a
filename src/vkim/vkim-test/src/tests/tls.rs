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

use crate::{
    get_tls_file::{get_tls_connector, local_test_with_tls},
    pipeline_doubles, test_gateway, test_session,
};
use vkim_server::{
    re::{tokio, tokio_rustls},
    AbstractIO, ServerVKIM,
};

const TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

async fn start_server() -> (std::net::SocketAddr, std::net::SocketAddr) {
    let gateway = test_gateway(local_test_with_tls(), pipeline_doubles());
    let sockets = (
        std::net::TcpListener::bind("127.0.0.1:0").unwrap(),
        std::net::TcpListener::bind("127.0.0.1:0").unwrap(),
    );
    let mut server = ServerVKIM::new(gateway, sockets).unwrap();
    let addr = server.addr().unwrap();
    tokio::spawn(async move { server.listen_and_serve().await });
    addr
}

/// read lines up to the last one of a SMTP reply
async fn smtp_reply<S>(io: &mut AbstractIO<S>) -> Vec<String>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    let mut lines = vec![];
    loop {
        let line = io.next_line(TIMEOUT).await.unwrap();
        let last = line.as_bytes().get(3) != Some(&b'-');
        lines.push(line);
        if last {
            return lines;
        }
    }
}

/// read lines up to the "." of a POP3 multi-line response
async fn pop3_multiline<S>(io: &mut AbstractIO<S>) -> Vec<String>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    let mut lines = vec![];
    loop {
        let line = io.next_line(TIMEOUT).await.unwrap();
        if line == "." {
            return lines;
        }
        lines.push(line);
    }
}

async fn secure(stream: tokio::net::TcpStream) -> AbstractIO<tokio_rustls::client::TlsStream<tokio::net::TcpStream>> {
    let server_name = tokio_rustls::rustls::ServerName::try_from("testserver.com").unwrap();
    AbstractIO::new(get_tls_connector().connect(server_name, stream).await.unwrap())
}

#[tokio::test]
async fn starttls_advertised() {
    test_session!(
        smtp,
        with_config => local_test_with_tls(),
        "EHLO client.praxis.kim.de\r\nQUIT\r\n",
        [
            "220 testserver.com vKIM ESMTP KIM Clientmodul\r\n",
            "250-testserver.com Hello client.praxis.kim.de [127.0.0.1])\r\n",
            "250-SIZE 524288000\r\n",
            "250-STARTTLS\r\n",
            "250-AUTH LOGIN PLAIN\r\n",
            "250-8BITMIME\r\n",
            "250 ENHANCEDSTATUSCODES\r\n",
            "221 2.0.0 testserver.com Service closing transmission channel\r\n",
        ]
        .concat()
    )
    .unwrap();
}

#[tokio::test]
async fn stls_advertised() {
    test_session!(
        pop3,
        with_config => local_test_with_tls(),
        "CAPA\r\nQUIT\r\n",
        [
            "+OK vKIM POP3 KIM Clientmodul\r\n",
            "+OK Capability list follows\r\nUSER\r\nSASL PLAIN\r\nUIDL\r\nTOP\r\nSTLS\r\n.\r\n",
            "+OK Logging out.\r\n",
        ]
        .concat()
    )
    .unwrap();
}

#[tokio::test]
async fn starttls() {
    let (smtp, _) = start_server().await;
    let mut plain = AbstractIO::new(tokio::net::TcpStream::connect(smtp).await.unwrap());

    smtp_reply(&mut plain).await;
    plain.write_all(b"EHLO client.praxis.kim.de\r\n").await.unwrap();
    assert!(smtp_reply(&mut plain).await.contains(&"250-STARTTLS".to_string()));
    plain.write_all(b"STARTTLS\r\n").await.unwrap();
    pretty_assertions::assert_eq!(
        smtp_reply(&mut plain).await,
        vec!["220 2.0.0 Ready to start TLS".to_string()]
    );

    let mut secured = secure(plain.inner).await;
    secured.write_all(b"EHLO client.praxis.kim.de\r\n").await.unwrap();
    let ehlo = smtp_reply(&mut secured).await;
    pretty_assertions::assert_eq!(ehlo.len(), 5);
    assert!(!ehlo.contains(&"250-STARTTLS".to_string()));

    secured.write_all(b"STARTTLS\r\n").await.unwrap();
    pretty_assertions::assert_eq!(
        smtp_reply(&mut secured).await,
        vec!["503 5.5.1 TLS already active".to_string()]
    );
    secured.write_all(b"QUIT\r\n").await.unwrap();
    pretty_assertions::assert_eq!(
        smtp_reply(&mut secured).await,
        vec!["221 2.0.0 testserver.com Service closing transmission channel".to_string()]
    );
}

#[tokio::test]
async fn stls() {
    let (_, pop3) = start_server().await;
    let mut plain = AbstractIO::new(tokio::net::TcpStream::connect(pop3).await.unwrap());

    plain.next_line(TIMEOUT).await.unwrap();
    plain.write_all(b"STLS\r\n").await.unwrap();
    pretty_assertions::assert_eq!(
        plain.next_line(TIMEOUT).await.unwrap(),
        "+OK Begin TLS negotiation"
    );

    let mut secured = secure(plain.inner).await;
    secured.write_all(b"CAPA\r\n").await.unwrap();
    pretty_assertions::assert_eq!(
        pop3_multiline(&mut secured).await,
        vec!["+OK Capability list follows", "USER", "SASL PLAIN", "UIDL", "TOP"]
    );

    secured.write_all(b"STLS\r\n").await.unwrap();
    pretty_assertions::assert_eq!(
        secured.next_line(TIMEOUT).await.unwrap(),
        "-ERR TLS already active"
    );
    secured.write_all(b"QUIT\r\n").await.unwrap();
    pretty_assertions::assert_eq!(
        secured.next_line(TIMEOUT).await.unwrap(),
        "+OK Logging out."
    );
}

#[tokio::test]
async fn plaintext_after_starttls_is_refused() {
    let (smtp, _) = start_server().await;
    let mut plain = AbstractIO::new(tokio::net::TcpStream::connect(smtp).await.unwrap());

    smtp_reply(&mut plain).await;
    plain
        .write_all(b"STARTTLS\r\nEHLO injected.example\r\n")
        .await
        .unwrap();
    pretty_assertions::assert_eq!(
        smtp_reply(&mut plain).await,
        vec!["220 2.0.0 Ready to start TLS".to_string()]
    );
    // the gateway drops the connection instead of starting tls
    assert!(plain.next_line(TIMEOUT).await.is_err());
}
