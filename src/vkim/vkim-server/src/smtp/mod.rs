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
    backend::{BackendConnection, SmtpBackend},
    connection::{unstuff, Connection},
    session::{Gateway, SessionState, TransportSession},
    BackendAccount,
};
use futures::FutureExt;
use vkim_common::{
    logger::{LoggerContext, LoggerRegistry, SessionKind},
    re::{anyhow, base64, tracing},
    Address, CertificateIdentity, ErrorCode, GatewayError, Reply,
};
use vkim_pipeline::{
    operation::builtin::load_certificates_with, OutboundEnvelope, Outcome, Relay,
};

#[cfg(test)]
mod tests;

const USERNAME_CHALLENGE: &str = "VXNlcm5hbWU6";
const PASSWORD_CHALLENGE: &str = "UGFzc3dvcmQ6";

/// The message being received
#[derive(Debug)]
struct Transaction {
    sender: Address,
    /// every recipient attempted, the ones without certificate included
    recipients: Vec<Address>,
    identities: Vec<CertificateIdentity>,
    arrival: time::OffsetDateTime,
}

enum Event {
    Continue,
    UpgradeTls(tokio_rustls::TlsAcceptor, std::time::Duration),
    Quit,
}

/// A SMTP client of the gateway, proxied to the SMTP server of its account.
pub struct SmtpGatewaySession {
    gateway: std::sync::Arc<Gateway>,
    context: LoggerContext,
    state: SessionState,
    backend: Option<Box<dyn Relay>>,
    helo: Option<String>,
    transaction: Option<Transaction>,
}

impl std::fmt::Debug for SmtpGatewaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpGatewaySession")
            .field("id", &self.context.session_id())
            .field("state", &self.state)
            .field("helo", &self.helo)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl TransportSession for SmtpGatewaySession {
    type Backend = dyn Relay;

    fn id(&self) -> &str {
        self.context.session_id()
    }

    fn log(&self, line: &str) {
        self.context.log(line);
    }

    fn backend_mut(&mut self) -> &mut Option<Box<Self::Backend>> {
        &mut self.backend
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn loggers(&self) -> &LoggerRegistry {
        &self.gateway.loggers
    }
}

/// Serve a SMTP client until it quits, then clean the session up.
///
/// # Errors
///
/// * the connection with the client failed
/// * the session panicked
pub async fn handle_connection(
    conn: Connection,
    gateway: std::sync::Arc<Gateway>,
) -> anyhow::Result<()> {
    let mut session = SmtpGatewaySession::new(gateway);
    let id = session.id().to_string();
    tracing::info!(session_id = %id, client = %conn.client_addr, "smtp session started");

    let result = std::panic::AssertUnwindSafe(session.serve(conn))
        .catch_unwind()
        .await;
    session.cleanup().await;

    match result {
        Ok(result) => result,
        Err(_) => anyhow::bail!("smtp session {id} panicked"),
    }
}

fn split_command(line: &str) -> (String, &str) {
    let line = line.trim();
    match line.split_once(' ') {
        Some((verb, args)) => (verb.to_ascii_uppercase(), args.trim()),
        None => (line.to_ascii_uppercase(), ""),
    }
}

/// the path of `FROM:<path> [params]` or `TO:<path> [params]`
fn path_argument<'a>(args: &'a str, keyword: &str) -> Option<&'a str> {
    let (key, path) = args.split_once(':')?;
    if !key.trim().eq_ignore_ascii_case(keyword) {
        return None;
    }
    let path = path.trim_start();
    let path = if path.starts_with('<') {
        &path[..=path.find('>')?]
    } else {
        path.split_whitespace().next()?
    };
    Some(path)
}

fn decode(input: &str) -> Result<String, Reply> {
    let invalid = || Reply::enhanced(501, "5.5.2", "Could not decode parameters for AUTH");
    base64::decode(input.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(invalid)
}

fn backend_failure() -> Reply {
    Reply::enhanced(451, "4.4.1", "Mail server not reachable")
}

impl SmtpGatewaySession {
    /// Register the log of a new session.
    #[must_use]
    pub fn new(gateway: std::sync::Arc<Gateway>) -> Self {
        let logger = gateway.loggers.create(SessionKind::Smtp);
        Self {
            context: LoggerContext::new(logger, gateway.config.logs.personal_information),
            gateway,
            state: SessionState::Connect,
            backend: None,
            helo: None,
            transaction: None,
        }
    }

    ///
    #[must_use]
    pub const fn context(&self) -> &LoggerContext {
        &self.context
    }

    fn domain(&self) -> &str {
        &self.gateway.config.gateway.domain
    }

    async fn serve(&mut self, mut conn: Connection) -> anyhow::Result<()> {
        self.log(&format!("connection from {}", conn.client_addr));
        conn.send_reply(&Reply::plain(
            220,
            format!(
                "{} {}",
                self.domain(),
                self.gateway.config.gateway.greeting_smtp
            ),
        ))
        .await?;

        while conn.is_alive {
            let line = match conn.read().await {
                Ok(line) => line,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    self.log("idle timeout");
                    conn.send_reply(&Reply::enhanced(
                        421,
                        "4.4.2",
                        format!("{} Idle timeout, closing connection", self.domain()),
                    ))
                    .await?;
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    self.log("connection closed by the client");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            match self.on_command(&mut conn, &line).await? {
                Event::Continue => {}
                Event::Quit => conn.is_alive = false,
                Event::UpgradeTls(acceptor, handshake_timeout) => {
                    conn = conn.upgrade_tls(&acceptor, handshake_timeout).await?;
                    self.log("tls established");
                    self.on_tls_established().await;
                }
            }
        }
        Ok(())
    }

    async fn on_command(&mut self, conn: &mut Connection, line: &str) -> anyhow::Result<Event> {
        let (verb, args) = split_command(line);
        self.log(&format!("{verb} begins"));

        let reply = match verb.as_str() {
            "EHLO" => self.on_helo(conn, args, true).await,
            "HELO" => self.on_helo(conn, args, false).await,
            "AUTH" => self.on_auth(conn, args).await?,
            "MAIL" => self.on_mail(args).await,
            "RCPT" => self.on_rcpt(args).await,
            "DATA" => self.on_data(conn).await?,
            "RSET" if !args.is_empty() => {
                Reply::enhanced(501, "5.5.4", "Syntax error in parameters or arguments")
            }
            "RSET" => self
                .reset(true)
                .await
                .unwrap_or_else(|| Reply::enhanced(250, "2.0.0", "OK")),
            "NOOP" => Reply::enhanced(250, "2.0.0", "OK"),
            "STARTTLS" => match self.on_starttls(conn) {
                Ok(event) => {
                    conn.send_reply(&Reply::enhanced(220, "2.0.0", "Ready to start TLS"))
                        .await?;
                    return Ok(event);
                }
                Err(reply) => reply,
            },
            "QUIT" => {
                conn.send_reply(&Reply::enhanced(
                    221,
                    "2.0.0",
                    format!("{} Service closing transmission channel", self.domain()),
                ))
                .await?;
                return Ok(Event::Quit);
            }
            _ => Reply::enhanced(500, "5.5.2", "Syntax error, command unrecognized"),
        };

        self.log(&format!("{verb} ends - {}", reply.code()));
        conn.send_reply(&reply).await?;
        if self.state == SessionState::BackendLost {
            return Ok(Event::Quit);
        }
        Ok(Event::Continue)
    }

    /// the backend is unusable, it is dropped and the session ends
    fn backend_lost(&mut self, error: &dyn std::fmt::Display) -> Reply {
        tracing::warn!(session_id = %self.id(), %error, "backend connection lost");
        self.log(&format!("backend connection lost: {error}"));
        self.backend = None;
        self.transaction = None;
        self.state = SessionState::BackendLost;
        Reply::enhanced(
            421,
            "4.4.2",
            format!("{} Mail server connection lost, closing connection", self.domain()),
        )
    }

    /// drop the current message, and the one of the backend if `backend` or
    /// if a message was in progress, `Some` if the backend is lost
    async fn reset(&mut self, backend: bool) -> Option<Reply> {
        let in_progress = self.transaction.take().is_some();
        self.context.ledgers.reset();

        if backend || in_progress {
            if let Some(relay) = self.backend.as_mut() {
                match relay.reset().await {
                    Ok(reply) if reply.is_positive() => {}
                    Ok(reply) => self.log(&format!("backend refused RSET: {reply}")),
                    Err(error) => return Some(self.backend_lost(&error)),
                }
            }
        }
        None
    }

    async fn on_tls_established(&mut self) {
        self.helo = None;
        self.transaction = None;
        self.context.ledgers.reset();
        if let Some(mut backend) = self.backend.take() {
            if let Err(error) = backend.close().await {
                self.log(&format!("backend not closed cleanly: {error}"));
            }
        }
        self.state = SessionState::Connect;
    }

    async fn on_helo(&mut self, conn: &mut Connection, args: &str, extended: bool) -> Reply {
        if args.is_empty() {
            return Reply::enhanced(
                501,
                "5.5.4",
                if extended {
                    "Syntax: EHLO hostname"
                } else {
                    "Syntax: HELO hostname"
                },
            );
        }
        if let Some(reply) = self.reset(false).await {
            return reply;
        }
        self.helo = Some(args.to_string());

        let hello = format!(
            "{} Hello {args} [{}])",
            self.domain(),
            conn.client_addr.ip()
        );
        if !extended {
            return Reply::plain(250, hello);
        }

        let mut lines = vec![
            hello,
            format!("SIZE {}", self.gateway.config.gateway.max_message_size),
        ];
        if self.gateway.tls_acceptor.is_some() && !conn.is_secured {
            lines.push("STARTTLS".to_string());
        }
        lines.extend(
            ["AUTH LOGIN PLAIN", "8BITMIME", "ENHANCEDSTATUSCODES"]
                .into_iter()
                .map(str::to_string),
        );
        Reply::multiline(250, lines)
    }

    fn on_starttls(&self, conn: &Connection) -> Result<Event, Reply> {
        if conn.is_secured {
            return Err(Reply::enhanced(503, "5.5.1", "TLS already active"));
        }
        match (&self.gateway.tls_acceptor, &self.gateway.config.gateway.tls) {
            (Some(acceptor), Some(tls)) => {
                Ok(Event::UpgradeTls(acceptor.clone(), tls.handshake_timeout))
            }
            _ => Err(Reply::enhanced(454, "4.7.0", "TLS not available")),
        }
    }

    /// read the answer to a `334` challenge
    async fn challenge(
        conn: &mut Connection,
        challenge: &str,
    ) -> anyhow::Result<Result<String, Reply>> {
        conn.send(&format!("334 {challenge}\r\n")).await?;
        let answer = conn.read().await?;
        if answer.trim() == "*" {
            return Ok(Err(Reply::enhanced(501, "5.7.0", "Authentication aborted")));
        }
        Ok(decode(&answer))
    }

    async fn on_auth(&mut self, conn: &mut Connection, args: &str) -> anyhow::Result<Reply> {
        if self.state == SessionState::Proxy {
            return Ok(Reply::enhanced(503, "5.5.1", "Already authenticated"));
        }
        let (mechanism, initial) = match args.split_once(' ') {
            Some((mechanism, initial)) => (mechanism, Some(initial.trim())),
            None => (args, None),
        };

        let credentials = match mechanism.to_ascii_uppercase().as_str() {
            "PLAIN" => {
                let decoded = match initial {
                    Some("=") => Ok(String::new()),
                    Some(initial) => decode(initial),
                    None => Self::challenge(conn, "").await?,
                };
                decoded.and_then(|decoded| {
                    let mut parts = decoded.split('\0');
                    match (parts.next(), parts.next(), parts.next(), parts.next()) {
                        (Some(_), Some(user), Some(password), None) => {
                            Ok((user.to_string(), password.to_string()))
                        }
                        _ => Err(Reply::enhanced(
                            501,
                            "5.5.2",
                            "Could not decode parameters for AUTH PLAIN",
                        )),
                    }
                })
            }
            "LOGIN" => {
                let user = match initial {
                    Some(initial) => decode(initial),
                    None => Self::challenge(conn, USERNAME_CHALLENGE).await?,
                };
                match user {
                    Ok(user) => Self::challenge(conn, PASSWORD_CHALLENGE)
                        .await?
                        .map(|password| (user, password)),
                    Err(reply) => Err(reply),
                }
            }
            _ => Err(Reply::enhanced(
                504,
                "5.5.4",
                "Unrecognized authentication type",
            )),
        };

        Ok(match credentials {
            Ok((user, password)) => self.authenticate(&user, &password).await,
            Err(reply) => reply,
        })
    }

    async fn authenticate(&mut self, user: &str, password: &str) -> Reply {
        let invalid = || Reply::enhanced(535, "5.7.8", "Authentication credentials invalid");
        let temporary = || Reply::enhanced(454, "4.7.0", "Temporary authentication failure");

        let account = match BackendAccount::parse(user) {
            Ok(account) => account,
            Err(error) => {
                self.log(&format!("auth ends - {error}"));
                return invalid();
            }
        };
        self.context.mail_server_username = Some(account.user.clone());
        self.context.mail_server_host = Some(account.host.clone());
        self.context.mail_server_port = Some(account.port);
        self.log("auth begins - smtp client auth");

        let smtp = &self.gateway.config.gateway.smtp;
        let target = match self
            .gateway
            .backend_target(&account, smtp.backend_security, smtp.backend_timeout)
            .await
        {
            Ok(target) => target,
            Err(error) => {
                self.log(&format!("auth ends - {error}"));
                return temporary();
            }
        };

        self.log(&format!("connect to {}", target.address));
        let mut backend = match SmtpBackend::connect(&target, self.domain()).await {
            Ok(backend) => backend,
            Err(error) => {
                self.log(&format!("auth ends - connect error: {error}"));
                return temporary();
            }
        };

        match backend.authenticate(&account.user, password).await {
            Ok(true) => {
                self.log("auth ends - smtp client auth - success");
                self.backend = Some(Box::new(backend));
                self.state = SessionState::Proxy;
                Reply::enhanced(235, "2.7.0", "Authentication successful")
            }
            Ok(false) => {
                self.log("auth ends - smtp client auth - auth error");
                if let Err(error) = backend.quit().await {
                    self.log(&format!("backend not closed cleanly: {error}"));
                }
                invalid()
            }
            Err(error) => {
                self.log(&format!("auth ends - smtp client auth - {error}"));
                invalid()
            }
        }
    }

    async fn on_mail(&mut self, args: &str) -> Reply {
        if self.state != SessionState::Proxy {
            return Reply::enhanced(530, "5.7.0", "Authentication required");
        }
        if self.helo.is_none() {
            return Reply::enhanced(503, "5.5.1", "Send HELO/EHLO first");
        }
        if self.transaction.is_some() {
            return Reply::enhanced(503, "5.5.0", "Sender already specified");
        }
        let Some(path) = path_argument(args, "FROM") else {
            return Reply::enhanced(501, "5.5.4", "Usage: MAIL FROM:<sender>");
        };
        let Ok(sender) = Address::new(path) else {
            return Reply::enhanced(501, "5.1.7", "Syntax error in sender address");
        };

        self.context.ledgers.reset();
        let Some(backend) = self.backend.as_mut() else {
            return backend_failure();
        };
        match backend.mail_from(&sender).await {
            Ok(reply) if reply.is_positive() => {
                let reply = Reply::enhanced(250, "2.1.0", format!("Sender <{sender}> OK"));
                self.transaction = Some(Transaction {
                    sender,
                    recipients: vec![],
                    identities: vec![],
                    arrival: time::OffsetDateTime::now_utc(),
                });
                reply
            }
            Ok(reply) => reply,
            Err(error) => self.backend_lost(&error),
        }
    }

    fn attempt(&mut self, recipient: &Address, identities: Vec<CertificateIdentity>) {
        if let Some(transaction) = self.transaction.as_mut() {
            if !transaction.recipients.contains(recipient) {
                transaction.recipients.push(recipient.clone());
                transaction.identities.extend(identities);
            }
        }
    }

    async fn on_rcpt(&mut self, args: &str) -> Reply {
        if self.state != SessionState::Proxy {
            return Reply::enhanced(530, "5.7.0", "Authentication required");
        }
        if self.transaction.is_none() {
            return Reply::enhanced(503, "5.5.1", "Need MAIL before RCPT");
        }
        let Some(path) = path_argument(args, "TO") else {
            return Reply::enhanced(501, "5.5.4", "Usage: RCPT TO:<recipient>");
        };
        let Ok(recipient) = Address::new(path) else {
            return Reply::enhanced(501, "5.1.3", "Syntax error in recipient address");
        };

        self.log("load certs for rcpt");
        let resolved = load_certificates_with(
            &self.gateway.registry,
            &mut self.context.ledgers,
            std::slice::from_ref(&recipient),
            false,
            true,
        )
        .await;

        let identities = match resolved {
            Ok(identities)
                if !identities.is_empty()
                    && !self.context.ledgers.certificates.is_error(&recipient) =>
            {
                identities
            }
            otherwise => {
                if let Err(error) = otherwise {
                    self.log(&format!("rcpt certs not available: {error}"));
                }
                if !self.context.ledgers.certificates.is_error(&recipient) {
                    self.context
                        .ledgers
                        .certificates
                        .add(&recipient, ErrorCode::X005, false);
                }
                self.attempt(&recipient, vec![]);
                return Reply::enhanced(
                    550,
                    "5.1.1",
                    format!("Recipient <{recipient}> certificate not available"),
                );
            }
        };

        let Some(backend) = self.backend.as_mut() else {
            return backend_failure();
        };
        match backend.rcpt_to(&recipient).await {
            Ok(reply) if reply.is_positive() => {
                self.attempt(&recipient, identities);
                Reply::enhanced(250, "2.1.5", format!("Recipient <{recipient}> OK"))
            }
            Ok(reply) => {
                self.log(&format!("rcpt ends - backend refused: {reply}"));
                self.context
                    .ledgers
                    .recipient_rejects
                    .add(&recipient, ErrorCode::X024);
                reply
            }
            Err(error) => self.backend_lost(&error),
        }
    }

    async fn on_data(&mut self, conn: &mut Connection) -> anyhow::Result<Reply> {
        if self.state != SessionState::Proxy {
            return Ok(Reply::enhanced(530, "5.7.0", "Authentication required"));
        }
        match &self.transaction {
            None => return Ok(Reply::enhanced(503, "5.5.1", "Need MAIL before DATA")),
            Some(transaction) if transaction.recipients.is_empty() => {
                return Ok(Reply::enhanced(503, "5.5.1", "Need RCPT before DATA"));
            }
            Some(_) => {}
        }

        conn.send_reply(&Reply::plain(354, "Start mail input; end with <CRLF>.<CRLF>"))
            .await?;

        let max_message_size = self.gateway.config.gateway.max_message_size;
        let mut content = Vec::new();
        let mut too_big = false;
        loop {
            let line = conn.read_raw().await?;
            if line == b"." {
                break;
            }
            if !too_big {
                content.extend_from_slice(unstuff(&line));
                content.extend_from_slice(b"\r\n");
                if content.len() > max_message_size {
                    too_big = true;
                    content = Vec::new();
                }
            }
        }

        if too_big {
            self.log("data ends - message too big");
            if let Some(reply) = self.reset(true).await {
                return Ok(reply);
            }
            return Ok(Reply::enhanced(
                552,
                "5.3.4",
                "Message size exceeds fixed maximum message size",
            ));
        }

        let Some(transaction) = self.transaction.take() else {
            return Ok(Reply::enhanced(503, "5.5.1", "Need MAIL before DATA"));
        };
        let envelope = OutboundEnvelope {
            sender: transaction.sender,
            recipients: transaction.recipients,
            recipient_identities: transaction.identities,
            peer: self.helo.clone(),
            arrival: transaction.arrival,
        };

        let outcome = self
            .gateway
            .outbound
            .process(&mut self.context, &mut self.backend, &envelope, &content)
            .await;

        Ok(match outcome {
            Ok(Outcome::Relayed(reply)) if reply.is_positive() => {
                Reply::enhanced(250, "2.0.0", "Message accepted")
            }
            Ok(Outcome::Relayed(reply)) => reply,
            Ok(Outcome::SoftDeny { codes }) => Reply::enhanced(
                451,
                "4.7.0",
                format!(
                    "Message deferred: {}",
                    codes
                        .iter()
                        .map(|code| code.id())
                        .collect::<Vec<_>>()
                        .join(" ")
                ),
            ),
            Ok(Outcome::Deny { codes }) => {
                self.log(&format!("data ends - message denied: {codes:?}"));
                Reply::enhanced(554, "5.7.0", "Transaction failed")
            }
            Err(GatewayError::BackendLost(error)) => self.backend_lost(&error),
            Err(error) => {
                tracing::warn!(session_id = %self.id(), %error, "outbound pipeline failed");
                self.log(&format!("data ends - {error}"));
                Reply::enhanced(554, "5.7.0", "Transaction failed")
            }
        })
    }
}
