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
    backend::{Pop3Backend, Pop3Response},
    connection::{stuff, Connection},
    session::{Gateway, SessionState, TransportSession},
    BackendAccount,
};
use futures::FutureExt;
use vkim_common::{
    logger::{LoggerContext, LoggerRegistry, SessionKind},
    re::{anyhow, base64, tracing},
    Address,
};
use vkim_pipeline::Retrieved;

#[cfg(test)]
mod tests;

const INVALID_ARGUMENTS: &str = "-ERR Invalid command arguments\r\n";
const AUTHENTICATION_FAILED: &str =
    "-ERR Authentication credentials invalid or Temporary authentication failure\r\n";
const WRONG_STATE: &str = "-ERR Command not valid in this state\r\n";
const TECHNICAL_ERROR: &str = "-ERR Technical error\r\n";

enum Event {
    Continue,
    UpgradeTls(tokio_rustls::TlsAcceptor, std::time::Duration),
    Quit,
}

/// A POP3 client of the gateway, proxied to the POP3 server of its account.
pub struct Pop3GatewaySession {
    gateway: std::sync::Arc<Gateway>,
    context: LoggerContext,
    state: SessionState,
    backend: Option<Box<Pop3Backend>>,
    account: Option<BackendAccount>,
}

impl std::fmt::Debug for Pop3GatewaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pop3GatewaySession")
            .field("id", &self.context.session_id())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl TransportSession for Pop3GatewaySession {
    type Backend = Pop3Backend;

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

/// Serve a POP3 client until it quits, then clean the session up.
///
/// # Errors
///
/// * the connection with the client failed
/// * the session panicked
pub async fn handle_connection(
    conn: Connection,
    gateway: std::sync::Arc<Gateway>,
) -> anyhow::Result<()> {
    let mut session = Pop3GatewaySession::new(gateway);
    let id = session.id().to_string();
    tracing::info!(session_id = %id, client = %conn.client_addr, "pop3 session started");

    let result = std::panic::AssertUnwindSafe(session.serve(conn))
        .catch_unwind()
        .await;
    session.cleanup().await;

    match result {
        Ok(result) => result,
        Err(_) => anyhow::bail!("pop3 session {id} panicked"),
    }
}

fn split_command(line: &str) -> (String, Vec<&str>) {
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default().to_ascii_uppercase();
    (verb, words.collect())
}

fn is_number(arg: &str) -> bool {
    !arg.is_empty() && arg.bytes().all(|byte| byte.is_ascii_digit())
}

impl Pop3GatewaySession {
    /// Register the log of a new session.
    #[must_use]
    pub fn new(gateway: std::sync::Arc<Gateway>) -> Self {
        let logger = gateway.loggers.create(SessionKind::Pop3);
        Self {
            context: LoggerContext::new(logger, gateway.config.logs.personal_information),
            gateway,
            state: SessionState::Connect,
            backend: None,
            account: None,
        }
    }

    ///
    #[must_use]
    pub const fn context(&self) -> &LoggerContext {
        &self.context
    }

    async fn serve(&mut self, mut conn: Connection) -> anyhow::Result<()> {
        self.log(&format!("connection from {}", conn.client_addr));
        conn.send(&format!("+OK {}\r\n", self.gateway.config.gateway.greeting_pop3))
            .await?;

        while conn.is_alive {
            let line = match conn.read().await {
                Ok(line) => line,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    self.log("idle timeout");
                    conn.send("-ERR Idle timeout, closing connection\r\n").await?;
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
                }
            }
        }
        Ok(())
    }

    async fn on_command(&mut self, conn: &mut Connection, line: &str) -> anyhow::Result<Event> {
        let (verb, args) = split_command(line);
        self.log(&format!("{verb} begins"));

        let response = match (verb.as_str(), self.state) {
            ("CAPA", _) => self.on_capa(conn),
            ("QUIT", _) => {
                conn.send(&self.on_quit().await).await?;
                return Ok(Event::Quit);
            }
            ("NOOP", SessionState::Proxy) => "+OK\r\n".to_string(),
            ("STLS", SessionState::Connect) => match self.on_stls(conn) {
                Ok(event) => {
                    conn.send("+OK Begin TLS negotiation\r\n").await?;
                    return Ok(event);
                }
                Err(response) => response,
            },
            ("USER", SessionState::Connect | SessionState::UserSet) => self.on_user(&args),
            ("PASS", SessionState::UserSet) => self.on_pass(line).await,
            ("AUTH", SessionState::Connect | SessionState::UserSet) => {
                self.on_auth(conn, &args).await?
            }
            ("STAT", SessionState::Proxy) if args.is_empty() => {
                self.proxy("STAT", false).await
            }
            ("LIST" | "UIDL", SessionState::Proxy) if args.is_empty() => {
                self.proxy(&verb, true).await
            }
            ("LIST" | "UIDL" | "DELE", SessionState::Proxy)
                if args.len() == 1 && is_number(args[0]) =>
            {
                self.proxy(&format!("{verb} {}", args[0]), false).await
            }
            ("TOP", SessionState::Proxy)
                if args.len() == 2 && is_number(args[0]) && is_number(args[1]) =>
            {
                self.proxy(&format!("TOP {} {}", args[0], args[1]), true)
                    .await
            }
            ("RETR", SessionState::Proxy) if args.len() == 1 && is_number(args[0]) => {
                match self.on_retr(args[0]).await {
                    Ok(bytes) => {
                        conn.send_raw(&bytes).await?;
                        self.log("RETR ends");
                        return Ok(Event::Continue);
                    }
                    Err(response) => response,
                }
            }
            ("RSET", SessionState::Proxy) if args.is_empty() => {
                self.proxy("RSET", false).await
            }
            (
                "STAT" | "LIST" | "UIDL" | "DELE" | "TOP" | "RETR" | "RSET",
                SessionState::Proxy,
            ) => INVALID_ARGUMENTS.to_string(),
            (
                "CAPA" | "QUIT" | "NOOP" | "STLS" | "USER" | "PASS" | "AUTH" | "STAT" | "LIST"
                | "UIDL" | "DELE" | "TOP" | "RETR" | "RSET",
                _,
            ) => WRONG_STATE.to_string(),
            _ => "-ERR Unknown command\r\n".to_string(),
        };

        self.log(&format!("{verb} ends - {}", response.trim_end()));
        conn.send(&response).await?;
        if self.state == SessionState::BackendLost {
            return Ok(Event::Quit);
        }
        Ok(Event::Continue)
    }

    /// the backend is unusable, it is dropped and the session ends
    fn backend_lost(&mut self, error: &anyhow::Error) -> String {
        tracing::warn!(session_id = %self.id(), %error, "backend connection lost");
        self.log(&format!("backend connection lost: {error}"));
        self.backend = None;
        self.state = SessionState::BackendLost;
        TECHNICAL_ERROR.to_string()
    }

    fn on_capa(&self, conn: &Connection) -> String {
        let mut capabilities = "+OK Capability list follows\r\nUSER\r\nSASL PLAIN\r\n".to_string();
        capabilities.push_str("UIDL\r\nTOP\r\n");
        if self.state == SessionState::Connect
            && self.gateway.tls_acceptor.is_some()
            && !conn.is_secured
        {
            capabilities.push_str("STLS\r\n");
        }
        capabilities.push_str(".\r\n");
        capabilities
    }

    fn on_stls(&self, conn: &Connection) -> Result<Event, String> {
        if conn.is_secured {
            return Err("-ERR TLS already active\r\n".to_string());
        }
        match (&self.gateway.tls_acceptor, &self.gateway.config.gateway.tls) {
            (Some(acceptor), Some(tls)) => {
                Ok(Event::UpgradeTls(acceptor.clone(), tls.handshake_timeout))
            }
            _ => Err("-ERR TLS not available\r\n".to_string()),
        }
    }

    fn on_user(&mut self, args: &[&str]) -> String {
        let [user] = args else {
            return INVALID_ARGUMENTS.to_string();
        };
        match BackendAccount::parse(user) {
            Ok(account) => {
                self.context.mail_server_username = Some(account.user.clone());
                self.context.mail_server_host = Some(account.host.clone());
                self.context.mail_server_port = Some(account.port);
                self.account = Some(account);
                self.state = SessionState::UserSet;
                "+OK\r\n".to_string()
            }
            Err(error) => {
                self.log(&format!("USER ends - {error}"));
                self.account = None;
                self.state = SessionState::Connect;
                INVALID_ARGUMENTS.to_string()
            }
        }
    }

    async fn on_pass(&mut self, line: &str) -> String {
        // the password may contain spaces
        let password = line
            .trim_start()
            .get(4..)
            .map(|password| password.strip_prefix(' ').unwrap_or(password))
            .unwrap_or_default()
            .to_string();
        if password.is_empty() {
            return INVALID_ARGUMENTS.to_string();
        }
        self.login(&password).await
    }

    async fn on_auth(&mut self, conn: &mut Connection, args: &[&str]) -> anyhow::Result<String> {
        let initial = match args {
            [mechanism] if mechanism.eq_ignore_ascii_case("PLAIN") => {
                conn.send("+ \r\n").await?;
                conn.read().await?
            }
            [mechanism, initial] if mechanism.eq_ignore_ascii_case("PLAIN") => {
                (*initial).to_string()
            }
            _ => return Ok("-ERR Unsupported authentication mechanism\r\n".to_string()),
        };
        if initial.trim() == "*" {
            return Ok("-ERR Authentication aborted\r\n".to_string());
        }

        let decoded = base64::decode(initial.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok());
        let Some(decoded) = decoded else {
            return Ok(INVALID_ARGUMENTS.to_string());
        };
        let mut parts = decoded.split('\0');
        let (Some(_), Some(user), Some(password), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Ok(INVALID_ARGUMENTS.to_string());
        };

        let response = self.on_user(&[user]);
        if self.state != SessionState::UserSet {
            return Ok(response);
        }
        Ok(self.login(password).await)
    }

    async fn login(&mut self, password: &str) -> String {
        let Some(account) = self.account.clone() else {
            return WRONG_STATE.to_string();
        };
        self.log("login begins - pop3 client auth");

        match self.connect(&account, password).await {
            Ok(backend) => {
                self.log("login ends - success");
                self.backend = Some(Box::new(backend));
                self.state = SessionState::Proxy;
                "+OK Logged in.\r\n".to_string()
            }
            Err(error) => {
                self.log(&format!("login ends - {error}"));
                self.state = SessionState::Connect;
                self.account = None;
                AUTHENTICATION_FAILED.to_string()
            }
        }
    }

    async fn connect(
        &self,
        account: &BackendAccount,
        password: &str,
    ) -> anyhow::Result<Pop3Backend> {
        let pop3 = &self.gateway.config.gateway.pop3;
        let target = self
            .gateway
            .backend_target(account, pop3.backend_security, pop3.backend_timeout)
            .await?;

        self.log(&format!("connect to {}", target.address));
        let mut backend = Pop3Backend::connect(&target).await?;
        if backend.login(&account.user, password).await? {
            Ok(backend)
        } else {
            if let Err(error) = backend.quit().await {
                tracing::debug!(%error, "backend not closed cleanly");
            }
            anyhow::bail!("backend refused the credentials")
        }
    }

    async fn proxy(&mut self, command: &str, multiline: bool) -> String {
        let Some(backend) = self.backend.as_mut() else {
            return WRONG_STATE.to_string();
        };
        let response = if multiline {
            backend.multiline(command).await
        } else {
            backend.command(command).await
        };
        match response {
            Ok(response) => String::from_utf8_lossy(&response.to_wire(multiline)).into_owned(),
            Err(error) => self.backend_lost(&error),
        }
    }

    /// the message as sent to the client, or the error response
    async fn on_retr(&mut self, number: &str) -> Result<Vec<u8>, String> {
        let Some(backend) = self.backend.as_mut() else {
            return Err(WRONG_STATE.to_string());
        };
        let response: Pop3Response = match backend.multiline(&format!("RETR {number}")).await {
            Ok(response) if response.is_ok() => response,
            Ok(response) => return Err(format!("{}\r\n", response.status)),
            Err(error) => return Err(self.backend_lost(&error)),
        };

        let mailbox = self
            .account
            .as_ref()
            .map(|account| account.user.as_str())
            .and_then(|user| Address::new(user).ok());
        let Some(mailbox) = mailbox else {
            self.log("the account user is not a mail address");
            return Err(TECHNICAL_ERROR.to_string());
        };

        match self
            .gateway
            .inbound
            .decrypt_verify(&mut self.context, &mailbox, &response.content())
            .await
        {
            Ok(retrieved) => {
                self.log(match &retrieved {
                    Retrieved::PassThrough(_) => "message passed through",
                    Retrieved::Decrypted(_) => "message decrypted",
                    Retrieved::DecryptionFailed(_) => "message not decrypted",
                    Retrieved::VerificationFailed(_) => "message not verified",
                });
                let content = retrieved.into_bytes();
                let mut out = format!("+OK {} octets\r\n", content.len()).into_bytes();
                out.extend_from_slice(&stuff(&content));
                out.extend_from_slice(b".\r\n");
                Ok(out)
            }
            Err(error) => {
                tracing::warn!(session_id = %self.id(), %error, "inbound pipeline failed");
                self.log(&format!("RETR ends - {error}"));
                Err(TECHNICAL_ERROR.to_string())
            }
        }
    }

    async fn on_quit(&mut self) -> String {
        if let Some(mut backend) = self.backend.take() {
            match backend.quit().await {
                Ok(response) if !response.is_ok() => {
                    self.log(&format!("backend QUIT: {}", response.status));
                    return format!("{}\r\n", response.status);
                }
                Ok(_) => {}
                Err(error) => {
                    self.log(&format!("backend QUIT failed: {error}"));
                    return TECHNICAL_ERROR.to_string();
                }
            }
        }
        "+OK Logging out.\r\n".to_string()
    }
}
