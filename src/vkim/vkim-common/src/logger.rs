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

use crate::MessageLedgers;

/// protocol served by a session, used to name its log
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum SessionKind {
    ///
    Smtp,
    ///
    Pop3,
}

/// Protocol log of one session.
///
/// Shared between the session and the [`LoggerRegistry`], lines are appended
/// by the session only.
#[derive(Debug)]
pub struct SessionLogger {
    id: String,
    kind: SessionKind,
    lines: std::sync::Mutex<Vec<String>>,
}

impl SessionLogger {
    fn new(kind: SessionKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            lines: std::sync::Mutex::new(vec![]),
        }
    }

    ///
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    ///
    #[must_use]
    pub const fn kind(&self) -> SessionKind {
        self.kind
    }

    ///
    pub fn log_line(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::trace!(session_id = %self.id, "{line}");
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line),
            Err(poisoned) => poisoned.into_inner().push(line),
        }
    }

    /// a copy of every line logged so far
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// `smtp-<id>.log` or `pop3-<id>.log`
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}-{}.log", self.kind.as_ref(), self.id)
    }
}

/// Keyed registry of the active session loggers.
///
/// Insert on session creation, remove on session cleanup. Safe to use from
/// concurrent sessions.
#[derive(Debug, Default)]
pub struct LoggerRegistry {
    loggers: std::sync::RwLock<std::collections::HashMap<String, std::sync::Arc<SessionLogger>>>,
    session_dir: Option<std::path::PathBuf>,
}

impl LoggerRegistry {
    /// `session_dir`: where the logs are written when removed, nothing is written if `None`
    #[must_use]
    pub fn new(session_dir: Option<std::path::PathBuf>) -> Self {
        Self {
            loggers: std::sync::RwLock::default(),
            session_dir,
        }
    }

    /// create and register a logger with a fresh id
    pub fn create(&self, kind: SessionKind) -> std::sync::Arc<SessionLogger> {
        let logger = std::sync::Arc::new(SessionLogger::new(kind));
        let mut loggers = match self.loggers.write() {
            Ok(loggers) => loggers,
            Err(poisoned) => poisoned.into_inner(),
        };
        loggers.insert(logger.id.clone(), logger.clone());
        logger
    }

    ///
    #[must_use]
    pub fn get(&self, id: &str) -> Option<std::sync::Arc<SessionLogger>> {
        match self.loggers.read() {
            Ok(loggers) => loggers.get(id).cloned(),
            Err(poisoned) => poisoned.into_inner().get(id).cloned(),
        }
    }

    /// unregister the logger, and write it in the session directory if configured
    pub fn remove(&self, id: &str) -> Option<std::sync::Arc<SessionLogger>> {
        let removed = match self.loggers.write() {
            Ok(mut loggers) => loggers.remove(id),
            Err(poisoned) => poisoned.into_inner().remove(id),
        }?;

        if let Some(dir) = &self.session_dir {
            if let Err(error) = Self::write(dir, &removed) {
                tracing::warn!(session_id = %id, %error, "could not write the session log");
            }
        }
        Some(removed)
    }

    fn write(dir: &std::path::Path, logger: &SessionLogger) -> std::io::Result<()> {
        if !dir.exists() {
            std::fs::DirBuilder::new().recursive(true).create(dir)?;
        }
        let mut content = logger.lines().join("\n");
        content.push('\n');
        std::fs::write(dir.join(logger.file_name()), content)
    }

    /// number of active sessions
    #[must_use]
    pub fn len(&self) -> usize {
        match self.loggers.read() {
            Ok(loggers) => loggers.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    ///
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a session knows about itself while it runs: its logger, the backend
/// account it proxies for, and the ledgers of the message being processed.
#[derive(Debug)]
pub struct LoggerContext {
    logger: std::sync::Arc<SessionLogger>,
    log_personal_information: bool,
    /// user name on the backend
    pub mail_server_username: Option<String>,
    /// backend host, as given by the client
    pub mail_server_host: Option<String>,
    ///
    pub mail_server_port: Option<u16>,
    /// ledgers of the message being processed
    pub ledgers: MessageLedgers,
}

impl LoggerContext {
    ///
    #[must_use]
    pub fn new(logger: std::sync::Arc<SessionLogger>, log_personal_information: bool) -> Self {
        Self {
            logger,
            log_personal_information,
            mail_server_username: None,
            mail_server_host: None,
            mail_server_port: None,
            ledgers: MessageLedgers::default(),
        }
    }

    ///
    #[must_use]
    pub fn logger(&self) -> &std::sync::Arc<SessionLogger> {
        &self.logger
    }

    ///
    #[must_use]
    pub fn session_id(&self) -> &str {
        self.logger.id()
    }

    /// append a timestamped line, prefixed with the backend account
    pub fn log(&self, content: &str) {
        let mut line = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();

        if self.log_personal_information {
            if let Some(user) = &self.mail_server_username {
                line.push(' ');
                line.push_str(user);
            }
        }
        if let Some(host) = &self.mail_server_host {
            line.push(' ');
            line.push_str(host);
        }
        if let Some(port) = &self.mail_server_port {
            line.push(' ');
            line.push_str(&port.to_string());
        }
        line.push(' ');
        line.push_str(content);
        self.logger.log_line(line);
    }
}

#[cfg(test)]
mod tests {
    use super::{LoggerContext, LoggerRegistry, SessionKind};

    #[test]
    fn insert_and_remove() {
        let registry = LoggerRegistry::new(None);
        let a = registry.create(SessionKind::Smtp);
        let b = registry.create(SessionKind::Pop3);
        assert_ne!(a.id(), b.id());
        pretty_assertions::assert_eq!(registry.len(), 2);

        assert!(registry.remove(a.id()).is_some());
        assert!(registry.remove(a.id()).is_none());
        assert!(registry.get(b.id()).is_some());
        pretty_assertions::assert_eq!(registry.len(), 1);
    }

    #[test]
    fn written_on_removal() {
        let dir = std::env::temp_dir().join(format!("vkim-logs-{}", std::process::id()));
        let registry = LoggerRegistry::new(Some(dir.clone()));
        let logger = registry.create(SessionKind::Pop3);

        let mut context = LoggerContext::new(logger.clone(), false);
        context.mail_server_username = Some("john".to_string());
        context.mail_server_host = Some("mx.kim.de".to_string());
        context.log("user begins");

        let line = &logger.lines()[0];
        assert!(line.ends_with(" mx.kim.de user begins"), "{line}");
        assert!(!line.contains("john"));

        registry.remove(logger.id());
        let written = std::fs::read_to_string(dir.join(logger.file_name())).unwrap();
        assert!(written.contains("user begins"));
        assert!(logger.file_name().starts_with("pop3-"));
        std::fs::remove_dir_all(dir).unwrap();
    }
}
