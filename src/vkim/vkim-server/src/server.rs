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
    connection::Connection,
    pop3,
    session::Gateway,
    smtp,
};
use vkim_common::{
    logger::SessionKind,
    re::{anyhow, tracing},
};

/// Connections accepted and not closed yet, in total and per peer.
#[derive(Debug, Default)]
struct ClientCounter {
    total: std::sync::atomic::AtomicI64,
    per_ip: std::sync::Mutex<std::collections::HashMap<std::net::IpAddr, i64>>,
}

impl ClientCounter {
    fn per_ip(
        &self,
    ) -> std::sync::MutexGuard<'_, std::collections::HashMap<std::net::IpAddr, i64>> {
        match self.per_ip.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// count a new client, `false` if a limit is reached, -1 disables a limit
    fn acquire(&self, ip: std::net::IpAddr, max: i64, max_per_ip: i64) -> bool {
        if max != -1 && self.total.load(std::sync::atomic::Ordering::SeqCst) >= max {
            return false;
        }

        let mut per_ip = self.per_ip();
        let count = per_ip.entry(ip).or_insert(0);
        if max_per_ip != -1 && *count >= max_per_ip {
            return false;
        }
        *count += 1;
        self.total.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        true
    }

    fn release(&self, ip: std::net::IpAddr) {
        let mut per_ip = self.per_ip();
        if let Some(count) = per_ip.get_mut(&ip) {
            *count -= 1;
            if *count <= 0 {
                per_ip.remove(&ip);
            }
        }
        self.total.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
    }
}

/// TCP/IP server of the gateway, SMTP and POP3
pub struct ServerVKIM {
    listener_smtp: tokio::net::TcpListener,
    listener_pop3: tokio::net::TcpListener,
    gateway: std::sync::Arc<Gateway>,
}

impl std::fmt::Debug for ServerVKIM {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerVKIM")
            .field("smtp", &self.listener_smtp.local_addr().ok())
            .field("pop3", &self.listener_pop3.local_addr().ok())
            .field("gateway", &self.gateway)
            .finish()
    }
}

impl ServerVKIM {
    /// Create a server with the gateway provided, and the sockets already bound
    ///
    /// # Errors
    ///
    /// * cannot convert sockets to [`tokio::net::TcpListener`]
    pub fn new(
        gateway: std::sync::Arc<Gateway>,
        sockets: (std::net::TcpListener, std::net::TcpListener),
    ) -> anyhow::Result<Self> {
        sockets.0.set_nonblocking(true)?;
        sockets.1.set_nonblocking(true)?;

        Ok(Self {
            listener_smtp: tokio::net::TcpListener::from_std(sockets.0)?,
            listener_pop3: tokio::net::TcpListener::from_std(sockets.1)?,
            gateway,
        })
    }

    /// Get the local addresses of the smtp and pop3 listeners
    ///
    /// # Errors
    ///
    /// * the sockets are not bound anymore
    pub fn addr(&self) -> std::io::Result<(std::net::SocketAddr, std::net::SocketAddr)> {
        Ok((
            self.listener_smtp.local_addr()?,
            self.listener_pop3.local_addr()?,
        ))
    }

    /// Main loop of vKIM's server
    ///
    /// # Errors
    ///
    /// * never returns in normal operation
    pub async fn listen_and_serve(&mut self) -> anyhow::Result<()> {
        let client_counter = std::sync::Arc::new(ClientCounter::default());
        let (max, max_per_ip) = (
            self.gateway.config.gateway.client_count_max,
            self.gateway.config.gateway.client_count_per_ip_max,
        );

        loop {
            let (mut stream, client_addr, kind) = tokio::select! {
                Ok((stream, client_addr)) = self.listener_smtp.accept() => {
                    (stream, client_addr, SessionKind::Smtp)
                }
                Ok((stream, client_addr)) = self.listener_pop3.accept() => {
                    (stream, client_addr, SessionKind::Pop3)
                }
            };
            tracing::info!(kind = %kind.as_ref(), client = %client_addr, "connection accepted");

            if !client_counter.acquire(client_addr.ip(), max, max_per_ip) {
                tracing::warn!(client = %client_addr, "connection refused, too many clients");
                let refusal: &[u8] = match kind {
                    SessionKind::Smtp => b"421 4.7.0 too many connections\r\n",
                    SessionKind::Pop3 => b"-ERR too many connections\r\n",
                };
                if let Err(e) = tokio::io::AsyncWriteExt::write_all(&mut stream, refusal).await {
                    tracing::warn!("{}", e);
                }
                if let Err(e) = tokio::io::AsyncWriteExt::shutdown(&mut stream).await {
                    tracing::warn!("{}", e);
                }
                continue;
            }

            let session = Self::run_session(stream, client_addr, kind, self.gateway.clone());
            let client_counter_copy = client_counter.clone();
            tokio::spawn(async move {
                if let Err(e) = session.await {
                    tracing::warn!("{}", e);
                }

                client_counter_copy.release(client_addr.ip());
            });
        }
    }

    pub(crate) async fn run_session(
        stream: tokio::net::TcpStream,
        client_addr: std::net::SocketAddr,
        kind: SessionKind,
        gateway: std::sync::Arc<Gateway>,
    ) -> anyhow::Result<()> {
        let begin = std::time::SystemTime::now();
        tracing::info!(client = %client_addr, "handling client");

        let conn = Connection::new(kind, client_addr, gateway.config.clone(), stream);
        match kind {
            SessionKind::Smtp => smtp::handle_connection(conn, gateway).await,
            SessionKind::Pop3 => pop3::handle_connection(conn, gateway).await,
        }
        .map(|_| {
            tracing::info!(
                elapsed = ?begin.elapsed(),
                client = %client_addr,
                "connection closed cleanly"
            );
        })
        .map_err(|error| {
            tracing::error!(
                elapsed = ?begin.elapsed(),
                client = %client_addr,
                %error,
                "connection closed with an error"
            );
            error
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ClientCounter;

    #[test]
    fn limits() {
        let counter = ClientCounter::default();
        let (first, second) = (
            std::net::IpAddr::from([10, 0, 0, 1]),
            std::net::IpAddr::from([10, 0, 0, 2]),
        );

        assert!(counter.acquire(first, 3, 2));
        assert!(counter.acquire(first, 3, 2));
        assert!(!counter.acquire(first, 3, 2));
        assert!(counter.acquire(second, 3, 2));
        assert!(!counter.acquire(second, 3, 2));

        counter.release(first);
        assert!(counter.acquire(second, 3, 2));
        assert!(counter.per_ip().get(&first).is_some());
        counter.release(first);
        assert!(counter.per_ip().get(&first).is_none());
    }

    #[test]
    fn unlimited() {
        let counter = ClientCounter::default();
        let ip = std::net::IpAddr::from([127, 0, 0, 1]);
        for _ in 0..100 {
            assert!(counter.acquire(ip, -1, -1));
        }
    }

    #[tokio::test]
    async fn refuse_over_the_limit() {
        let mut config = vkim_config::Config::local_test();
        config.gateway.client_count_max = 0;
        let gateway = crate::test_helpers::test_gateway(config, crate::test_helpers::pipeline_doubles());

        let sockets = (
            std::net::TcpListener::bind("127.0.0.1:0").unwrap(),
            std::net::TcpListener::bind("127.0.0.1:0").unwrap(),
        );
        let mut server = super::ServerVKIM::new(gateway, sockets).unwrap();
        let (smtp, pop3) = server.addr().unwrap();
        tokio::spawn(async move { server.listen_and_serve().await });

        for (addr, expected) in [
            (smtp, "421 4.7.0 too many connections\r\n"),
            (pop3, "-ERR too many connections\r\n"),
        ] {
            let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
            let mut refusal = String::new();
            tokio::io::AsyncReadExt::read_to_string(&mut client, &mut refusal)
                .await
                .unwrap();
            pretty_assertions::assert_eq!(refusal, expected);
        }
    }
}
