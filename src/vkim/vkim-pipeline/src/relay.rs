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

use vkim_common::{re::anyhow, Address, Reply};

/// The authenticated SMTP connection to the backend of a session.
///
/// Replies of the backend are returned as is, an `Err` means the
/// connection itself failed.
#[async_trait::async_trait]
pub trait Relay: Send + Sync {
    /// `MAIL FROM`
    async fn mail_from(&mut self, from: &Address) -> anyhow::Result<Reply>;

    /// `RCPT TO`
    async fn rcpt_to(&mut self, to: &Address) -> anyhow::Result<Reply>;

    /// `DATA` followed by the content, dot-stuffing is applied
    async fn data(&mut self, content: &[u8]) -> anyhow::Result<Reply>;

    /// `RSET`
    async fn reset(&mut self) -> anyhow::Result<Reply>;

    /// `QUIT`, the connection is closed afterwards
    async fn quit(&mut self) -> anyhow::Result<()>;

    /// A whole transaction, stopping at the first negative reply.
    ///
    /// # Errors
    ///
    /// * the connection failed
    async fn send_message(
        &mut self,
        from: &Address,
        to: &[Address],
        content: &[u8],
    ) -> anyhow::Result<Reply> {
        let reply = self.mail_from(from).await?;
        if !reply.is_positive() {
            return Ok(reply);
        }
        for rcpt in to {
            let reply = self.rcpt_to(rcpt).await?;
            if !reply.is_positive() {
                self.reset().await?;
                return Ok(reply);
            }
        }
        self.data(content).await
    }
}
