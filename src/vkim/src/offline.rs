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

use vkim_common::re::anyhow;
use vkim_pipeline::{Card, Connector, Directory, DirectoryEntry, VerificationReport};

/// [`Directory`] used when no directory client is linked, every search fails.
#[derive(Debug, Default)]
pub struct OfflineDirectory;

#[async_trait::async_trait]
impl Directory for OfflineDirectory {
    async fn search(
        &self,
        _: &str,
        query: &str,
        _: bool,
        _: bool,
    ) -> anyhow::Result<Vec<DirectoryEntry>> {
        anyhow::bail!("no directory client available to search '{query}'")
    }
}

/// [`Connector`] used when no connector client is linked, every call fails.
#[derive(Debug)]
pub struct OfflineConnector {
    ecc_encryption_available: bool,
}

impl OfflineConnector {
    ///
    #[must_use]
    pub const fn new(ecc_encryption_available: bool) -> Self {
        Self {
            ecc_encryption_available,
        }
    }
}

#[async_trait::async_trait]
impl Connector for OfflineConnector {
    async fn cards(&self) -> anyhow::Result<Vec<Card>> {
        anyhow::bail!("no connector client available")
    }

    async fn sign(&self, _: &str, _: &[u8]) -> anyhow::Result<Vec<u8>> {
        anyhow::bail!("no connector client available")
    }

    async fn encrypt(&self, _: &[Vec<u8>], _: &[u8], _: &[Vec<u8>]) -> anyhow::Result<Vec<u8>> {
        anyhow::bail!("no connector client available")
    }

    async fn decrypt(&self, _: &str, _: &[u8]) -> anyhow::Result<Vec<u8>> {
        anyhow::bail!("no connector client available")
    }

    async fn verify(&self, _: &str, _: &[u8]) -> anyhow::Result<VerificationReport> {
        anyhow::bail!("no connector client available")
    }

    fn ecc_encryption_available(&self) -> bool {
        self.ecc_encryption_available
    }
}
