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

use crate::TlsFile;

pub fn deserialize<'de, D>(deserializer: D) -> Result<TlsFile<rustls::PrivateKey>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = <String as serde::Deserialize>::deserialize(deserializer)?;
    let pem = super::tls_certificate::read_pem::<D::Error>(&value)?;

    let mut reader = std::io::Cursor::new(pem);
    while let Some(item) = rustls_pemfile::read_one(&mut reader).map_err(serde::de::Error::custom)? {
        match item {
            rustls_pemfile::Item::RSAKey(key)
            | rustls_pemfile::Item::PKCS8Key(key)
            | rustls_pemfile::Item::ECKey(key) => {
                return Ok(TlsFile {
                    inner: rustls::PrivateKey(key),
                    path: value.into(),
                })
            }
            _ => continue,
        }
    }

    Err(serde::de::Error::custom(format!(
        "no private key found in '{value}'"
    )))
}
