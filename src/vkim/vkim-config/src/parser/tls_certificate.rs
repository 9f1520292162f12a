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

/// the content of `value` if it is a path to a file, `value` itself otherwise
pub fn read_pem<E: serde::de::Error>(value: &str) -> Result<Vec<u8>, E> {
    let path = std::path::Path::new(value);
    if path.exists() {
        std::fs::read(path).map_err(|e| E::custom(format!("'{}': {e}", path.display())))
    } else {
        Ok(value.as_bytes().to_vec())
    }
}

fn certificates<E: serde::de::Error>(value: &str) -> Result<Vec<rustls::Certificate>, E> {
    let pem = read_pem::<E>(value)?;
    let certificates = rustls_pemfile::certs(&mut std::io::Cursor::new(pem))
        .map_err(E::custom)?
        .into_iter()
        .map(rustls::Certificate)
        .collect::<Vec<_>>();

    if certificates.is_empty() {
        return Err(E::custom(format!("no certificate found in '{value}'")));
    }
    Ok(certificates)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<TlsFile<rustls::Certificate>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = <String as serde::Deserialize>::deserialize(deserializer)?;
    let mut certificates = certificates::<D::Error>(&value)?;
    Ok(TlsFile {
        inner: certificates.swap_remove(0),
        path: value.into(),
    })
}

pub fn deserialize_opt_chain<'de, D>(
    deserializer: D,
) -> Result<Option<TlsFile<Vec<rustls::Certificate>>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = <Option<String> as serde::Deserialize>::deserialize(deserializer)?;
    value.as_deref().map(load_chain::<D::Error>).transpose()
}

/// every certificate of `value`, a path or PEM content
pub fn load_chain<E: serde::de::Error>(
    value: &str,
) -> Result<TlsFile<Vec<rustls::Certificate>>, E> {
    Ok(TlsFile {
        inner: certificates::<E>(value)?,
        path: value.into(),
    })
}
