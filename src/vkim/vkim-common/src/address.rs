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

use crate::GatewayError;

/// a mail address, always stored lower-cased.
///
/// The gateway compares addresses coming from the envelope, from the headers and
/// from the directory, so the canonical form is decided once here.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    full: String,
    at_sign: usize,
}

impl Address {
    /// parse an address, accepting the `<local@domain>` form of the envelope.
    ///
    /// # Errors
    ///
    /// * the input has no `@`, an empty local part or an empty domain
    pub fn new(input: &str) -> Result<Self, GatewayError> {
        let trimmed = input.trim();
        let trimmed = trimmed
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .unwrap_or(trimmed)
            .trim();

        let at_sign = trimmed
            .rfind('@')
            .ok_or_else(|| GatewayError::InvalidArgument(format!("'{input}' is not a mail address")))?;

        if at_sign == 0
            || at_sign + 1 == trimmed.len()
            || trimmed.contains(char::is_whitespace)
            || trimmed.contains(['<', '>'])
        {
            return Err(GatewayError::InvalidArgument(format!(
                "'{input}' is not a mail address"
            )));
        }

        Ok(Self {
            full: trimmed.to_lowercase(),
            at_sign,
        })
    }

    /// build an address without checking the syntax, used for trusted values.
    #[must_use]
    pub fn new_unchecked(input: String) -> Self {
        let full = input.to_lowercase();
        let at_sign = full.rfind('@').unwrap_or(full.len());
        Self { full, at_sign }
    }

    /// the whole address
    #[must_use]
    pub fn full(&self) -> &str {
        &self.full
    }

    ///
    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.full[..self.at_sign]
    }

    ///
    #[must_use]
    pub fn domain(&self) -> &str {
        self.full.get(self.at_sign + 1..).unwrap_or_default()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full)
    }
}

impl std::str::FromStr for Address {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Address {
    type Error = GatewayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.full
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.full
    }
}
