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

/// Version of the KIM profile, as written in `X-KOM-LE-Version` and in the
/// directory entries.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::EnumString,
    strum::AsRefStr,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum KimVersion {
    ///
    #[strum(serialize = "1.0")]
    #[serde(rename = "1.0")]
    V1_0,
    ///
    #[strum(serialize = "1.5")]
    #[serde(rename = "1.5")]
    V1_5,
    ///
    #[strum(serialize = "1.5+")]
    #[serde(rename = "1.5+")]
    V1_5Plus,
}

impl KimVersion {
    /// parse a header or directory value, surrounding spaces are ignored
    ///
    /// # Errors
    ///
    /// * not one of `1.0`, `1.5`, `1.5+`
    pub fn parse(value: &str) -> Result<Self, crate::GatewayError> {
        <Self as std::str::FromStr>::from_str(value.trim()).map_err(|_| {
            crate::GatewayError::InvalidArgument(format!("'{value}' is not a KIM version"))
        })
    }

    /// `other` is strictly newer than `own`
    #[must_use]
    pub fn is_newer(own: Self, other: Self) -> bool {
        own < other
    }
}

impl std::fmt::Display for KimVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::KimVersion;

    #[test]
    fn ordering() {
        assert!(KimVersion::is_newer(KimVersion::V1_0, KimVersion::V1_5));
        assert!(KimVersion::is_newer(KimVersion::V1_5, KimVersion::V1_5Plus));
        assert!(!KimVersion::is_newer(KimVersion::V1_5Plus, KimVersion::V1_5Plus));
        assert!(!KimVersion::is_newer(KimVersion::V1_5Plus, KimVersion::V1_0));
    }

    #[test]
    fn parse() {
        pretty_assertions::assert_eq!(KimVersion::parse(" 1.5+ ").unwrap(), KimVersion::V1_5Plus);
        pretty_assertions::assert_eq!(KimVersion::parse("1.0").unwrap().to_string(), "1.0");
        assert!(KimVersion::parse("2.0").is_err());
        assert!(KimVersion::parse("").is_err());
    }
}
