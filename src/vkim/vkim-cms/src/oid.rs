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

//! Object identifiers, in dotted notation

/// id-data
pub const DATA: &str = "1.2.840.113549.1.7.1";
/// id-signedData
pub const SIGNED_DATA: &str = "1.2.840.113549.1.7.2";
/// id-envelopedData, the format used before the authenticated envelope
pub const ENVELOPED_DATA: &str = "1.2.840.113549.1.7.3";
/// id-ct-authEnvelopedData
pub const AUTH_ENVELOPED_DATA: &str = "1.2.840.113549.1.9.16.1.23";
/// recipient-emails attribute of the KOM-LE profile
pub const RECIPIENT_EMAILS: &str = "1.2.276.0.76.4.173";
/// id-isismtt-at-admission
pub const ADMISSION: &str = "1.3.36.8.3.3";
/// id-ecPublicKey
pub const EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
/// prime256v1
pub const PRIME256V1: &str = "1.2.840.10045.3.1.7";
/// brainpoolP256r1
pub const BRAINPOOL_P256R1: &str = "1.3.36.3.3.2.8.1.1.7";
/// rsaEncryption
pub const RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
/// sha256WithRSAEncryption
pub const SHA256_WITH_RSA: &str = "1.2.840.113549.1.1.11";
/// ecdsa-with-SHA256
pub const ECDSA_WITH_SHA256: &str = "1.2.840.10045.4.3.2";
/// id-sha256
pub const SHA256: &str = "2.16.840.1.101.3.4.2.1";
/// id-aes256-GCM
pub const AES256_GCM: &str = "2.16.840.1.101.3.4.1.46";
/// id-aes256-wrap
pub const AES256_WRAP: &str = "2.16.840.1.101.3.4.1.45";
/// dhSinglePass-stdDH-sha256kdf-scheme
pub const ECDH_SHA256_KDF: &str = "1.3.132.1.11.1";
/// subjectAltName
pub const SUBJECT_ALT_NAME: &str = "2.5.29.17";
/// commonName
pub const COMMON_NAME: &str = "2.5.4.3";
