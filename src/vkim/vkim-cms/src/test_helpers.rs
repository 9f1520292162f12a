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
    der::{self, tag, Encoding},
    oid, parse_auth_enveloped, CmsError,
};

/// key of the reversible transform standing for the content encryption
const SEAL_KEY: u8 = 0x5A;

fn name(common_name: &str) -> Result<Vec<u8>, CmsError> {
    Ok(der::sequence(
        &[der::set_of(
            &[der::sequence(
                &[der::oid(oid::COMMON_NAME)?, der::utf8_string(common_name)],
                Encoding::Der,
            )],
            Encoding::Der,
        )],
        Encoding::Der,
    ))
}

fn algorithm(dotted: &str, with_null: bool) -> Result<Vec<u8>, CmsError> {
    let mut children = vec![der::oid(dotted)?];
    if with_null {
        children.push(der::null());
    }
    Ok(der::sequence(&children, Encoding::Der))
}

fn bit_string(content: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0];
    bytes.extend_from_slice(content);
    der::tlv(tag::BIT_STRING, &bytes)
}

fn extension(dotted: &str, value: &[u8]) -> Result<Vec<u8>, CmsError> {
    Ok(der::sequence(
        &[der::oid(dotted)?, der::octet_string(value)],
        Encoding::Der,
    ))
}

/// Builder of minimal X.509 v3 certificates. The signature is not valid,
/// nothing in the gateway verifies it.
#[derive(Debug, Clone)]
pub struct CertificateBuilder {
    common_name: String,
    issuer: String,
    serial: u64,
    emails: Vec<String>,
    registration_numbers: Vec<String>,
    admission: bool,
    ecc: bool,
}

impl CertificateBuilder {
    /// an rsa certificate issued by "TEST-CA" with an empty admission
    #[must_use]
    pub fn new(common_name: &str) -> Self {
        Self {
            common_name: common_name.to_string(),
            issuer: "TEST-CA".to_string(),
            serial: 1,
            emails: vec![],
            registration_numbers: vec![],
            admission: true,
            ecc: false,
        }
    }

    ///
    #[must_use]
    pub fn issuer(mut self, issuer: &str) -> Self {
        self.issuer = issuer.to_string();
        self
    }

    ///
    #[must_use]
    pub const fn serial(mut self, serial: u64) -> Self {
        self.serial = serial;
        self
    }

    /// add an rfc822 alternative name
    #[must_use]
    pub fn email(mut self, email: &str) -> Self {
        self.emails.push(email.to_string());
        self
    }

    /// add a profession info carrying `number`
    #[must_use]
    pub fn registration_number(mut self, number: &str) -> Self {
        self.registration_numbers.push(number.to_string());
        self
    }

    /// produce no admission extension at all
    #[must_use]
    pub const fn without_admission(mut self) -> Self {
        self.admission = false;
        self
    }

    /// use an elliptic-curve (prime256v1) subject public key
    #[must_use]
    pub const fn ecc(mut self) -> Self {
        self.ecc = true;
        self
    }

    fn subject_public_key_info(&self) -> Result<Vec<u8>, CmsError> {
        if self.ecc {
            let mut point = vec![0x04];
            point.extend((0..64_u8).map(|i| i.wrapping_mul(7).wrapping_add(1)));
            Ok(der::sequence(
                &[
                    der::sequence(
                        &[der::oid(oid::EC_PUBLIC_KEY)?, der::oid(oid::PRIME256V1)?],
                        Encoding::Der,
                    ),
                    bit_string(&point),
                ],
                Encoding::Der,
            ))
        } else {
            let mut modulus = vec![0xC3];
            modulus.extend((0..63_u8).map(|i| i.wrapping_mul(13).wrapping_add(5)));
            let key = der::sequence(
                &[der::unsigned_integer(&modulus), der::small_integer(65537)],
                Encoding::Der,
            );
            Ok(der::sequence(
                &[algorithm(oid::RSA_ENCRYPTION, true)?, bit_string(&key)],
                Encoding::Der,
            ))
        }
    }

    fn admission(&self) -> Result<Vec<u8>, CmsError> {
        let profession_infos = self
            .registration_numbers
            .iter()
            .map(|number| {
                Ok(der::sequence(
                    &[
                        der::sequence(&[der::utf8_string("Arzt")], Encoding::Der),
                        der::sequence(&[der::oid("1.2.276.0.76.4.30")?], Encoding::Der),
                        der::printable_string(number),
                    ],
                    Encoding::Der,
                ))
            })
            .collect::<Result<Vec<_>, CmsError>>()?;

        Ok(der::sequence(
            &[der::sequence(
                &[der::sequence(
                    &[der::sequence(&profession_infos, Encoding::Der)],
                    Encoding::Der,
                )],
                Encoding::Der,
            )],
            Encoding::Der,
        ))
    }

    /// the DER encoded certificate
    ///
    /// # Errors
    ///
    /// * never with the builtin object identifiers
    pub fn build(&self) -> Result<Vec<u8>, CmsError> {
        let mut extensions = vec![];
        if !self.emails.is_empty() {
            let names = self
                .emails
                .iter()
                .map(|email| der::tlv(tag::CONTEXT_PRIMITIVE | 1, email.as_bytes()))
                .collect::<Vec<_>>();
            extensions.push(extension(
                oid::SUBJECT_ALT_NAME,
                &der::sequence(&names, Encoding::Der),
            )?);
        }
        if self.admission {
            extensions.push(extension(oid::ADMISSION, &self.admission()?)?);
        }

        let mut tbs = vec![
            der::explicit(0, &der::small_integer(2), Encoding::Der),
            der::small_integer(self.serial),
            algorithm(oid::SHA256_WITH_RSA, true)?,
            name(&self.issuer)?,
            der::sequence(
                &[
                    der::tlv(tag::UTC_TIME, b"220101000000Z"),
                    der::tlv(tag::UTC_TIME, b"320101000000Z"),
                ],
                Encoding::Der,
            ),
            name(&self.common_name)?,
            self.subject_public_key_info()?,
        ];
        if !extensions.is_empty() {
            tbs.push(der::explicit(
                3,
                &der::sequence(&extensions, Encoding::Der),
                Encoding::Der,
            ));
        }

        Ok(der::sequence(
            &[
                der::sequence(&tbs, Encoding::Der),
                algorithm(oid::SHA256_WITH_RSA, true)?,
                bit_string(&[0x42; 32]),
            ],
            Encoding::Der,
        ))
    }
}

/// A `ContentInfo` of signed-data encapsulating `content`, signed by the
/// holder of `signer`. `Encoding::Ber` produces indefinite lengths and a
/// chunked eContent.
///
/// # Errors
///
/// * `signer` cannot be parsed
pub fn signed_data(
    content: &[u8],
    signer: &[u8],
    encoding: Encoding,
) -> Result<Vec<u8>, CmsError> {
    signed_data_with_attributes(content, signer, &[], encoding)
}

/// Same as [`signed_data`] with `signed_attributes` (each an encoded
/// `Attribute`) in the signer info.
///
/// # Errors
///
/// * `signer` cannot be parsed
pub fn signed_data_with_attributes(
    content: &[u8],
    signer: &[u8],
    signed_attributes: &[Vec<u8>],
    encoding: Encoding,
) -> Result<Vec<u8>, CmsError> {
    let e_content = match encoding {
        Encoding::Der => der::octet_string(content),
        Encoding::Ber => der::octet_string_chunked(content, 1000),
    };

    let mut signer_info = vec![
        der::small_integer(1),
        crate::issuer_and_serial(signer)?.to_der(encoding),
        algorithm(oid::SHA256, false)?,
    ];
    if !signed_attributes.is_empty() {
        signer_info.push(der::constructed(tag::CONTEXT, signed_attributes, encoding));
    }
    signer_info.push(algorithm(oid::SHA256_WITH_RSA, true)?);
    signer_info.push(der::octet_string(&[0x17; 64]));

    let signed_data = der::sequence(
        &[
            der::small_integer(1),
            der::set_of(&[algorithm(oid::SHA256, false)?], encoding),
            der::sequence(
                &[
                    der::oid(oid::DATA)?,
                    der::explicit(0, &e_content, encoding),
                ],
                encoding,
            ),
            der::constructed(tag::CONTEXT, &[signer.to_vec()], encoding),
            der::set_of(&[der::sequence(&signer_info, encoding)], encoding),
        ],
        encoding,
    );

    Ok(der::sequence(
        &[
            der::oid(oid::SIGNED_DATA)?,
            der::explicit(0, &signed_data, encoding),
        ],
        encoding,
    ))
}

/// Builder of authenticated-enveloped-data. The content is not really
/// encrypted, [`open`] reverses the transform.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    recipients: Vec<Vec<u8>>,
    subject_key_identifiers: bool,
    unauth_attributes: Vec<Vec<u8>>,
    legacy: bool,
    encoding: Encoding,
}

impl Default for EnvelopeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeBuilder {
    ///
    #[must_use]
    pub const fn new() -> Self {
        Self {
            recipients: vec![],
            subject_key_identifiers: false,
            unauth_attributes: vec![],
            legacy: false,
            encoding: Encoding::Der,
        }
    }

    /// key transport for an rsa certificate, key agreement for an ecc one
    #[must_use]
    pub fn recipient(mut self, certificate: &[u8]) -> Self {
        self.recipients.push(certificate.to_vec());
        self
    }

    /// designate the recipients by subject key identifier
    #[must_use]
    pub const fn with_subject_key_identifiers(mut self) -> Self {
        self.subject_key_identifiers = true;
        self
    }

    /// an encoded `Attribute`
    #[must_use]
    pub fn unauth_attribute(mut self, attribute: Vec<u8>) -> Self {
        self.unauth_attributes.push(attribute);
        self
    }

    /// use the enveloped-data content type
    #[must_use]
    pub const fn legacy(mut self) -> Self {
        self.legacy = true;
        self
    }

    ///
    #[must_use]
    pub const fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    fn recipient_info(&self, certificate: &[u8]) -> Result<Vec<u8>, CmsError> {
        let issuer_and_serial = crate::issuer_and_serial(certificate)?;
        let encoding = self.encoding;
        let encrypted_key = der::octet_string(&[0x33; 32]);

        if crate::is_ecc(certificate)? {
            let rid = if self.subject_key_identifiers {
                der::constructed(
                    tag::CONTEXT,
                    &[der::octet_string(&issuer_and_serial.serial)],
                    encoding,
                )
            } else {
                issuer_and_serial.to_der(encoding)
            };
            let originator_key = der::constructed(
                tag::CONTEXT | 1,
                &[
                    algorithm(oid::EC_PUBLIC_KEY, false)?,
                    bit_string(&[0x04; 65]),
                ],
                encoding,
            );
            Ok(der::constructed(
                tag::CONTEXT | 1,
                &[
                    der::small_integer(3),
                    der::explicit(0, &originator_key, encoding),
                    der::sequence(
                        &[
                            der::oid(oid::ECDH_SHA256_KDF)?,
                            algorithm(oid::AES256_WRAP, false)?,
                        ],
                        encoding,
                    ),
                    der::sequence(&[der::sequence(&[rid, encrypted_key], encoding)], encoding),
                ],
                encoding,
            ))
        } else {
            let (version, rid) = if self.subject_key_identifiers {
                (
                    2,
                    der::tlv(tag::CONTEXT_PRIMITIVE, &issuer_and_serial.serial),
                )
            } else {
                (0, issuer_and_serial.to_der(encoding))
            };
            Ok(der::sequence(
                &[
                    der::small_integer(version),
                    rid,
                    algorithm(oid::RSA_ENCRYPTION, true)?,
                    encrypted_key,
                ],
                encoding,
            ))
        }
    }

    /// the `ContentInfo` sealing `content`
    ///
    /// # Errors
    ///
    /// * a recipient certificate cannot be parsed
    pub fn build(&self, content: &[u8]) -> Result<Vec<u8>, CmsError> {
        let encoding = self.encoding;
        let sealed = content.iter().map(|b| b ^ SEAL_KEY).collect::<Vec<_>>();

        let recipient_infos = self
            .recipients
            .iter()
            .map(|certificate| self.recipient_info(certificate))
            .collect::<Result<Vec<_>, _>>()?;

        let encrypted_content = match encoding {
            Encoding::Der => der::tlv(tag::CONTEXT_PRIMITIVE, &sealed),
            Encoding::Ber => der::constructed(
                tag::CONTEXT,
                &sealed.chunks(1000).map(der::octet_string).collect::<Vec<_>>(),
                Encoding::Ber,
            ),
        };

        let mut data = vec![
            der::small_integer(0),
            der::set_of(&recipient_infos, encoding),
            der::sequence(
                &[
                    der::oid(oid::DATA)?,
                    der::sequence(
                        &[der::oid(oid::AES256_GCM)?, der::octet_string(&[0; 12])],
                        encoding,
                    ),
                    encrypted_content,
                ],
                encoding,
            ),
            der::octet_string(&[0x4D; 16]),
        ];
        if !self.unauth_attributes.is_empty() {
            data.push(der::constructed(
                tag::CONTEXT | 2,
                &self.unauth_attributes,
                encoding,
            ));
        }

        let content_type = if self.legacy {
            oid::ENVELOPED_DATA
        } else {
            oid::AUTH_ENVELOPED_DATA
        };
        Ok(der::sequence(
            &[
                der::oid(content_type)?,
                der::explicit(0, &der::sequence(&data, encoding), encoding),
            ],
            encoding,
        ))
    }
}

/// Reverse [`EnvelopeBuilder::build`].
///
/// # Errors
///
/// * `envelope` is not an authenticated-enveloped-data
pub fn open(envelope: &[u8]) -> Result<Vec<u8>, CmsError> {
    Ok(parse_auth_enveloped(envelope)?
        .encrypted_content
        .iter()
        .map(|b| b ^ SEAL_KEY)
        .collect())
}
