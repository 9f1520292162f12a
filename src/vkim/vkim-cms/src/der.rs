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

//! BER/DER access for the CMS and certificate structures.
//!
//! Decoding goes through `der_parser` (definite and indefinite lengths, as
//! emitted by streaming CMS toolchains), exposed as a flat [`Tlv`] view the
//! CMS walkers step through. The writer produces either length form. Only
//! low tag numbers are supported, which covers every structure the gateway
//! handles.

use std::str::FromStr;

use x509_parser::der_parser::{
    asn1_rs::{Any, FromBer, Length, Oid},
    error::BerError,
};

/// Tag of the universal types used by the gateway
pub mod tag {
    ///
    pub const INTEGER: u8 = 0x02;
    ///
    pub const BIT_STRING: u8 = 0x03;
    ///
    pub const OCTET_STRING: u8 = 0x04;
    ///
    pub const NULL: u8 = 0x05;
    ///
    pub const OID: u8 = 0x06;
    ///
    pub const UTF8_STRING: u8 = 0x0C;
    ///
    pub const PRINTABLE_STRING: u8 = 0x13;
    ///
    pub const IA5_STRING: u8 = 0x16;
    ///
    pub const UTC_TIME: u8 = 0x17;
    ///
    pub const SEQUENCE: u8 = 0x30;
    ///
    pub const SET: u8 = 0x31;
    /// bit set on constructed encodings
    pub const CONSTRUCTED: u8 = 0x20;
    /// context specific, constructed: `[n]` is `CONTEXT | n`
    pub const CONTEXT: u8 = 0xA0;
    /// context specific, primitive
    pub const CONTEXT_PRIMITIVE: u8 = 0x80;
}

/// Errors of the reader and the writer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DerError {
    /// rejected by the BER decoder
    #[error("{0}")]
    Ber(#[from] BerError),
    ///
    #[error("expected tag {expected:#04x}, found {found:#04x}")]
    UnexpectedTag {
        ///
        expected: u8,
        ///
        found: u8,
    },
    ///
    #[error("high tag numbers are not supported")]
    HighTagNumber,
    ///
    #[error("invalid object identifier")]
    InvalidOid,
    ///
    #[error("{0} bytes of trailing data")]
    TrailingData(usize),
    ///
    #[error("invalid string: {0}")]
    InvalidString(String),
}

/// One decoded tag-length-value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    /// the identifier octet
    pub tag: u8,
    /// the content octets, without the end-of-contents of an indefinite length
    pub value: &'a [u8],
    /// the full encoding, header included
    pub raw: &'a [u8],
    ///
    pub indefinite: bool,
}

impl<'a> Tlv<'a> {
    fn decode(data: &'a [u8]) -> Result<(Self, &'a [u8]), DerError> {
        let (rest, any) = Any::from_ber(data).map_err(BerError::from)?;
        if any.tag().0 > 30 {
            return Err(DerError::HighTagNumber);
        }
        let raw = &data[..data.len() - rest.len()];
        Ok((
            Self {
                tag: raw[0],
                value: any.data,
                raw,
                indefinite: any.header.length() == Length::Indefinite,
            },
            rest,
        ))
    }

    ///
    #[must_use]
    pub const fn is_constructed(&self) -> bool {
        self.tag & tag::CONSTRUCTED != 0
    }

    /// iterate on the children of a constructed encoding
    #[must_use]
    pub const fn children(&self) -> Reader<'a> {
        Reader { data: self.value }
    }

    /// the content of an OCTET STRING, joining the chunks of a constructed one
    ///
    /// # Errors
    ///
    /// * not an OCTET STRING
    /// * a chunk is malformed
    pub fn octet_string(&self) -> Result<Vec<u8>, DerError> {
        match self.tag {
            tag::OCTET_STRING => Ok(self.value.to_vec()),
            t if t == tag::OCTET_STRING | tag::CONSTRUCTED => {
                let mut out = vec![];
                for chunk in self.children() {
                    out.extend(chunk?.octet_string()?);
                }
                Ok(out)
            }
            found => Err(DerError::UnexpectedTag {
                expected: tag::OCTET_STRING,
                found,
            }),
        }
    }

    /// dotted notation of an OBJECT IDENTIFIER
    ///
    /// # Errors
    ///
    /// * not an OBJECT IDENTIFIER, or a malformed one
    pub fn oid(&self) -> Result<String, DerError> {
        if self.tag != tag::OID {
            return Err(DerError::UnexpectedTag {
                expected: tag::OID,
                found: self.tag,
            });
        }
        match self.value.last() {
            Some(last) if last & 0x80 == 0 => {}
            _ => return Err(DerError::InvalidOid),
        }
        let (_, oid) = Oid::from_ber(self.raw).map_err(BerError::from)?;
        Ok(oid.to_id_string())
    }

    /// the content of a character string (IA5, Printable, UTF8)
    ///
    /// # Errors
    ///
    /// * not valid utf8
    pub fn string(&self) -> Result<String, DerError> {
        std::str::from_utf8(self.value)
            .map(str::to_string)
            .map_err(|e| DerError::InvalidString(e.to_string()))
    }

    /// the value of a non negative INTEGER fitting on 64 bits
    ///
    /// # Errors
    ///
    /// * not an INTEGER, negative, or too large
    pub fn small_integer(&self) -> Result<u64, DerError> {
        let (_, value) = u64::from_ber(self.raw).map_err(BerError::from)?;
        Ok(value)
    }
}

/// Sequential reader over concatenated encodings
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    ///
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    ///
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// tag of the next encoding, if any
    #[must_use]
    pub fn peek_tag(&self) -> Option<u8> {
        self.data.first().copied()
    }

    /// decode the next encoding
    ///
    /// # Errors
    ///
    /// * the data is not a valid BER encoding
    pub fn read(&mut self) -> Result<Tlv<'a>, DerError> {
        let (tlv, rest) = Tlv::decode(self.data)?;
        self.data = rest;
        Ok(tlv)
    }

    /// decode the next encoding, which must have the tag `expected`
    ///
    /// # Errors
    ///
    /// * the data is not a valid BER encoding
    /// * the tag differs
    pub fn expect(&mut self, expected: u8) -> Result<Tlv<'a>, DerError> {
        let tlv = self.read()?;
        if tlv.tag == expected {
            Ok(tlv)
        } else {
            Err(DerError::UnexpectedTag {
                expected,
                found: tlv.tag,
            })
        }
    }

    /// decode the next encoding only if its tag is `expected`
    ///
    /// # Errors
    ///
    /// * the data is not a valid BER encoding
    pub fn optional(&mut self, expected: u8) -> Result<Option<Tlv<'a>>, DerError> {
        if self.peek_tag() == Some(expected) {
            self.read().map(Some)
        } else {
            Ok(None)
        }
    }

    /// ensure everything was consumed
    ///
    /// # Errors
    ///
    /// * there is data left
    pub const fn finish(&self) -> Result<(), DerError> {
        if self.data.is_empty() {
            Ok(())
        } else {
            Err(DerError::TrailingData(self.data.len()))
        }
    }
}

impl<'a> Iterator for Reader<'a> {
    type Item = Result<Tlv<'a>, DerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_empty() {
            return None;
        }
        let item = self.read();
        if item.is_err() {
            self.data = &[];
        }
        Some(item)
    }
}

/// Decode exactly one encoding from `data`.
///
/// # Errors
///
/// * the data is not a valid BER encoding, or is followed by trailing data
pub fn parse(data: &[u8]) -> Result<Tlv<'_>, DerError> {
    let mut reader = Reader::new(data);
    let tlv = reader.read()?;
    reader.finish()?;
    Ok(tlv)
}

/// Re-encode `tlv` with definite lengths only, so that two encodings of
/// the same value compare equal.
///
/// # Errors
///
/// * a nested encoding is malformed
pub fn to_definite(tlv: &Tlv<'_>) -> Result<Vec<u8>, DerError> {
    if !tlv.is_constructed() {
        return Ok(tlv.raw.to_vec());
    }
    let children = tlv
        .children()
        .map(|child| to_definite(&child?))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(self::tlv(tlv.tag, &children.concat()))
}

/// Length form of the constructed encodings produced by the writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// definite lengths, SET OF sorted
    Der,
    /// indefinite lengths for every constructed encoding
    Ber,
}

#[allow(clippy::cast_possible_truncation)]
fn encode_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let mut out = Vec::with_capacity(1 + bytes.len() - skip);
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
    out
}

/// a primitive (or definite constructed) encoding
#[must_use]
pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend(encode_length(content.len()));
    out.extend_from_slice(content);
    out
}

/// a constructed encoding of `children`, in the requested length form
#[must_use]
pub fn constructed(tag: u8, children: &[Vec<u8>], encoding: Encoding) -> Vec<u8> {
    let content = children.concat();
    match encoding {
        Encoding::Der => tlv(tag | tag::CONSTRUCTED, &content),
        Encoding::Ber => {
            let mut out = vec![tag | tag::CONSTRUCTED, 0x80];
            out.extend(content);
            out.extend([0, 0]);
            out
        }
    }
}

///
#[must_use]
pub fn sequence(children: &[Vec<u8>], encoding: Encoding) -> Vec<u8> {
    constructed(tag::SEQUENCE, children, encoding)
}

/// a SET OF, sorted on the encodings when producing DER
#[must_use]
pub fn set_of(children: &[Vec<u8>], encoding: Encoding) -> Vec<u8> {
    let mut children = children.to_vec();
    if encoding == Encoding::Der {
        children.sort();
    }
    constructed(tag::SET, &children, encoding)
}

/// `[n] EXPLICIT`
#[must_use]
pub fn explicit(n: u8, inner: &[u8], encoding: Encoding) -> Vec<u8> {
    constructed(tag::CONTEXT | n, &[inner.to_vec()], encoding)
}

///
#[must_use]
pub fn octet_string(content: &[u8]) -> Vec<u8> {
    tlv(tag::OCTET_STRING, content)
}

/// an OCTET STRING cut in chunks of `chunk` bytes, as streaming encoders do
#[must_use]
pub fn octet_string_chunked(content: &[u8], chunk: usize) -> Vec<u8> {
    let chunks = content
        .chunks(chunk.max(1))
        .map(octet_string)
        .collect::<Vec<_>>();
    constructed(tag::OCTET_STRING, &chunks, Encoding::Ber)
}

///
#[must_use]
pub fn ia5_string(value: &str) -> Vec<u8> {
    tlv(tag::IA5_STRING, value.as_bytes())
}

///
#[must_use]
pub fn utf8_string(value: &str) -> Vec<u8> {
    tlv(tag::UTF8_STRING, value.as_bytes())
}

///
#[must_use]
pub fn printable_string(value: &str) -> Vec<u8> {
    tlv(tag::PRINTABLE_STRING, value.as_bytes())
}

///
#[must_use]
pub fn null() -> Vec<u8> {
    tlv(tag::NULL, &[])
}

/// an INTEGER from its unsigned big endian magnitude
#[must_use]
pub fn unsigned_integer(magnitude: &[u8]) -> Vec<u8> {
    let skip = magnitude
        .iter()
        .take_while(|b| **b == 0)
        .count()
        .min(magnitude.len().saturating_sub(1));
    let magnitude = &magnitude[skip..];
    let mut content = Vec::with_capacity(magnitude.len() + 1);
    if magnitude.is_empty() || magnitude[0] & 0x80 != 0 {
        content.push(0);
    }
    content.extend_from_slice(magnitude);
    tlv(tag::INTEGER, &content)
}

///
#[must_use]
pub fn small_integer(value: u64) -> Vec<u8> {
    unsigned_integer(&value.to_be_bytes())
}

/// an OBJECT IDENTIFIER from its dotted notation
///
/// # Errors
///
/// * fewer than two arcs, or an arc is not a number
pub fn oid(dotted: &str) -> Result<Vec<u8>, DerError> {
    let oid = Oid::from_str(dotted).map_err(|_| DerError::InvalidOid)?;
    Ok(tlv(tag::OID, oid.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oid_both_ways() {
        for dotted in [
            "1.2.840.113549.1.9.16.1.23",
            "1.2.276.0.76.4.173",
            "2.5.29.17",
            "1.3.36.8.3.3",
        ] {
            let encoded = oid(dotted).unwrap();
            pretty_assertions::assert_eq!(parse(&encoded).unwrap().oid().unwrap(), dotted);
        }
        pretty_assertions::assert_eq!(
            oid("1.2.840.113549.1.7.2").unwrap(),
            vec![0x06, 0x09, 0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x02]
        );
        assert!(oid("42").is_err());
        assert_eq!(parse(&[0x06, 0x02, 0x2A, 0x86]).unwrap().oid(), Err(DerError::InvalidOid));
    }

    #[test]
    fn long_length() {
        let content = vec![0xAB; 300];
        let encoded = octet_string(&content);
        pretty_assertions::assert_eq!(&encoded[..4], &[0x04, 0x82, 0x01, 0x2C]);
        pretty_assertions::assert_eq!(parse(&encoded).unwrap().value, content.as_slice());
    }

    #[test]
    fn indefinite_length() {
        let inner = vec![ia5_string("a@kim.de"), small_integer(7)];
        let der = sequence(&inner, Encoding::Der);
        let ber = sequence(&inner, Encoding::Ber);

        let der = parse(&der).unwrap();
        let ber = parse(&ber).unwrap();
        assert!(!der.indefinite);
        assert!(ber.indefinite);
        pretty_assertions::assert_eq!(der.value, ber.value);

        let children = ber.children().collect::<Result<Vec<_>, _>>().unwrap();
        pretty_assertions::assert_eq!(children[0].string().unwrap(), "a@kim.de");
        pretty_assertions::assert_eq!(children[1].small_integer().unwrap(), 7);
    }

    #[test]
    fn definite_form() {
        let inner = vec![ia5_string("a@kim.de"), sequence(&[small_integer(1)], Encoding::Ber)];
        let der = sequence(&inner, Encoding::Der);
        let ber = sequence(&inner, Encoding::Ber);
        let expected = sequence(
            &[ia5_string("a@kim.de"), sequence(&[small_integer(1)], Encoding::Der)],
            Encoding::Der,
        );
        pretty_assertions::assert_eq!(to_definite(&parse(&ber).unwrap()).unwrap(), expected);
        pretty_assertions::assert_eq!(to_definite(&parse(&der).unwrap()).unwrap(), expected);
    }

    #[test]
    fn chunked_octet_string() {
        let content = b"the quick brown fox".to_vec();
        let encoded = octet_string_chunked(&content, 4);
        pretty_assertions::assert_eq!(parse(&encoded).unwrap().octet_string().unwrap(), content);
    }

    #[test]
    fn malformed() {
        // truncated content
        assert!(matches!(parse(&[0x30, 0x05, 0x02]), Err(DerError::Ber(_))));
        // indefinite length on a primitive
        assert!(matches!(parse(&[0x04, 0x80, 0, 0]), Err(DerError::Ber(_))));
        // missing end-of-contents
        assert!(matches!(parse(&[0x30, 0x80, 0x05, 0x00]), Err(DerError::Ber(_))));
        pretty_assertions::assert_eq!(parse(&[0x05, 0x00, 0x00]), Err(DerError::TrailingData(1)));
        pretty_assertions::assert_eq!(
            parse(&[0x1F, 0x81, 0x00, 0x00]),
            Err(DerError::HighTagNumber)
        );
        pretty_assertions::assert_eq!(
            Reader::new(&small_integer(1)).expect(tag::SEQUENCE),
            Err(DerError::UnexpectedTag {
                expected: tag::SEQUENCE,
                found: tag::INTEGER
            })
        );
    }

    #[test]
    fn integers() {
        pretty_assertions::assert_eq!(small_integer(0), vec![0x02, 0x01, 0x00]);
        pretty_assertions::assert_eq!(small_integer(128), vec![0x02, 0x02, 0x00, 0x80]);
        pretty_assertions::assert_eq!(unsigned_integer(&[0, 0, 1]), vec![0x02, 0x01, 0x01]);
        pretty_assertions::assert_eq!(parse(&small_integer(0x8000)).unwrap().small_integer().unwrap(), 0x8000);
        assert!(parse(&[0x02, 0x01, 0xFF]).unwrap().small_integer().is_err());
    }
}
