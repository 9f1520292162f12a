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
    der::Encoding, extract_signed_payload, oid, recipient_emails,
    test_helpers::{signed_data, signed_data_with_attributes, CertificateBuilder},
    CmsError, SignedData,
};
use vkim_common::message::{encode_base64_wrapped, RawMessage};

fn pkcs7_part(content_type: &str, body: &[u8]) -> RawMessage {
    let mut part = RawMessage::parse(b"\r\n");
    part.set_header("Content-Type", content_type);
    part.set_header("Content-Transfer-Encoding", "base64");
    part.set_body(encode_base64_wrapped(body).into_bytes());
    part
}

#[test]
fn both_strategies_in_both_encodings() {
    let signer = CertificateBuilder::new("signer").build().unwrap();
    let content = "Subject: hi\r\n\r\nbody\r\n".repeat(300).into_bytes();

    for encoding in [Encoding::Der, Encoding::Ber] {
        let part = pkcs7_part(
            "application/pkcs7-mime; smime-type=signed-data; name=smime.p7m",
            &signed_data(&content, &signer, encoding).unwrap(),
        );
        for streaming in [true, false] {
            pretty_assertions::assert_eq!(
                extract_signed_payload(&part, streaming).unwrap(),
                Some(content.clone())
            );
        }
    }
}

#[test]
fn other_media_type() {
    let part = pkcs7_part("text/plain", b"not cms");
    pretty_assertions::assert_eq!(extract_signed_payload(&part, true).unwrap(), None);
    pretty_assertions::assert_eq!(extract_signed_payload(&part, false).unwrap(), None);
}

#[test]
fn broken_transfer_encoding() {
    let mut part = pkcs7_part("application/x-pkcs7-mime", b"");
    part.set_body(b"#### not base64 ####".to_vec());

    assert!(matches!(
        extract_signed_payload(&part, true),
        Err(CmsError::TransferEncoding(_))
    ));
}

#[test]
fn malformed_signed_data() {
    let part = pkcs7_part("application/pkcs7-mime", &[0x30, 0x03, 0x06, 0x01, 0x00]);
    assert!(extract_signed_payload(&part, true).is_err());
    assert!(extract_signed_payload(&part, false).is_err());
}

#[test]
fn signed_data_fields() {
    let signer = CertificateBuilder::new("signer").serial(99).build().unwrap();
    let recipient = CertificateBuilder::new("bob").serial(5).build().unwrap();
    let attribute = crate::der::sequence(
        &[
            crate::der::oid(oid::RECIPIENT_EMAILS).unwrap(),
            crate::der::set_of(
                &[crate::der::sequence(
                    &[
                        crate::der::ia5_string("bob@kim.test"),
                        crate::issuer_and_serial(&recipient)
                            .unwrap()
                            .to_der(Encoding::Der),
                    ],
                    Encoding::Der,
                )],
                Encoding::Der,
            ),
        ],
        Encoding::Der,
    );

    let data = SignedData::parse(
        &signed_data_with_attributes(b"payload", &signer, &[attribute], Encoding::Ber).unwrap(),
    )
    .unwrap();

    pretty_assertions::assert_eq!(data.version, 1);
    pretty_assertions::assert_eq!(data.digest_algorithms, vec![oid::SHA256.to_string()]);
    pretty_assertions::assert_eq!(data.content_type, oid::DATA);
    pretty_assertions::assert_eq!(data.content.as_deref(), Some(&b"payload"[..]));
    pretty_assertions::assert_eq!(data.certificates, vec![signer.clone()]);
    pretty_assertions::assert_eq!(data.signer_infos.len(), 1);
    pretty_assertions::assert_eq!(
        data.signer_infos[0].sid,
        crate::RecipientIdentifier::IssuerAndSerial(crate::issuer_and_serial(&signer).unwrap())
    );

    let emails = data.recipient_emails().unwrap();
    pretty_assertions::assert_eq!(
        emails,
        recipient_emails(&data.signer_infos[0].signed_attributes).unwrap()
    );
    pretty_assertions::assert_eq!(emails[0].0, "bob@kim.test");
}
