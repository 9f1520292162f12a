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

use super::{certificate, identity, kim_message, BOB};
use crate::format::{check_encrypted_format, is_embedded_envelope};
use vkim_cms::test_helpers::EnvelopeBuilder;
use vkim_common::{
    message::{build_multipart, RawMessage},
    CodeLedger, ErrorCode,
};
use vkim_config::Config;

fn envelope(builder: EnvelopeBuilder) -> Vec<u8> {
    let bob = certificate(BOB, 2, "5-KLINIK-Bob");
    let attribute =
        vkim_cms::build_recipient_emails_attribute(&[identity(BOB, bob.clone())], true).unwrap();
    builder
        .recipient(&bob)
        .unauth_attribute(attribute)
        .build(b"signed content")
        .unwrap()
}

fn codes_of(message: &RawMessage) -> Vec<ErrorCode> {
    let mut codes = CodeLedger::default();
    assert!(check_encrypted_format(message, &mut codes).is_none());
    codes.codes().to_vec()
}

#[test]
fn valid_envelope() {
    let sealed = envelope(EnvelopeBuilder::new());
    let mut codes = CodeLedger::default();

    let format = check_encrypted_format(&kim_message(&sealed), &mut codes).unwrap();

    assert!(codes.is_empty());
    pretty_assertions::assert_eq!(format.envelope, sealed);
    pretty_assertions::assert_eq!(format.version, Config::local_test().gateway.kim_version);
    pretty_assertions::assert_eq!(format.data.recipient_infos.len(), 1);
}

#[test]
fn missing_version() {
    let mut message = kim_message(&envelope(EnvelopeBuilder::new()));
    message.remove_header("X-KOM-LE-Version");

    pretty_assertions::assert_eq!(codes_of(&message), vec![ErrorCode::X014, ErrorCode::C4008]);
}

#[test]
fn repeated_version() {
    let mut message = kim_message(&envelope(EnvelopeBuilder::new()));
    message.add_header("X-KOM-LE-Version", "1.0");

    pretty_assertions::assert_eq!(codes_of(&message), vec![ErrorCode::X014, ErrorCode::C4008]);
}

#[test]
fn wrong_subject() {
    let mut message = kim_message(&envelope(EnvelopeBuilder::new()));
    message.set_header("Subject", "Befund");

    pretty_assertions::assert_eq!(codes_of(&message), vec![ErrorCode::X015]);
}

#[test]
fn not_an_attachment() {
    let mut message = kim_message(&envelope(EnvelopeBuilder::new()));
    message.remove_header("Content-Disposition");

    pretty_assertions::assert_eq!(codes_of(&message), vec![ErrorCode::X016]);
}

#[test]
fn broken_transfer_encoding() {
    let mut message = kim_message(&envelope(EnvelopeBuilder::new()));
    message.set_body(b"%%% not base64 %%%\r\n".to_vec());

    pretty_assertions::assert_eq!(codes_of(&message), vec![ErrorCode::X020]);
}

#[test]
fn legacy_enveloped_data() {
    let message = kim_message(&envelope(EnvelopeBuilder::new().legacy()));

    pretty_assertions::assert_eq!(codes_of(&message), vec![ErrorCode::X017]);
}

#[test]
fn recipients_by_subject_key_identifier() {
    let message = kim_message(&envelope(EnvelopeBuilder::new().with_subject_key_identifiers()));

    pretty_assertions::assert_eq!(codes_of(&message), vec![ErrorCode::X018]);
}

#[test]
fn no_recipient_emails() {
    let sealed = EnvelopeBuilder::new()
        .recipient(&certificate(BOB, 2, "5-KLINIK-Bob"))
        .build(b"signed content")
        .unwrap();

    pretty_assertions::assert_eq!(codes_of(&kim_message(&sealed)), vec![ErrorCode::X019]);
}

#[test]
fn forwarded_envelope() {
    let forwarded = kim_message(&envelope(EnvelopeBuilder::new()));
    let mut message = RawMessage::parse(b"From: bob@klinik.kim.de\r\nSubject: Fwd\r\n\r\n");
    message.add_header("Content-Type", "multipart/mixed; boundary=\"fwd\"");
    message.set_body(build_multipart(
        "fwd",
        &[
            b"Content-Type: text/plain\r\n\r\nsiehe Anhang\r\n".to_vec(),
            [
                b"Content-Type: message/rfc822\r\n\r\n".as_slice(),
                &forwarded.to_bytes()[..],
            ]
            .concat(),
        ],
    ));

    assert!(is_embedded_envelope(&message));
    assert!(!is_embedded_envelope(&forwarded));
}
