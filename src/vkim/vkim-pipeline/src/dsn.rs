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

use vkim_common::{
    message::{build_multipart, new_boundary, RawMessage},
    re::time,
    Address, ErrorCode,
};

/// header listing the codes of a sending failure
pub const X_KIM_FEHLERMELDUNG: &str = "X-KIM-Fehlermeldung";
/// header listing the codes of a failed signature verification
pub const X_KIM_INTEGRITY_CHECK_RESULT: &str = "X-KIM-Integrity-Check-Result";

/// Why the report is issued, selects its text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// the message could not be signed or encrypted
    SignEncrypt,
    /// the identity of the sender could not be resolved
    Sender(Address),
    /// the identity of some or all recipients could not be resolved
    Recipients {
        /// no recipient was usable, the message was not sent
        all: bool,
    },
    /// the signature of a received message could not be verified
    SignVerify,
}

/// Status of one recipient in the report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientStatus {
    ///
    pub address: Address,
    ///
    pub codes: Vec<ErrorCode>,
    ///
    pub last_attempt_date: Option<time::OffsetDateTime>,
}

/// A delivery status notification (RFC 3464), batching every affected
/// recipient of one ledger.
#[derive(Debug, Clone)]
pub struct Report {
    ///
    pub failure: Failure,
    /// where the report is sent
    pub to: Address,
    /// domain of the gateway
    pub reporting_mta: String,
    /// peer which submitted the message, if known
    pub received_from_mta: Option<String>,
    ///
    pub arrival_date: Option<time::OffsetDateTime>,
    ///
    pub recipients: Vec<RecipientStatus>,
    /// every code of the report, in order
    pub codes: Vec<ErrorCode>,
    /// the message the report is about, only its headers are included
    pub original: RawMessage,
}

impl Report {
    /// The human readable part: the context text, the affected addresses
    /// for a recipient failure, then one `code - text` line per code.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = match &self.failure {
            Failure::SignEncrypt => {
                "Es sind Fehler beim Signieren und Verschlüsseln der Mail aufgetreten.\r\n"
                    .to_string()
            }
            Failure::Sender(address) => format!(
                "Die Mail konnte nicht versandt werden. Für den Sender {address} wurden beim Versand Probleme festgestellt.\r\n"
            ),
            Failure::Recipients { all: true } => {
                "Die Mail konnte nicht versandt werden. Für alle Empfänger wurden beim Versand Probleme festgestellt:\r\n"
                    .to_string()
            }
            Failure::Recipients { all: false } => {
                "Die Mail konnte versandt werden. Für einige Empfänger wurden beim Versand Probleme festgestellt:\r\n"
                    .to_string()
            }
            Failure::SignVerify => {
                "Es sind Fehler beim Verifizieren der Mail-Signatur aufgetreten.\r\n".to_string()
            }
        };

        if matches!(self.failure, Failure::Recipients { .. }) {
            out.push_str(
                &self
                    .recipients
                    .iter()
                    .map(|rcpt| rcpt.address.full())
                    .collect::<Vec<_>>()
                    .join(","),
            );
            out.push_str("\r\n");
        }

        for code in &self.codes {
            out.push_str(&format!("{} - {}\r\n", code.id(), code.text()));
        }
        out
    }

    const fn code_header(&self) -> &'static str {
        match self.failure {
            Failure::SignVerify => X_KIM_INTEGRITY_CHECK_RESULT,
            _ => X_KIM_FEHLERMELDUNG,
        }
    }

    fn delivery_status(&self) -> String {
        let mut out = format!("Reporting-MTA: dns; {}\r\n", self.reporting_mta);
        if let Some(received_from) = &self.received_from_mta {
            out.push_str(&format!("Received-From-MTA: dns; {received_from}\r\n"));
        }
        out.push_str(&format!(
            "Original-Envelope-Id: {}\r\n",
            self.original
                .get_header("Message-ID")
                .unwrap_or_else(|| "unknown".to_string())
        ));
        if let Some(arrival) = self.arrival_date.as_ref().and_then(rfc2822) {
            out.push_str(&format!("Arrival-Date: {arrival}\r\n"));
        }

        for rcpt in &self.recipients {
            out.push_str("\r\n");
            out.push_str(&format!("Final-Recipient: rfc822; {}\r\n", rcpt.address));
            out.push_str("Action: failed\r\n");
            out.push_str("Status: 5.7.0\r\n");
            out.push_str(&format!(
                "Diagnostic-Code: X-KIM; {}\r\n",
                rcpt.codes
                    .iter()
                    .map(|code| code.id())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
            if let Some(last_attempt) = rcpt.last_attempt_date.as_ref().and_then(rfc2822) {
                out.push_str(&format!("Last-Attempt-Date: {last_attempt}\r\n"));
            }
        }
        out
    }

    /// the report as a message
    #[must_use]
    pub fn to_message(&self) -> RawMessage {
        let boundary = new_boundary();
        let now = time::OffsetDateTime::now_utc();

        let mut message = RawMessage::default();
        message.add_header("From", &format!("MAILER-DAEMON@{}", self.reporting_mta));
        message.add_header("To", self.to.full());
        if let Some(date) = rfc2822(&now) {
            message.add_header("Date", &date);
        }
        message.add_header(
            "Subject",
            &match self.original.get_header("Subject") {
                Some(subject) => format!("Delivery Status Notification (Failure): {subject}"),
                None => "Delivery Status Notification (Failure)".to_string(),
            },
        );
        message.add_header(
            "Message-ID",
            &format!(
                "<{}@{}>",
                vkim_common::re::uuid::Uuid::new_v4().simple(),
                self.reporting_mta
            ),
        );
        message.add_header("Auto-Submitted", "auto-replied");
        message.add_header("MIME-Version", "1.0");
        message.add_header(
            "Content-Type",
            &format!("multipart/report; report-type=delivery-status; boundary=\"{boundary}\""),
        );
        for code in &self.codes {
            message.add_header(self.code_header(), code.id());
        }

        let mut headers = RawMessage::new(self.original.headers().to_vec(), vec![]).to_bytes();
        headers.truncate(headers.len().saturating_sub(2));

        let parts = [
            [
                b"Content-Type: text/plain; charset=utf-8\r\nContent-Transfer-Encoding: 8bit\r\n\r\n"
                    .to_vec(),
                self.text().into_bytes(),
            ]
            .concat(),
            [
                b"Content-Type: message/delivery-status\r\n\r\n".to_vec(),
                self.delivery_status().into_bytes(),
            ]
            .concat(),
            [b"Content-Type: text/rfc822-headers\r\n\r\n".to_vec(), headers].concat(),
        ];
        message.set_body(build_multipart(&boundary, &parts));
        message
    }
}

fn rfc2822(date: &time::OffsetDateTime) -> Option<String> {
    date.format(&time::format_description::well_known::Rfc2822)
        .ok()
}

/// the report as sent on the wire
#[must_use]
pub fn build(report: &Report) -> Vec<u8> {
    report.to_message().to_bytes()
}

#[cfg(test)]
mod tests {
    use super::{build, Failure, RecipientStatus, Report};
    use vkim_common::{message::RawMessage, Address, ErrorCode};

    fn addr(s: &str) -> Address {
        Address::new(s).unwrap()
    }

    fn report(failure: Failure) -> Report {
        Report {
            failure,
            to: addr("sender@praxis.kim.de"),
            reporting_mta: "gateway.kim.de".to_string(),
            received_from_mta: Some("client.local".to_string()),
            arrival_date: None,
            recipients: vec![
                RecipientStatus {
                    address: addr("a@kim.de"),
                    codes: vec![ErrorCode::X005],
                    last_attempt_date: None,
                },
                RecipientStatus {
                    address: addr("b@kim.de"),
                    codes: vec![ErrorCode::X005, ErrorCode::C4005],
                    last_attempt_date: None,
                },
            ],
            codes: vec![ErrorCode::X005, ErrorCode::C4005],
            original: RawMessage::parse(
                b"From: sender@praxis.kim.de\r\nSubject: Befund\r\nMessage-ID: <1@praxis>\r\n\r\nbody",
            ),
        }
    }

    #[test]
    fn recipients_text() {
        pretty_assertions::assert_eq!(
            report(Failure::Recipients { all: true }).text(),
            "Die Mail konnte nicht versandt werden. Für alle Empfänger wurden beim Versand Probleme festgestellt:\r\n\
            a@kim.de,b@kim.de\r\n\
            X005 - Für einen Empfänger existiert kein Verschlüsselungszertifikat\r\n\
            4005 - Für einen Empfänger existieren mehrere Verschlüsselungszertifikate mit unterschiedlichen Telematik-IDs\r\n"
        );
        assert!(report(Failure::Recipients { all: false })
            .text()
            .starts_with("Die Mail konnte versandt werden. Für einige Empfänger"));
    }

    #[test]
    fn sender_text() {
        let text = report(Failure::Sender(addr("sender@praxis.kim.de"))).text();
        assert!(text.starts_with(
            "Die Mail konnte nicht versandt werden. Für den Sender sender@praxis.kim.de wurden"
        ));
        assert!(!text.contains("a@kim.de,b@kim.de"));
    }

    #[test]
    fn structure() {
        let message = RawMessage::parse(&build(&report(Failure::SignEncrypt)));

        pretty_assertions::assert_eq!(
            message.get_headers("X-KIM-Fehlermeldung"),
            vec!["X005".to_string(), "4005".to_string()]
        );
        pretty_assertions::assert_eq!(message.get_header("To").unwrap(), "sender@praxis.kim.de");
        let content_type = message.content_type().unwrap();
        pretty_assertions::assert_eq!(content_type.mime(), "multipart/report");
        pretty_assertions::assert_eq!(content_type.param("report-type"), Some("delivery-status"));

        let parts = message.parts().unwrap();
        pretty_assertions::assert_eq!(parts.len(), 3);

        let status = String::from_utf8(parts[1].body().to_vec()).unwrap();
        assert!(status.starts_with("Reporting-MTA: dns; gateway.kim.de\r\n"));
        assert!(status.contains("Received-From-MTA: dns; client.local\r\n"));
        assert!(status.contains("Original-Envelope-Id: <1@praxis>\r\n"));
        assert!(!status.contains("Arrival-Date"));
        assert!(status.contains("Final-Recipient: rfc822; b@kim.de\r\nAction: failed\r\n"));
        assert!(status.contains("Diagnostic-Code: X-KIM; X005, 4005\r\n"));

        let headers = RawMessage::parse(parts[2].body());
        pretty_assertions::assert_eq!(headers.get_header("Subject").unwrap(), "Befund");
    }

    #[test]
    fn integrity_header_on_verification_failure() {
        let mut report = report(Failure::SignVerify);
        report.codes = vec![ErrorCode::C4115];
        let message = report.to_message();
        pretty_assertions::assert_eq!(
            message.get_headers("X-KIM-Integrity-Check-Result"),
            vec!["4115".to_string()]
        );
        assert!(message.get_header("X-KIM-Fehlermeldung").is_none());
    }
}
