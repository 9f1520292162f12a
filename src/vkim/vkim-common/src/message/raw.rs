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

use super::mime::{decode_base64, parse_address_list, split_multipart, ContentType};
use crate::Address;

/// a header field, the value keeps its folding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    ///
    pub name: String,
    /// raw value without the leading space, continuation lines joined with CRLF
    pub value: String,
}

impl Header {
    /// the value with folding removed and surrounding spaces trimmed
    #[must_use]
    pub fn unfolded(&self) -> String {
        self.value.replace("\r\n", "").replace('\n', "").trim().to_string()
    }
}

/// Representation of a mail: the header section parsed in fields, the body
/// kept as raw bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    headers: Vec<Header>,
    body: Vec<u8>,
}

impl RawMessage {
    ///
    #[must_use]
    pub fn new(headers: Vec<Header>, body: Vec<u8>) -> Self {
        Self { headers, body }
    }

    /// Split `bytes` at the first empty line.
    ///
    /// Lenient on purpose: lines of the header section which are neither a
    /// field nor a continuation are dropped.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Self {
        let (head, body) = if bytes.starts_with(b"\r\n") {
            (&bytes[..0], &bytes[2..])
        } else if bytes.starts_with(b"\n") {
            (&bytes[..0], &bytes[1..])
        } else {
            match find(bytes, b"\r\n\r\n") {
                Some(pos) => (&bytes[..pos], &bytes[pos + 4..]),
                None => match find(bytes, b"\n\n") {
                    Some(pos) => (&bytes[..pos], &bytes[pos + 2..]),
                    None => (bytes, &bytes[bytes.len()..]),
                },
            }
        };

        let head = String::from_utf8_lossy(head);
        let mut headers: Vec<Header> = vec![];
        for line in head.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.starts_with([' ', '\t']) {
                if let Some(last) = headers.last_mut() {
                    last.value.push_str("\r\n");
                    last.value.push_str(line);
                }
                continue;
            }
            if let Some((name, value)) = line.split_once(':') {
                if !name.is_empty() && !name.contains(char::is_whitespace) {
                    headers.push(Header {
                        name: name.to_string(),
                        value: value.strip_prefix(' ').unwrap_or(value).to_string(),
                    });
                }
            }
        }

        Self {
            headers,
            body: body.to_vec(),
        }
    }

    ///
    #[must_use]
    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    ///
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    ///
    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    /// first value of the header `name`, case insensitive
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(Header::unfolded)
    }

    /// every value of the header `name`, in order
    #[must_use]
    pub fn get_headers(&self, name: &str) -> Vec<String> {
        self.headers
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case(name))
            .map(Header::unfolded)
            .collect()
    }

    /// rewrite the first header `name` or add it to the header section
    pub fn set_header(&mut self, name: &str, value: &str) {
        match self
            .headers
            .iter_mut()
            .find(|h| h.name.eq_ignore_ascii_case(name))
        {
            Some(header) => header.value = value.to_string(),
            None => self.add_header(name, value),
        }
    }

    /// push back
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push(Header {
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    /// push front
    pub fn prepend_header(&mut self, name: &str, value: &str) {
        self.headers.insert(
            0,
            Header {
                name: name.to_string(),
                value: value.to_string(),
            },
        );
    }

    /// remove every header `name`, return how many were removed
    pub fn remove_header(&mut self, name: &str) -> usize {
        let before = self.headers.len();
        self.headers.retain(|h| !h.name.eq_ignore_ascii_case(name));
        before - self.headers.len()
    }

    /// the parsed `Content-Type`, `text/plain` is not assumed
    #[must_use]
    pub fn content_type(&self) -> Option<ContentType> {
        self.get_header("Content-Type")
            .map(|value| ContentType::parse(&value))
    }

    /// the addresses of every header `name` (From, To, Cc ...)
    #[must_use]
    pub fn addresses(&self, name: &str) -> Vec<Address> {
        self.get_headers(name)
            .iter()
            .flat_map(|value| parse_address_list(value))
            .collect()
    }

    /// the body with its transfer encoding removed (base64 only, other
    /// encodings are returned as is)
    ///
    /// # Errors
    ///
    /// * the body is declared base64 but is not
    pub fn decoded_body(&self) -> Result<Vec<u8>, base64::DecodeError> {
        match self.get_header("Content-Transfer-Encoding") {
            Some(cte) if cte.eq_ignore_ascii_case("base64") => decode_base64(&self.body),
            _ => Ok(self.body.clone()),
        }
    }

    /// the parts of a multipart message, `None` if not a multipart
    #[must_use]
    pub fn parts(&self) -> Option<Vec<Self>> {
        let content_type = self.content_type()?;
        if !content_type.is_multipart() {
            return None;
        }
        let boundary = content_type.param("boundary")?;
        Some(
            split_multipart(&self.body, boundary)
                .into_iter()
                .map(Self::parse)
                .collect(),
        )
    }

    /// the message as sent on the wire
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + self.headers.len() * 64);
        for header in &self.headers {
            out.extend_from_slice(header.name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(header.value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::RawMessage;
    use crate::Address;

    const MAIL: &[u8] = b"From: Dr. Doe <Doe@Praxis.kim.de>\r\n\
To: a@kim.de,\r\n \"Lab, Central\" <lab@kim.de>\r\n\
Subject: hello\r\n\
\r\n\
body\r\n";

    #[test]
    fn headers() {
        let mut message = RawMessage::parse(MAIL);
        pretty_assertions::assert_eq!(message.get_header("subject").unwrap(), "hello");
        pretty_assertions::assert_eq!(
            message.addresses("To"),
            vec![
                Address::new("a@kim.de").unwrap(),
                Address::new("lab@kim.de").unwrap()
            ]
        );
        pretty_assertions::assert_eq!(
            message.addresses("From"),
            vec![Address::new("doe@praxis.kim.de").unwrap()]
        );
        pretty_assertions::assert_eq!(message.body(), b"body\r\n");

        message.set_header("Subject", "KOM-LE-Nachricht");
        message.prepend_header("X-KOM-LE-Version", "1.5+");
        pretty_assertions::assert_eq!(message.remove_header("to"), 1);
        pretty_assertions::assert_eq!(
            String::from_utf8(message.to_bytes()).unwrap(),
            "X-KOM-LE-Version: 1.5+\r\nFrom: Dr. Doe <Doe@Praxis.kim.de>\r\nSubject: KOM-LE-Nachricht\r\n\r\nbody\r\n"
        );
    }

    #[test]
    fn folding_is_kept() {
        let message = RawMessage::parse(MAIL);
        let bytes = message.to_bytes();
        pretty_assertions::assert_eq!(String::from_utf8(bytes).unwrap(), String::from_utf8(MAIL.to_vec()).unwrap());
    }

    #[test]
    fn no_header_section() {
        let message = RawMessage::parse(b"\r\nonly body");
        assert!(message.headers().is_empty());
        pretty_assertions::assert_eq!(message.body(), b"only body");
    }
}
