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

use crate::Address;

/// A parsed `Content-Type` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    mime: String,
    params: Vec<(String, String)>,
}

impl ContentType {
    /// Parse `type/subtype; name=value; name="quoted value"`.
    ///
    /// The mime type and the parameter names are lowercased.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let mut pieces = split_outside_quotes(value, ';').into_iter();
        let mime = pieces
            .next()
            .map(|mime| mime.trim().to_ascii_lowercase())
            .unwrap_or_default();
        let params = pieces
            .filter_map(|param| {
                let (name, value) = param.split_once('=')?;
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                Some((name.trim().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        Self { mime, params }
    }

    /// `type/subtype` lowercased
    #[must_use]
    pub fn mime(&self) -> &str {
        &self.mime
    }

    ///
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.mime.starts_with("multipart/")
    }

    /// value of the parameter `name`, case insensitive on the name
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

fn split_outside_quotes(value: &str, separator: char) -> Vec<&str> {
    let mut out = vec![];
    let mut quoted = false;
    let mut angle = 0_usize;
    let mut comment = 0_usize;
    let mut start = 0;
    let mut escaped = false;
    for (index, c) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            '<' if !quoted => angle += 1,
            '>' if !quoted => angle = angle.saturating_sub(1),
            '(' if !quoted => comment += 1,
            ')' if !quoted => comment = comment.saturating_sub(1),
            c if c == separator && !quoted && angle == 0 && comment == 0 => {
                out.push(&value[start..index]);
                start = index + c.len_utf8();
            }
            _ => {}
        }
    }
    out.push(&value[start..]);
    out
}

/// Extract the addresses of a header such as `To` or `Cc`.
///
/// Display names, comments and group syntax are skipped. Entries which are
/// not a valid address are ignored.
#[must_use]
pub fn parse_address_list(value: &str) -> Vec<Address> {
    split_outside_quotes(value, ',')
        .into_iter()
        .filter_map(|entry| {
            let entry = entry.trim().trim_end_matches(';');
            let candidate = match (entry.rfind('<'), entry.rfind('>')) {
                (Some(open), Some(close)) if open < close => &entry[open + 1..close],
                _ => {
                    let entry = strip_comments(entry);
                    let entry = entry.rsplit_once(':').map_or(entry, |(_, rest)| rest);
                    entry.trim()
                }
            };
            Address::new(candidate).ok()
        })
        .collect()
}

fn strip_comments(entry: &str) -> &str {
    entry.find('(').map_or(entry, |open| &entry[..open])
}

/// Split a multipart body in its parts.
///
/// The preamble and the epilogue are dropped, the line break preceding a
/// delimiter belongs to the delimiter.
#[must_use]
pub fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut starts = vec![];
    let mut index = 0;
    while index + delimiter.len() <= body.len() {
        let at_line_start = index == 0 || body[index - 1] == b'\n';
        if at_line_start && &body[index..index + delimiter.len()] == delimiter {
            starts.push(index);
            index += delimiter.len();
        } else {
            index += 1;
        }
    }

    let mut parts = vec![];
    for window in starts.windows(2) {
        let (current, next) = (window[0], window[1]);
        if body[current + delimiter.len()..].starts_with(b"--") {
            break;
        }
        let Some(line_end) = body[current..next].iter().position(|b| *b == b'\n') else {
            continue;
        };
        let begin = current + line_end + 1;
        let mut end = next;
        if end > begin && body[end - 1] == b'\n' {
            end -= 1;
            if end > begin && body[end - 1] == b'\r' {
                end -= 1;
            }
        }
        parts.push(&body[begin..end.max(begin)]);
    }
    parts
}

/// Join the parts with `boundary`, the result is a multipart body.
#[must_use]
pub fn build_multipart(boundary: &str, parts: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![];
    for part in parts {
        out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        out.extend_from_slice(part);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    out
}

/// base64 with lines of 76 characters, CRLF terminated
#[must_use]
pub fn encode_base64_wrapped(bytes: &[u8]) -> String {
    let encoded = base64::encode(bytes);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / 38 + 2);
    for chunk in encoded.as_bytes().chunks(76) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push_str("\r\n");
    }
    out
}

/// base64 decoding ignoring whitespace and line breaks
///
/// # Errors
///
/// * the input is not base64
pub fn decode_base64(bytes: &[u8]) -> Result<Vec<u8>, base64::DecodeError> {
    let compact = bytes
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect::<Vec<_>>();
    base64::decode(compact)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type() {
        let content_type = ContentType::parse(
            "Application/PKCS7-mime; smime-type=authenticated-enveloped-data; Name=\"smime.p7m\"",
        );
        pretty_assertions::assert_eq!(content_type.mime(), "application/pkcs7-mime");
        pretty_assertions::assert_eq!(
            content_type.param("smime-type"),
            Some("authenticated-enveloped-data")
        );
        pretty_assertions::assert_eq!(content_type.param("name"), Some("smime.p7m"));
        assert!(!content_type.is_multipart());
    }

    #[test]
    fn address_list() {
        pretty_assertions::assert_eq!(
            parse_address_list(
                "\"Doe, John\" <john@kim.de>, jane@kim.de (Jane), team: a@kim.de;, not an address"
            ),
            vec![
                Address::new("john@kim.de").unwrap(),
                Address::new("jane@kim.de").unwrap(),
                Address::new("a@kim.de").unwrap(),
            ]
        );
    }

    #[test]
    fn multipart() {
        let body = build_multipart("b1", &[b"part one".to_vec(), b"A: b\r\n\r\ntwo".to_vec()]);
        let mut with_preamble = b"preamble\r\n".to_vec();
        with_preamble.extend_from_slice(&body);
        with_preamble.extend_from_slice(b"epilogue");

        pretty_assertions::assert_eq!(
            split_multipart(&with_preamble, "b1"),
            vec![&b"part one"[..], &b"A: b\r\n\r\ntwo"[..]]
        );
    }

    #[test]
    fn base64_wrapped() {
        let data = vec![0xAB_u8; 200];
        let encoded = encode_base64_wrapped(&data);
        assert!(encoded.lines().all(|line| line.len() <= 76));
        pretty_assertions::assert_eq!(decode_base64(encoded.as_bytes()).unwrap(), data);
    }
}
