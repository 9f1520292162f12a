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

/// A SMTP reply, possibly multi-line, with an optional enhanced status code
/// (<https://datatracker.ietf.org/doc/html/rfc2034>).
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct Reply {
    code: u16,
    enhanced: Option<String>,
    lines: Vec<String>,
}

impl Reply {
    /// a single line reply with an enhanced status code
    #[must_use]
    pub fn enhanced(code: u16, enhanced: &str, text: impl Into<String>) -> Self {
        Self {
            code,
            enhanced: Some(enhanced.to_string()),
            lines: vec![text.into()],
        }
    }

    /// a single line reply without enhanced status code
    #[must_use]
    pub fn plain(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            enhanced: None,
            lines: vec![text.into()],
        }
    }

    /// a multi-line reply, as used for EHLO
    #[must_use]
    pub fn multiline(code: u16, lines: impl IntoIterator<Item = String>) -> Self {
        Self {
            code,
            enhanced: None,
            lines: lines.into_iter().collect(),
        }
    }

    /// parse the lines read from a SMTP server, `250-...` up to `250 ...`
    ///
    /// # Errors
    ///
    /// * no line, or a line without a valid three digits code
    pub fn parse(lines: &[String]) -> Result<Self, crate::GatewayError> {
        let mut code = None;
        let mut text = Vec::with_capacity(lines.len());
        for line in lines {
            let line = line.trim_end_matches(['\r', '\n']);
            let parsed = line
                .get(..3)
                .and_then(|c| c.parse::<u16>().ok())
                .filter(|c| (200..600).contains(c))
                .ok_or_else(|| {
                    crate::GatewayError::InvalidArgument(format!("invalid smtp reply '{line}'"))
                })?;
            code.get_or_insert(parsed);
            text.push(line.get(4..).unwrap_or_default().to_string());
        }
        Ok(Self {
            code: code.ok_or_else(|| {
                crate::GatewayError::InvalidArgument("empty smtp reply".to_string())
            })?,
            enhanced: None,
            lines: text,
        })
    }

    ///
    #[must_use]
    pub const fn code(&self) -> u16 {
        self.code
    }

    /// text of the reply, lines joined with a space
    #[must_use]
    pub fn text(&self) -> String {
        let text = self.lines.join(" ");
        match &self.enhanced {
            Some(enhanced) => format!("{enhanced} {text}"),
            None => text,
        }
    }

    /// 2yz
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// 3yz
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    /// 4yz or 5yz
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.code >= 400
    }

    /// the reply as sent on the wire, CRLF terminated
    #[must_use]
    pub fn fold(&self) -> String {
        let mut out = String::new();
        let last = self.lines.len().saturating_sub(1);
        for (idx, line) in self.lines.iter().enumerate() {
            let sep = if idx == last { ' ' } else { '-' };
            match &self.enhanced {
                Some(enhanced) => out.push_str(&format!("{}{sep}{enhanced} {line}\r\n", self.code)),
                None => out.push_str(&format!("{}{sep}{line}\r\n", self.code)),
            }
        }
        if self.lines.is_empty() {
            out.push_str(&format!("{}\r\n", self.code));
        }
        out
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::Reply;

    #[test]
    fn fold() {
        pretty_assertions::assert_eq!(
            Reply::enhanced(250, "2.1.0", "Sender <a@b.c> OK").fold(),
            "250 2.1.0 Sender <a@b.c> OK\r\n"
        );
        pretty_assertions::assert_eq!(
            Reply::multiline(250, ["gw Hello".to_string(), "8BITMIME".to_string()]).fold(),
            "250-gw Hello\r\n250 8BITMIME\r\n"
        );
    }

    #[test]
    fn parse() {
        let reply = Reply::parse(&[
            "250-mx.kim.de\r\n".to_string(),
            "250 AUTH LOGIN PLAIN\r\n".to_string(),
        ])
        .unwrap();
        pretty_assertions::assert_eq!(reply.code(), 250);
        pretty_assertions::assert_eq!(reply.text(), "mx.kim.de AUTH LOGIN PLAIN");
        assert!(reply.is_positive());

        assert!(Reply::parse(&["hello".to_string()]).is_err());
        assert!(Reply::parse(&[]).is_err());
    }
}
