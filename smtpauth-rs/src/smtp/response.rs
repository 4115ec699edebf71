//! SMTP reply and EHLO capability parsing

use crate::error::{AuthError, Result};

/// Longest reply line accepted from an upstream server
pub const MAX_LINE_LENGTH: usize = 4096;
/// Most lines accepted in one multi-line reply
pub const MAX_REPLY_LINES: usize = 512;

/// One reply line: `250-PIPELINING` or `250 OK`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    pub code: u16,
    /// `false` for `-` continuation lines
    pub is_last: bool,
    pub text: String,
}

impl ReplyLine {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.len() > MAX_LINE_LENGTH {
            return Err(AuthError::ProtocolRejection(format!(
                "Reply line too long ({} bytes)",
                line.len()
            )));
        }

        let code = line
            .get(..3)
            .filter(|code| code.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| AuthError::ProtocolRejection(format!("Invalid reply: {}", line)))?;

        let (is_last, text) = match line.as_bytes().get(3) {
            None => (true, ""),
            Some(b' ') => (true, &line[4..]),
            Some(b'-') => (false, &line[4..]),
            Some(_) => {
                return Err(AuthError::ProtocolRejection(format!(
                    "Invalid reply separator: {}",
                    line
                )))
            }
        };

        Ok(Self {
            code,
            is_last,
            text: text.to_string(),
        })
    }
}

/// Complete, possibly multi-line, server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    /// Accumulator for a reply read line by line
    pub fn empty() -> Self {
        Self {
            code: 0,
            lines: Vec::new(),
        }
    }

    /// Add a parsed line, returning whether the reply is complete
    pub fn push(&mut self, line: ReplyLine) -> Result<bool> {
        if self.lines.is_empty() {
            self.code = line.code;
        } else if line.code != self.code {
            return Err(AuthError::ProtocolRejection(format!(
                "Reply code changed from {} to {}",
                self.code, line.code
            )));
        }

        if self.lines.len() >= MAX_REPLY_LINES {
            return Err(AuthError::ProtocolRejection(
                "Reply has too many lines".to_string(),
            ));
        }

        self.lines.push(line.text);
        Ok(line.is_last)
    }

    /// Parse a complete reply from raw text
    pub fn parse(raw: &str) -> Result<Self> {
        let mut reply = Self::empty();
        for line in raw.lines() {
            if reply.push(ReplyLine::parse(line)?)? {
                return Ok(reply);
            }
        }
        Err(AuthError::ProtocolRejection("Incomplete reply".to_string()))
    }

    /// Error unless the reply carries `code`
    pub fn expect(self, code: u16) -> Result<Self> {
        if self.code == code {
            Ok(self)
        } else {
            Err(AuthError::ProtocolRejection(format!(
                "Expected {}, got: {}",
                code, self
            )))
        }
    }

    /// Reply text without the code, lines joined by `\n`
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.lines.join(" / "))
    }
}

/// Extensions advertised in an EHLO reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    keywords: Vec<String>,
    auth_mechanisms: Vec<String>,
}

impl Capabilities {
    /// Collect keywords from every line but the first (the greeting text)
    pub fn from_ehlo(reply: &Reply) -> Self {
        let mut capabilities = Self::default();

        for line in reply.lines.iter().skip(1) {
            let mut words = line.split_whitespace();
            let Some(keyword) = words.next() else {
                continue;
            };
            let keyword = keyword.to_uppercase();

            // Some old servers advertise `AUTH=LOGIN`
            if keyword == "AUTH" || keyword.starts_with("AUTH=") {
                let inline = keyword.strip_prefix("AUTH=").map(str::to_string);
                for mechanism in inline.into_iter().chain(words.map(str::to_uppercase)) {
                    if !capabilities.auth_mechanisms.contains(&mechanism) {
                        capabilities.auth_mechanisms.push(mechanism);
                    }
                }
            }

            capabilities.keywords.push(keyword);
        }

        capabilities
    }

    /// Case-insensitive extension check
    pub fn has(&self, keyword: &str) -> bool {
        let keyword = keyword.to_uppercase();
        self.keywords.iter().any(|k| *k == keyword)
    }

    pub fn has_starttls(&self) -> bool {
        self.has("STARTTLS")
    }

    pub fn auth_mechanisms(&self) -> &[String] {
        &self.auth_mechanisms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_line() {
        let reply = Reply::parse("220 mail.example.com ESMTP ready\r\n").unwrap();
        assert_eq!(reply.code, 220);
        assert_eq!(reply.lines, vec!["mail.example.com ESMTP ready"]);
        assert_eq!(reply.message(), "mail.example.com ESMTP ready");
    }

    #[test]
    fn test_parse_bare_code() {
        let reply = Reply::parse("250\r\n").unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(reply.message(), "");
    }

    #[test]
    fn test_parse_multi_line_capabilities() {
        let reply = Reply::parse(
            "250-mail.example.com\r\n250-PIPELINING\r\n250-starttls\r\n250-AUTH PLAIN login\r\n250 8BITMIME\r\n",
        )
        .unwrap();
        assert_eq!(reply.lines.len(), 5);

        let caps = Capabilities::from_ehlo(&reply);
        assert!(caps.has_starttls());
        assert!(caps.has("8bitmime"));
        assert!(!caps.has("SMTPUTF8"));
        assert_eq!(caps.auth_mechanisms(), ["PLAIN", "LOGIN"]);
    }

    #[test]
    fn test_legacy_auth_keyword() {
        let reply = Reply::parse("250-mx\r\n250-AUTH=LOGIN\r\n250 AUTH LOGIN PLAIN\r\n").unwrap();
        let caps = Capabilities::from_ehlo(&reply);
        assert_eq!(caps.auth_mechanisms(), ["LOGIN", "PLAIN"]);
    }

    #[test]
    fn test_greeting_line_is_not_a_capability() {
        let reply = Reply::parse("250 STARTTLS.example.com\r\n").unwrap();
        assert!(!Capabilities::from_ehlo(&reply).has_starttls());
    }

    #[test]
    fn test_invalid_replies() {
        for raw in ["hello\r\n", "25\r\n", "2500 x\r\n", "250-a\r\n251 b\r\n", "250-a\r\n"] {
            assert!(
                matches!(Reply::parse(raw), Err(AuthError::ProtocolRejection(_))),
                "{:?} should be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_expect() {
        let reply = Reply::parse("535 5.7.8 Authentication credentials invalid\r\n").unwrap();
        assert!(matches!(
            reply.clone().expect(235),
            Err(AuthError::ProtocolRejection(_))
        ));
        assert_eq!(reply.expect(535).unwrap().code, 535);
    }
}
