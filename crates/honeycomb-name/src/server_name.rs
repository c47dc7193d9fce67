use std::fmt;

use thiserror::Error;

/// The name presented by a client could not be parsed as a domain name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid server name '{name}'")]
pub struct InvalidName {
    pub name: String,
}

/// A normalized TLS server name.
///
/// Two server names are equal when their Unicode forms are equal.
#[derive(Debug, Clone)]
pub struct ServerName {
    /// Lowercased Unicode form of the name.
    pub unicode: String,
    /// ASCII (Punycode) form, suitable for X.509 hostname verification.
    pub punycode: String,
}

impl ServerName {
    /// Normalize a raw server name.
    ///
    /// The name is lowercased and run through IDNA in both directions. The
    /// Punycode form must satisfy the domain syntax rules enforced by
    /// [`is_domain_name`].
    pub fn parse(name: &str) -> Result<Self, InvalidName> {
        let invalid = || InvalidName {
            name: name.to_string(),
        };

        let lowercase = name.to_lowercase();

        let punycode = idna::domain_to_ascii(&lowercase).map_err(|_| invalid())?;
        if !is_domain_name(&punycode) {
            return Err(invalid());
        }

        let (unicode, result) = idna::domain_to_unicode(&lowercase);
        result.map_err(|_| invalid())?;

        Ok(ServerName { unicode, punycode })
    }

    /// Produce a server name from an HTTP `Host` header value, stripping the
    /// port when one is present.
    pub fn from_host_header(host: &str) -> Result<Self, InvalidName> {
        if let Some((name, port)) = host.rsplit_once(':') {
            if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
                return Self::parse(name);
            }
        }

        Self::parse(host)
    }
}

impl PartialEq for ServerName {
    fn eq(&self, other: &Self) -> bool {
        self.unicode == other.unicode
    }
}

impl Eq for ServerName {}

impl std::hash::Hash for ServerName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.unicode.hash(state);
    }
}

impl fmt::Display for ServerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.unicode)
    }
}

/// Check that an ASCII domain name is syntactically valid.
///
/// Labels are 1-63 bytes of letters, digits, hyphens and underscores, with no
/// hyphen adjacent to a dot, no empty labels, at most 255 bytes overall, and
/// at least one letter or underscore somewhere in the name.
pub(crate) fn is_domain_name(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > 255 {
        return false;
    }

    let mut has_letter = false;
    let mut label_len = 0usize;
    let mut previous = b'.';

    for &ch in domain.as_bytes() {
        match ch {
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                has_letter = true;
                label_len += 1;
            }
            b'0'..=b'9' => {
                label_len += 1;
            }
            b'-' => {
                // A label cannot start with a hyphen.
                if previous == b'.' {
                    return false;
                }
                label_len += 1;
            }
            b'.' => {
                // A label cannot end with a hyphen, or be empty.
                if previous == b'.' || previous == b'-' {
                    return false;
                } else if label_len > 63 || label_len == 0 {
                    return false;
                }
                label_len = 0;
            }
            _ => return false,
        }

        previous = ch;
    }

    has_letter && previous != b'-' && previous != b'.' && label_len < 64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_international_domains() {
        let name = ServerName::parse("host.dømåin-name.tld").unwrap();
        assert_eq!(name.unicode, "host.dømåin-name.tld");
        assert_eq!(name.punycode, "host.xn--dmin-name-62a1s.tld");
    }

    #[test]
    fn normalizes_case() {
        let name = ServerName::parse("HOST.DØMÅIN-NAME.TLD").unwrap();
        assert_eq!(name.unicode, "host.dømåin-name.tld");
        assert_eq!(name.punycode, "host.xn--dmin-name-62a1s.tld");
    }

    #[test]
    fn unicode_round_trip_is_identity() {
        for raw in ["example.com", "host.dømåin-name.tld", "_spf.example.org"] {
            let first = ServerName::parse(raw).unwrap();
            let again = ServerName::parse(&first.unicode).unwrap();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn rejects_invalid_names() {
        let long_label = format!("{}.bar", "x".repeat(64));
        let long_tail = format!("foo.{}", "x".repeat(64));
        let only_long = "x".repeat(64);

        let cases: &[&str] = &[
            "",
            "/",
            "foo.-bar",
            "foo-.bar",
            "foo..bar",
            "-foo",
            ".foo",
            "foo-",
            "foo.",
            &long_label,
            &long_tail,
            &only_long,
        ];

        for case in cases {
            assert!(ServerName::parse(case).is_err(), "expected {case:?} to be rejected");
        }
    }

    #[test]
    fn requires_a_letter() {
        assert!(ServerName::parse("127.0.0.1").is_err());
        assert!(ServerName::parse("1.2").is_err());
    }

    #[test]
    fn allows_underscores() {
        assert!(ServerName::parse("_dmarc.example.com").is_ok());
    }

    #[test]
    fn strips_port_from_host_header() {
        let name = ServerName::from_host_header("example.com:8443").unwrap();
        assert_eq!(name.unicode, "example.com");

        let name = ServerName::from_host_header("example.com").unwrap();
        assert_eq!(name.unicode, "example.com");
    }

    #[test]
    fn host_header_with_non_numeric_port_is_invalid() {
        assert!(ServerName::from_host_header("example.com:https//x").is_err());
    }

    #[test]
    fn equality_is_by_unicode_form() {
        let a = ServerName::parse("dømåin.tld").unwrap();
        let b = ServerName::parse("DØMÅIN.TLD").unwrap();
        assert_eq!(a, b);
    }
}
