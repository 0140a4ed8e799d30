use log::warn;

use gsb_core::ranges::{parse_ranges, ChunkRange};

use crate::error::UpdateError;
use crate::mac::MacKeys;

/// One line of a downloads response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `m:<mac>`, MAC over the rest of the response
    Mac(String),
    /// `e:pleaserekey`
    Rekey,
    /// `n:<secs>`, seconds until the next update
    Next(u64),
    /// `r:pleasereset`
    Reset,
    /// `i:<list>`, subsequent directives apply to this list
    List(String),
    /// `ad:<ranges>`, delete add chunks
    AddDel(Vec<ChunkRange>),
    /// `sd:<ranges>`, delete sub chunks
    SubDel(Vec<ChunkRange>),
    /// `u:<url>[,<mac>]`, fetch a chunk stream
    Redirect { url: String, mac: Option<String> },
}

/// Parse a downloads response. Unknown keywords are skipped.
pub fn parse_directives(text: &str) -> Result<Vec<Directive>, UpdateError> {
    let mut directives = Vec::new();

    for (idx, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let invalid = |reason: &str| UpdateError::Directive {
            line: idx + 1,
            reason: format!("{reason}: {line:?}"),
        };

        let Some((keyword, data)) = line.split_once(':') else {
            return Err(invalid("missing ':'"));
        };

        let directive = match keyword {
            "m" => Directive::Mac(data.to_string()),
            "e" if data == "pleaserekey" => Directive::Rekey,
            "r" if data == "pleasereset" => Directive::Reset,
            "e" | "r" => return Err(invalid("unexpected argument")),
            "n" => Directive::Next(data.parse().map_err(|_| invalid("invalid delay"))?),
            "i" if data.is_empty() => return Err(invalid("empty list name")),
            "i" => Directive::List(data.to_string()),
            "ad" => Directive::AddDel(parse_ranges(data).map_err(|e| invalid(&e.to_string()))?),
            "sd" => Directive::SubDel(parse_ranges(data).map_err(|e| invalid(&e.to_string()))?),
            "u" => {
                let (url, mac) = match data.split_once(',') {
                    Some((url, mac)) => (url, Some(mac.to_string())),
                    None => (data, None),
                };
                if url.is_empty() {
                    return Err(invalid("empty redirect URL"));
                }
                let url = if url.contains("://") {
                    url.to_string()
                } else {
                    format!("http://{url}")
                };
                Directive::Redirect { url, mac }
            }
            other => {
                warn!("Skipping unknown directive {other:?} on line {}", idx + 1);
                continue;
            }
        };
        directives.push(directive);
    }

    Ok(directives)
}

/// Parse a key-exchange response:
///
/// ```text
/// clientkey:<len>:<key>
/// wrappedkey:<len>:<key>
/// ```
///
/// Each declared length must equal the length of the key text.
pub fn parse_key_response(text: &str) -> Result<MacKeys, UpdateError> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let client_key = parse_key_line(lines.next(), "clientkey")?;
    let wrapped_key = parse_key_line(lines.next(), "wrappedkey")?;
    Ok(MacKeys { client_key, wrapped_key })
}

fn parse_key_line(line: Option<&str>, name: &str) -> Result<String, UpdateError> {
    let line = line.ok_or_else(|| UpdateError::KeyExchange(format!("missing {name} line")))?;
    let mut fields = line.splitn(3, ':');

    if fields.next() != Some(name) {
        return Err(UpdateError::KeyExchange(format!("expected {name}, got {line:?}")));
    }
    let declared: usize = fields
        .next()
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| UpdateError::KeyExchange(format!("bad {name} length")))?;
    let key = fields.next().unwrap_or_default();

    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'=')) {
        return Err(UpdateError::KeyExchange(format!("bad {name} encoding")));
    }
    if key.len() != declared {
        return Err(UpdateError::KeyExchange(format!(
            "{name} length {} does not match declared {declared}",
            key.len()
        )));
    }
    Ok(key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_response() {
        let text = "n:1200\ni:goog-malware-shavar\nu:cache.example.com/first,AbC-_\nad:1-3,5\nsd:2\ni:googpub-phish-shavar\nu:https://cache.example.com/second\n";
        let directives = parse_directives(text).unwrap();
        assert_eq!(
            directives,
            vec![
                Directive::Next(1200),
                Directive::List("goog-malware-shavar".to_string()),
                Directive::Redirect {
                    url: "http://cache.example.com/first".to_string(),
                    mac: Some("AbC-_".to_string()),
                },
                Directive::AddDel(vec![ChunkRange::new(1, 3), ChunkRange::single(5)]),
                Directive::SubDel(vec![ChunkRange::single(2)]),
                Directive::List("googpub-phish-shavar".to_string()),
                Directive::Redirect {
                    url: "https://cache.example.com/second".to_string(),
                    mac: None,
                },
            ]
        );
    }

    #[test]
    fn test_parse_control_directives() {
        let directives = parse_directives("m:dGVzdA,,\r\nr:pleasereset\r\n").unwrap();
        assert_eq!(directives, vec![Directive::Mac("dGVzdA,,".to_string()), Directive::Reset]);
        assert_eq!(parse_directives("e:pleaserekey\n").unwrap(), vec![Directive::Rekey]);
        assert!(parse_directives("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["garbage", "n:soon", "ad:3-1", "sd:x", "r:later", "i:", "u:"] {
            let err = parse_directives(bad).unwrap_err();
            assert!(err.is_protocol_violation(), "{bad}");
        }
        match parse_directives("n:1\n\nbogus").unwrap_err() {
            UpdateError::Directive { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_directive_skipped() {
        assert_eq!(parse_directives("zz:1\nn:5").unwrap(), vec![Directive::Next(5)]);
    }

    #[test]
    fn test_parse_key_response() {
        let keys = parse_key_response("clientkey:24:AAAAAAAAAAAAAAAAAAAAAA==\nwrappedkey:7:AKEgNis\n").unwrap();
        assert_eq!(keys.client_key, "AAAAAAAAAAAAAAAAAAAAAA==");
        assert_eq!(keys.wrapped_key, "AKEgNis");

        assert!(parse_key_response("clientkey:24:AAAA\nwrappedkey:7:AKEgNis").is_err());
        assert!(parse_key_response("clientkey:4:AAAA").is_err());
        assert!(parse_key_response("wrappedkey:4:AAAA\nclientkey:4:AAAA").is_err());
        assert!(parse_key_response("clientkey:4:AA!A\nwrappedkey:4:AAAA").is_err());
    }
}
