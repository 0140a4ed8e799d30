//! URL canonicalization
//!
//! Turns arbitrary, possibly hostile URL text into the canonical form that
//! list prefixes are computed from. Canonicalization is total: every input
//! yields a form, however degenerate, and the matching form is a fixed point
//! (canonicalizing it again returns it unchanged).
//!
//! The pipeline works on raw bytes because percent-decoding may produce
//! bytes that are not valid UTF-8. Every byte outside the printable ASCII
//! range is percent-encoded again before a form is returned.

use std::fmt::Write as _;

/// Maximum number of percent-decoding rounds.
const MAX_DECODE_ROUNDS: usize = 50;

/// Maximum number of times a rendered form is parsed again before it is
/// taken as final.
const MAX_SETTLE_ROUNDS: usize = 8;

/// Scheme used when the input does not name one.
const DEFAULT_SCHEME: &str = "http";

// =============================================================================
// Canonical Form
// =============================================================================

/// A canonicalized URL.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CanonicalForm {
    /// Lowercase scheme, `http` when absent from the input
    pub scheme: String,
    /// `user[:pass]` as it appeared in the input, if any
    pub userinfo: Option<String>,
    /// Lowercase host with no leading, trailing or repeated dots
    pub host: String,
    /// Port digits, if any
    pub port: Option<String>,
    /// Normalized path, always starting with `/`
    pub path: String,
    /// Query without the `?`. `Some("")` when the URL ends in a bare `?`
    pub query: Option<String>,
    /// Fragment without the `#`, if any
    pub fragment: Option<String>,
    /// Host is a normalized dotted-decimal IPv4 literal
    pub is_ip: bool,
}

impl CanonicalForm {
    /// `scheme://host[:port]path[?query]`, the form list hashes are taken over.
    pub fn matching_form(&self) -> String {
        let mut out = String::with_capacity(self.scheme.len() + self.host.len() + self.path.len() + 16);
        out.push_str(&self.scheme);
        out.push_str("://");
        self.write_location(&mut out);
        out
    }

    /// The matching form with userinfo and fragment restored.
    pub fn display_form(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.scheme);
        out.push_str("://");
        if let Some(userinfo) = &self.userinfo {
            out.push_str(userinfo);
            out.push('@');
        }
        self.write_location(&mut out);
        if let Some(fragment) = &self.fragment {
            out.push('#');
            out.push_str(fragment);
        }
        out
    }

    fn write_location(&self, out: &mut String) {
        out.push_str(&self.host);
        if let Some(port) = &self.port {
            out.push(':');
            out.push_str(port);
        }
        out.push_str(&self.path);
        if let Some(query) = &self.query {
            out.push('?');
            out.push_str(query);
        }
    }
}

// =============================================================================
// Canonicalization
// =============================================================================

/// Canonicalize a URL string.
pub fn canonicalize(raw: &str) -> CanonicalForm {
    canonicalize_bytes(raw.as_bytes())
}

/// Canonicalize raw URL bytes. Input need not be valid UTF-8.
///
/// A single pass can render a form that parses differently (an empty host
/// followed by a path, or `%3F` decoded into the path), so the matching form
/// is parsed again until it no longer changes. Userinfo and fragment come
/// from the input.
pub fn canonicalize_bytes(raw: &[u8]) -> CanonicalForm {
    let mut form = canonicalize_once(raw);
    for _ in 0..MAX_SETTLE_ROUNDS {
        let rendered = form.matching_form();
        let next = canonicalize_once(rendered.as_bytes());
        if next.matching_form() == rendered {
            break;
        }
        form = CanonicalForm {
            userinfo: form.userinfo,
            fragment: form.fragment,
            ..next
        };
    }
    form
}

fn canonicalize_once(raw: &[u8]) -> CanonicalForm {
    let stripped: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|b| !matches!(b, b'\t' | b'\n' | b'\r' | 0x0b))
        .collect();

    // '#' stays literal on the first pass so the fragment can be split off
    let encoded = percent_encode(trim(&stripped), false);

    let mut parts = parse_loose(&encoded);
    if parts.host.is_empty() {
        let strict = parse_strict(&encoded);
        if !strict.host.is_empty() {
            parts = strict;
        }
    }

    let mut host = parts.host.as_bytes().to_vec();
    let mut path = parts.path.as_bytes().to_vec();
    let mut query = parts.query.map(|q| q.as_bytes().to_vec());

    for _ in 0..MAX_DECODE_ROUNDS {
        let next_host = percent_decode(&host);
        let next_path = percent_decode(&path);
        let next_query = query.as_deref().map(percent_decode);
        let stable = next_host == host && next_path == path && next_query == query;
        host = next_host;
        path = next_path;
        query = next_query;
        if stable {
            break;
        }
    }

    let host = normalize_host(&host);
    let (host, is_ip) = match parse_ip_literal(&host) {
        Some([a, b, c, d]) => (format!("{a}.{b}.{c}.{d}"), true),
        None => (encode_host(&host), false),
    };

    let scheme = match parts.scheme {
        Some(s) => s.to_ascii_lowercase(),
        None => DEFAULT_SCHEME.to_string(),
    };

    CanonicalForm {
        scheme,
        userinfo: non_empty(parts.userinfo),
        host,
        port: non_empty(parts.port),
        path: percent_encode(&normalize_path(&path), true),
        query: query.map(|q| percent_encode(&q, true)),
        fragment: non_empty(parts.fragment),
        is_ip,
    }
}

fn non_empty(part: Option<&str>) -> Option<String> {
    part.filter(|s| !s.is_empty()).map(str::to_string)
}

fn trim(bytes: &[u8]) -> &[u8] {
    let is_space = |b: &u8| matches!(b, b' ' | 0);
    let start = bytes.iter().position(|b| !is_space(b)).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !is_space(b)).map_or(start, |i| i + 1);
    &bytes[start..end]
}

// =============================================================================
// Percent Coding
// =============================================================================

/// Percent-encode control bytes, space, non-ASCII bytes and `%`, plus `#`
/// when `encode_hash` is set. Hex digits are uppercase.
pub fn percent_encode(bytes: &[u8], encode_hash: bool) -> String {
    let extra: &[u8] = if encode_hash { b"#" } else { b"" };
    encode_with(bytes, extra)
}

/// Encode a decoded host. Authority delimiters are escaped too, so the
/// rendered host parses back as a host and not as userinfo or a port.
fn encode_host(host: &[u8]) -> String {
    encode_with(host, b"#@:/?")
}

fn encode_with(bytes: &[u8], extra: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if b <= 0x20 || b >= 0x7f || b == b'%' || extra.contains(&b) {
            // Writing to a String cannot fail
            let _ = write!(out, "%{b:02X}");
        } else {
            out.push(b as char);
        }
    }
    out
}

/// Decode `%XX` escapes once. Malformed escapes are kept literally.
pub fn percent_decode(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

#[inline]
fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

// =============================================================================
// Component Parsing
// =============================================================================

/// URL components as slices of the first-pass encoded input.
#[derive(Debug, Default)]
struct RawParts<'a> {
    scheme: Option<&'a str>,
    userinfo: Option<&'a str>,
    host: &'a str,
    port: Option<&'a str>,
    path: &'a str,
    query: Option<&'a str>,
    fragment: Option<&'a str>,
}

/// Permissive grammar. Accepts a missing scheme, bare hosts and relative
/// junk; a scheme is only recognised when the input does not open with
/// `name:password@`.
fn parse_loose(s: &str) -> RawParts<'_> {
    let b = s.as_bytes();
    let mut parts = RawParts::default();
    let mut pos = 0;

    if !starts_with_credentials(b) {
        if let Some(k) = b.iter().position(|c| matches!(c, b':' | b'/' | b'?' | b'#' | b'.')) {
            if b[k] == b':' && is_scheme(&b[..k]) {
                parts.scheme = Some(&s[..k]);
                pos = k + 1;
            }
        }
    }
    if b[pos..].starts_with(b"//") {
        pos += 2;
    }

    pos = parse_authority(s, pos, false, &mut parts);

    let rest = &b[pos..];
    if rest.first() == Some(&b'/') {
        let len = rest.iter().position(|c| matches!(c, b'?' | b'#')).unwrap_or(rest.len());
        parts.path = &s[pos..pos + len];
        pos += len;
    } else {
        let len = rest
            .iter()
            .position(|c| matches!(c, b'?' | b'#' | b'/'))
            .unwrap_or(rest.len());
        parts.path = &s[pos..pos + len];
        pos += len;
        if b.get(pos) == Some(&b'/') {
            return parts;
        }
    }

    parse_query_fragment(s, pos, &mut parts);
    parts
}

/// Stricter grammar. The authority is only recognised after `//` or `///`;
/// everything else up to `?` or `#` is path.
fn parse_strict(s: &str) -> RawParts<'_> {
    let b = s.as_bytes();
    let mut parts = RawParts::default();
    let mut pos = 0;

    if let Some(k) = b.iter().position(|c| matches!(c, b':' | b'/' | b'?' | b'#')) {
        if b[k] == b':' && is_scheme(&b[..k]) {
            parts.scheme = Some(&s[..k]);
            pos = k + 1;
        }
    }

    let slashes = if b[pos..].starts_with(b"///") {
        3
    } else if b[pos..].starts_with(b"//") {
        2
    } else {
        0
    };
    if slashes > 0 {
        pos = parse_authority(s, pos + slashes, true, &mut parts);
    }

    let rest = &b[pos..];
    let len = rest.iter().position(|c| matches!(c, b'?' | b'#')).unwrap_or(rest.len());
    parts.path = &s[pos..pos + len];
    pos += len;

    parse_query_fragment(s, pos, &mut parts);
    parts
}

/// Parse `[userinfo@]host[:port]` starting at `pos`; returns the end offset.
fn parse_authority<'a>(s: &'a str, mut pos: usize, allow_slash: bool, parts: &mut RawParts<'a>) -> usize {
    let b = s.as_bytes();

    if let Some(len) = userinfo_len(&b[pos..], allow_slash) {
        parts.userinfo = Some(&s[pos..pos + len]);
        pos += len + 1;
    }

    let host_len = b[pos..]
        .iter()
        .position(|c| matches!(c, b':' | b'/' | b'?' | b'#'))
        .unwrap_or(b.len() - pos);
    parts.host = &s[pos..pos + host_len];
    pos += host_len;

    if b.get(pos) == Some(&b':') {
        let digits = b[pos + 1..].iter().take_while(|c| c.is_ascii_digit()).count();
        parts.port = Some(&s[pos + 1..pos + 1 + digits]);
        pos += 1 + digits;
    }
    pos
}

fn parse_query_fragment<'a>(s: &'a str, mut pos: usize, parts: &mut RawParts<'a>) {
    let b = s.as_bytes();
    if b.get(pos) == Some(&b'?') {
        let len = b[pos + 1..].iter().position(|&c| c == b'#').unwrap_or(b.len() - pos - 1);
        parts.query = Some(&s[pos + 1..pos + 1 + len]);
        pos += 1 + len;
    }
    if b.get(pos) == Some(&b'#') {
        parts.fragment = Some(&s[pos + 1..]);
    }
}

/// A letter followed by letters, digits, `+` or `-`. Anything else before
/// the first `:` is read as part of the authority.
fn is_scheme(b: &[u8]) -> bool {
    match b.split_first() {
        Some((first, rest)) => {
            first.is_ascii_alphabetic() && rest.iter().all(|c| c.is_ascii_alphanumeric() || matches!(c, b'+' | b'-'))
        }
        None => false,
    }
}

/// Input opens with `name:password@`, which must not be read as a scheme.
fn starts_with_credentials(b: &[u8]) -> bool {
    let Some(i) = b.iter().position(|c| matches!(c, b':' | b'@')) else {
        return false;
    };
    if i == 0 || b[i] != b':' {
        return false;
    }
    matches!(b[i + 1..].iter().find(|c| matches!(c, b':' | b'@' | b'/')), Some(b'@'))
}

/// Length of a leading `user[:pass]` terminated by `@`, excluding the `@`.
fn userinfo_len(b: &[u8], allow_slash: bool) -> Option<usize> {
    let stop = |c: &u8| matches!(c, b':' | b'@') || (!allow_slash && *c == b'/');
    let i = b.iter().position(stop)?;
    match b[i] {
        b'@' => Some(i),
        b':' => {
            let j = i + 1 + b[i + 1..].iter().position(stop)?;
            (b[j] == b'@').then_some(j)
        }
        _ => None,
    }
}

// =============================================================================
// Host & Path Normalization
// =============================================================================

fn normalize_host(host: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(host.len());
    for &c in host {
        if c == b'.' && (out.is_empty() || out.last() == Some(&b'.')) {
            continue;
        }
        out.push(c.to_ascii_lowercase());
    }
    while out.last() == Some(&b'.') {
        out.pop();
    }
    out
}

/// Parse an IPv4 literal the way `inet_aton` does: one to four parts, each
/// decimal, octal (leading `0`) or hex (`0x`), the last part filling all
/// remaining bytes. `3279880203` and `0xc3.0x7f.0.013` both name 195.127.0.11.
pub fn parse_ip_literal(host: &[u8]) -> Option<[u8; 4]> {
    let text = std::str::from_utf8(host).ok()?;
    let values = text
        .split('.')
        .map(parse_ip_component)
        .collect::<Option<Vec<u64>>>()?;
    if values.len() > 4 {
        return None;
    }

    let (last, leading) = values.split_last()?;
    let mut addr: u32 = 0;
    for (i, &v) in leading.iter().enumerate() {
        if v > 0xff {
            return None;
        }
        addr |= (v as u32) << (24 - 8 * i);
    }
    let remaining_bits = 32 - 8 * leading.len() as u32;
    if *last >= 1u64 << remaining_bits {
        return None;
    }
    addr |= *last as u32;
    Some(addr.to_be_bytes())
}

fn parse_ip_component(part: &str) -> Option<u64> {
    let (digits, radix) = if let Some(hex) = part.strip_prefix("0x").or_else(|| part.strip_prefix("0X")) {
        (hex, 16)
    } else if part.len() > 1 && part.starts_with('0') {
        (&part[1..], 8)
    } else {
        (part, 10)
    };
    if digits.is_empty() || digits.len() > 11 || !digits.bytes().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(digits, radix).ok()
}

/// Resolve `.` and `..`, drop empty segments, keep a trailing slash. A
/// path ending in `.` or `..` names a directory.
fn normalize_path(path: &[u8]) -> Vec<u8> {
    let mut segments: Vec<&[u8]> = Vec::new();
    let mut directory = false;
    for segment in path.split(|&c| c == b'/') {
        directory = matches!(segment, b"" | b"." | b"..");
        match segment {
            b"" | b"." => {}
            b".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    let mut out = vec![b'/'];
    out.extend(segments.join(&b'/'));
    if directory && !out.ends_with(b"/") {
        out.push(b'/');
    }
    out
}

// =============================================================================
// Published Vectors
// =============================================================================

/// Canonicalization vectors published with the v2 protocol: raw input and
/// the expected matching form.
pub const TEST_VECTORS: &[(&[u8], &str)] = &[
    (b"http://host/%25%32%35", "http://host/%25"),
    (b"http://host/%25%32%35%25%32%35", "http://host/%25%25"),
    (b"http://host/%2525252525252525", "http://host/%25"),
    (b"http://host/asdf%25%32%35asd", "http://host/asdf%25asd"),
    (b"http://host/%%%25%32%35asd%%", "http://host/%25%25%25asd%25%25"),
    (b"http://www.google.com/", "http://www.google.com/"),
    (
        b"http://%31%36%38%2e%31%38%38%2e%39%39%2e%32%36/%2E%73%65%63%75%72%65/%77%77%77%2E%65%62%61%79%2E%63%6F%6D/",
        "http://168.188.99.26/.secure/www.ebay.com/",
    ),
    (
        b"http://195.127.0.11/uploads/%20%20%20%20/.verify/.eBaysecure=updateuserdataxplimnbqmn-xplmvalidateinfoswqpcmlx=hgplmcx/",
        "http://195.127.0.11/uploads/%20%20%20%20/.verify/.eBaysecure=updateuserdataxplimnbqmn-xplmvalidateinfoswqpcmlx=hgplmcx/",
    ),
    (
        b"http://host%23.com/%257Ea%2521b%2540c%2523d%2524e%25f%255E00%252611%252A22%252833%252944_55%252B",
        "http://host%23.com/~a!b@c%23d$e%25f^00&11*22(33)44_55+",
    ),
    (b"http://3279880203/blah", "http://195.127.0.11/blah"),
    (b"http://www.google.com/blah/..", "http://www.google.com/"),
    (b"www.google.com/", "http://www.google.com/"),
    (b"www.google.com", "http://www.google.com/"),
    (b"http://www.evil.com/blah#frag", "http://www.evil.com/blah"),
    (b"http://www.GOOgle.com/", "http://www.google.com/"),
    (b"http://www.google.com.../", "http://www.google.com/"),
    (b"http://www.google.com/foo\tbar\rbaz\n2", "http://www.google.com/foobarbaz2"),
    (b"http://www.google.com/q?", "http://www.google.com/q?"),
    (b"http://www.google.com/q?r?", "http://www.google.com/q?r?"),
    (b"http://www.google.com/q?r?s", "http://www.google.com/q?r?s"),
    (b"http://evil.com/foo#bar#baz", "http://evil.com/foo"),
    (b"http://evil.com/foo;", "http://evil.com/foo;"),
    (b"http://evil.com/foo?bar;", "http://evil.com/foo?bar;"),
    (b"http://\x01\x80.com/", "http://%01%80.com/"),
    (b"http://notrailingslash.com", "http://notrailingslash.com/"),
    (b"http://www.gotaport.com:1234/", "http://www.gotaport.com:1234/"),
    (b"  http://www.google.com/  ", "http://www.google.com/"),
    (b"http:// leadingspace.com/", "http://%20leadingspace.com/"),
    (b"http://%20leadingspace.com/", "http://%20leadingspace.com/"),
    (b"%20leadingspace.com/", "http://%20leadingspace.com/"),
    (b"https://www.securesite.com/", "https://www.securesite.com/"),
    (b"http://host.com/ab%23cd", "http://host.com/ab%23cd"),
    (b"http://host.com//twoslashes?more//slashes", "http://host.com/twoslashes?more//slashes"),
];
