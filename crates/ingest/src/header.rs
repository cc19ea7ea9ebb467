//! Header parsing for raw public-inbox message blobs.
//!
//! Only the header block is parsed (`mailparse::parse_headers`); bodies and MIME
//! parts are never decoded. `Message-ID` is the sole required field: every other
//! header degrades to `None` when it is absent or unparseable.

use mailparse::{MailHeaderMap, MailParseError};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors that reject a whole message.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed header block: {0}")]
    Malformed(#[from] MailParseError),
    #[error("payload has no headers")]
    NoHeaders,
    #[error("missing Message-ID header")]
    MissingMessageId,
}

/// Outcome of parsing a `References` or `In-Reply-To` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AncestorChain {
    /// Message ids, oldest ancestor first.
    Ids(Vec<String>),
    /// Header was present but yielded no message id.
    Malformed { raw: String },
}

impl AncestorChain {
    pub fn ids(&self) -> &[String] {
        match self {
            AncestorChain::Ids(ids) => ids,
            AncestorChain::Malformed { .. } => &[],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub message_id: String,
    pub subject: Option<String>,
    pub from_name: Option<String>,
    pub from_addr: Option<String>,
    pub date_sent: Option<i64>,
    pub references: Option<AncestorChain>,
    pub in_reply_to: Option<AncestorChain>,
}

fn bracketed_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<([^<>\s]+)>").expect("static regex"))
}

fn sanitize_text(text: &str) -> String {
    text.replace('\0', "").trim().to_string()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| sanitize_text(&v))
        .filter(|v| !v.is_empty())
}

/// Canonical form of a message id: trimmed, angle brackets removed.
pub fn normalize_message_id(raw: &str) -> Option<String> {
    let raw = sanitize_text(raw);
    let id = match bracketed_id_regex().captures(&raw) {
        Some(caps) => caps[1].to_string(),
        None => raw.trim_matches(&['<', '>'][..]).trim().to_string(),
    };
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// Every message id in a header value, in order, duplicates dropped.
///
/// Bracketed ids win; bare `local@domain` tokens are accepted only when the
/// header contains no brackets at all (some mailers omit them).
fn extract_ids(raw: &str) -> Vec<String> {
    let mut ids: Vec<String> = bracketed_id_regex()
        .captures_iter(raw)
        .map(|caps| caps[1].to_string())
        .collect();

    if ids.is_empty() && !raw.contains('<') {
        ids = raw
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|token| token.contains('@'))
            .map(|token| token.to_string())
            .collect();
    }

    let mut seen = std::collections::HashSet::new();
    ids.retain(|id| seen.insert(id.clone()));
    ids
}

fn parse_chain(raw: Option<String>, single: bool) -> Option<AncestorChain> {
    let raw = raw.map(|r| sanitize_text(&r)).filter(|r| !r.is_empty())?;
    let mut ids = extract_ids(&raw);
    if ids.is_empty() {
        log::debug!("unparseable reference header `{}`", raw);
        return Some(AncestorChain::Malformed { raw });
    }
    if single {
        ids.truncate(1);
    }
    Some(AncestorChain::Ids(ids))
}

fn parse_from(raw: Option<String>) -> (Option<String>, Option<String>) {
    let Some(raw) = non_empty(raw) else {
        return (None, None);
    };
    match mailparse::addrparse(&raw) {
        Ok(list) => {
            let first = list.iter().find_map(|addr| match addr {
                mailparse::MailAddr::Single(info) => Some(info.clone()),
                mailparse::MailAddr::Group(group) => group.addrs.first().cloned(),
            });
            match first {
                Some(info) => (
                    non_empty(info.display_name),
                    non_empty(Some(info.addr)),
                ),
                None => (None, None),
            }
        }
        Err(e) => {
            log::debug!("unparseable From header `{}`: {}", raw, e);
            (None, None)
        }
    }
}

fn parse_date(raw: Option<String>) -> Option<i64> {
    let raw = non_empty(raw)?;
    match mailparse::dateparse(&raw) {
        Ok(ts) => Some(ts),
        Err(e) => {
            log::debug!("unparseable Date header `{}`: {}", raw, e);
            None
        }
    }
}

/// Parse the header block of a raw email.
pub fn parse_message(raw: &[u8]) -> Result<ParsedMessage, ParseError> {
    let (headers, _body_offset) = mailparse::parse_headers(raw)?;
    if headers.is_empty() {
        return Err(ParseError::NoHeaders);
    }

    let message_id = headers
        .get_first_value("Message-ID")
        .and_then(|v| normalize_message_id(&v))
        .ok_or(ParseError::MissingMessageId)?;

    let subject = non_empty(headers.get_first_value("Subject"));
    let (from_name, from_addr) = parse_from(headers.get_first_value("From"));
    let date_sent = parse_date(headers.get_first_value("Date"));
    let references = parse_chain(headers.get_first_value("References"), false);
    let in_reply_to = parse_chain(headers.get_first_value("In-Reply-To"), true);

    log::trace!("parsed {} ({:?})", message_id, subject);

    Ok(ParsedMessage {
        message_id,
        subject,
        from_name,
        from_addr,
        date_sent,
        references,
        in_reply_to,
    })
}

/// Subject with reply prefixes and bracketed tags removed, lowercased.
///
/// `"Re: [PATCH v2 1/3] Fix leak"` becomes `"fix leak"`.
pub fn normalize_subject(subject: &str) -> String {
    let mut normalized = subject.trim().to_lowercase();

    loop {
        let before = normalized.clone();

        for prefix in &["re:", "fwd:", "fw:", "aw:"] {
            if let Some(rest) = normalized.strip_prefix(prefix) {
                normalized = rest.trim_start().to_string();
            }
        }

        if normalized.starts_with('[') {
            if let Some(end_bracket) = normalized.find(']') {
                normalized = normalized[end_bracket + 1..].trim_start().to_string();
            }
        }

        if before == normalized {
            break;
        }
    }

    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}
