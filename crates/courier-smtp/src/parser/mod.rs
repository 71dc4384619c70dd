//! SMTP reply parser.

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode};

/// Parses an SMTP reply from its response lines.
///
/// - Single: `250 OK`
/// - Multi: `250-First line`, `250-Second line`, `250 Last line`
///
/// # Errors
///
/// Returns an error if the reply is malformed or the lines disagree on the
/// reply code.
pub fn parse_reply(lines: &[String]) -> Result<Reply> {
    let Some(first) = lines.first() else {
        return Err(Error::Protocol("Empty reply".into()));
    };

    let code_str = first
        .get(0..3)
        .ok_or_else(|| Error::Protocol(format!("Reply too short: {first}")))?;
    if !code_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Protocol(format!("Invalid reply code: {code_str}")));
    }
    let code = code_str
        .parse::<u16>()
        .map_err(|_| Error::Protocol(format!("Invalid reply code: {code_str}")))?;

    let mut message = Vec::with_capacity(lines.len());
    for line in lines {
        if !line.starts_with(code_str) {
            return Err(Error::Protocol(format!("Inconsistent reply line: {line}")));
        }
        match line.as_bytes().get(3) {
            None => message.push(String::new()),
            Some(b' ' | b'-') => message.push(line[4..].to_string()),
            Some(_) => return Err(Error::Protocol(format!("Malformed reply line: {line}"))),
        }
    }

    Ok(Reply::new(ReplyCode::new(code), message))
}

/// Checks if a line is the last line of a reply.
///
/// Continuation lines carry `-` after the code; the last line carries a space
/// or nothing at all.
#[must_use]
pub fn is_last_reply_line(line: &str) -> bool {
    match line.as_bytes().get(3) {
        None => line.len() == 3,
        Some(sep) => *sep == b' ',
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_line_reply() {
        let lines = vec!["250 OK".to_string()];
        let reply = parse_reply(&lines).unwrap();
        assert_eq!(reply.code.as_u16(), 250);
        assert_eq!(reply.message, vec!["OK"]);
        assert!(reply.is_success());
    }

    #[test]
    fn test_parse_ehlo_reply() {
        let lines = vec![
            "250-mail.example.com greets you".to_string(),
            "250-SIZE 10240000".to_string(),
            "250 AUTH PLAIN LOGIN".to_string(),
        ];
        let reply = parse_reply(&lines).unwrap();
        assert_eq!(reply.code.as_u16(), 250);
        assert_eq!(
            reply.message,
            vec!["mail.example.com greets you", "SIZE 10240000", "AUTH PLAIN LOGIN"]
        );
    }

    #[test]
    fn test_parse_bare_code() {
        let reply = parse_reply(&["354".to_string()]).unwrap();
        assert_eq!(reply.code, ReplyCode::START_DATA);
        assert_eq!(reply.message, vec![String::new()]);
    }

    #[test]
    fn test_is_last_reply_line() {
        assert!(is_last_reply_line("250 OK"));
        assert!(is_last_reply_line("250"));
        assert!(!is_last_reply_line("250-Continuing"));
        assert!(!is_last_reply_line("25"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_reply(&[]).is_err());
        assert!(parse_reply(&["25".to_string()]).is_err());
        assert!(parse_reply(&["ABC OK".to_string()]).is_err());
        assert!(parse_reply(&["250+OK".to_string()]).is_err());
    }

    #[test]
    fn test_parse_inconsistent_codes() {
        let lines = vec!["250-first".to_string(), "550 second".to_string()];
        assert!(parse_reply(&lines).is_err());
    }
}
