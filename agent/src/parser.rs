//! nginx access log line parser
//!
//! Expected format, nine fields in this order:
//!
//! ```text
//! 111.111.111.111(-) "[31/Jul/2016:22:54:30 +0400]" "0.247" "GET /some/file.jpg HTTP/1.1" "200" "32327" "some-domain.com" "http://some-referrer.com/" "User Agent"
//! ```
//!
//! The client address may also be quoted.

use chrono::{DateTime, Utc};
use logmeter_shared::LogRecord;
use thiserror::Error;

const FIELD_COUNT: usize = 9;
const TIME_FORMAT: &str = "[%d/%b/%Y:%H:%M:%S %z]";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("expected 9 fields (address, time, duration, request, status, size, domain, referrer, user agent), found {0}")]
    FieldCount(usize),

    #[error("invalid timestamp {value:?}: {source}")]
    Timestamp {
        value: String,
        source: chrono::ParseError,
    },

    #[error("invalid {field} {value:?}")]
    Number { field: &'static str, value: String },

    #[error("malformed request line {0:?}")]
    RequestLine(String),
}

/// Contents of every `"..."` span, in order. An unterminated quote ends the
/// scan.
fn quoted_fields(line: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut rest = line;
    while let Some(start) = rest.find('"') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('"') else {
            break;
        };
        fields.push(&after[..end]);
        rest = &after[end + 1..];
    }
    fields
}

fn split_fields(line: &str) -> Vec<&str> {
    let line = line.trim();
    if line.starts_with('"') {
        return quoted_fields(line);
    }
    // Unquoted leading address
    let (address, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let mut fields = vec![address];
    fields.extend(quoted_fields(rest));
    fields
}

fn number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ParseError> {
    value.parse().map_err(|_| ParseError::Number {
        field,
        value: value.to_string(),
    })
}

/// Parse one access log line.
pub fn parse_line(line: &str) -> Result<LogRecord, ParseError> {
    let fields = split_fields(line);
    if fields.len() != FIELD_COUNT {
        return Err(ParseError::FieldCount(fields.len()));
    }

    let time: DateTime<Utc> = DateTime::parse_from_str(fields[1], TIME_FORMAT)
        .map_err(|source| ParseError::Timestamp {
            value: fields[1].to_string(),
            source,
        })?
        .with_timezone(&Utc);

    let duration: f64 = number("duration", fields[2])?;

    // The path may contain spaces; it is everything between verb and protocol
    let request: Vec<&str> = fields[3].split(' ').collect();
    if request.len() < 3 {
        return Err(ParseError::RequestLine(fields[3].to_string()));
    }
    let verb = request[0];
    let path = request[1..request.len() - 1].join(" ");

    let status: u16 = number("status", fields[4])?;
    let size: u64 = number("size", fields[5])?;

    let address = fields[0];
    let client_ip = address
        .find('(')
        .map(|i| &address[..i])
        .unwrap_or(address);

    Ok(LogRecord {
        client_ip: client_ip.to_string(),
        time,
        duration,
        verb: verb.to_string(),
        path,
        status,
        size,
        domain: fields[6].to_string(),
        referrer: fields[7].to_string(),
        user_agent: fields[8].to_string(),
    })
}
