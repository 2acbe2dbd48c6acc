//! Entity group transaction encoding
//!
//! A batch is a `multipart/mixed` body holding exactly one changeset. Each
//! write inside the changeset is an embedded `application/http` request. The
//! service applies the changeset atomically and answers with a multipart
//! body of the same shape.

use uuid::Uuid;

use super::error::TableError;

const CRLF: &str = "\r\n";

/// One write inside a changeset
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOperation {
    pub method: &'static str,
    pub url: String,
    pub body: String,
}

impl BatchOperation {
    pub fn insert(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: "POST",
            url: url.into(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchEncoder {
    batch_boundary: String,
    changeset_boundary: String,
}

impl Default for BatchEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchEncoder {
    /// Encoder with fresh random boundaries.
    pub fn new() -> Self {
        Self::with_ids(&Uuid::new_v4().to_string(), &Uuid::new_v4().to_string())
    }

    pub fn with_ids(batch_id: &str, changeset_id: &str) -> Self {
        Self {
            batch_boundary: format!("batch_{}", batch_id),
            changeset_boundary: format!("changeset_{}", changeset_id),
        }
    }

    /// `Content-Type` of the outer request.
    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary={}", self.batch_boundary)
    }

    pub fn encode(&self, operations: &[BatchOperation]) -> String {
        let mut body = String::new();
        body.push_str(&format!("--{}{CRLF}", self.batch_boundary));
        body.push_str(&format!(
            "Content-Type: multipart/mixed; boundary={}{CRLF}{CRLF}",
            self.changeset_boundary
        ));

        for op in operations {
            body.push_str(&format!("--{}{CRLF}", self.changeset_boundary));
            body.push_str(&format!("Content-Type: application/http{CRLF}"));
            body.push_str(&format!("Content-Transfer-Encoding: binary{CRLF}{CRLF}"));
            body.push_str(&format!("{} {} HTTP/1.1{CRLF}", op.method, op.url));
            body.push_str(&format!("Content-Type: application/json{CRLF}"));
            body.push_str(&format!(
                "Accept: application/json;odata=minimalmetadata{CRLF}"
            ));
            body.push_str(&format!("Prefer: return-no-content{CRLF}"));
            body.push_str(&format!("DataServiceVersion: 3.0;{CRLF}{CRLF}"));
            body.push_str(&op.body);
            body.push_str(CRLF);
        }

        body.push_str(&format!("--{}--{CRLF}", self.changeset_boundary));
        body.push_str(&format!("--{}--{CRLF}", self.batch_boundary));
        body
    }
}

/// Inspect a batch response body. The outer request succeeds even when the
/// changeset is rolled back, so the embedded status lines decide the result.
/// Returns the number of embedded responses on success.
pub fn check_batch_response(body: &str) -> Result<usize, TableError> {
    let mut lines = body.lines().map(|l| l.trim_end_matches('\r'));
    let mut responses = 0;

    while let Some(line) = lines.next() {
        let Some(status_line) = line.strip_prefix("HTTP/1.1 ") else {
            continue;
        };
        responses += 1;

        let status: u16 = status_line
            .split_whitespace()
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        if (200..400).contains(&status) {
            continue;
        }

        // Skip the embedded headers, then take the body up to the boundary
        let error_body: Vec<&str> = lines
            .by_ref()
            .skip_while(|l| !l.is_empty())
            .skip(1)
            .take_while(|l| !l.starts_with("--"))
            .collect();
        return Err(TableError::from_response(status, &error_body.join("\n")));
    }

    Ok(responses)
}
