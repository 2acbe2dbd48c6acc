//! Shared Key request signing
//!
//! Two schemes are supported. `SharedKey` signs the verb, the standard
//! content headers, every `x-ms-` header and the resource; `SharedKeyLite`
//! signs only the request date and the resource path. Both produce
//! `base64(HMAC-SHA256(account_key, string_to_sign))`.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::Url;

use super::error::TableError;

type HmacSha256 = Hmac<Sha256>;

/// Request headers as `(name, value)` pairs in insertion order
pub type HeaderList = Vec<(String, String)>;

const MS_HEADER_PREFIX: &str = "x-ms-";

/// Standard headers of the SharedKey string, in signing order
const SIGNED_STANDARD_HEADERS: [&str; 11] = [
    "Content-Encoding",
    "Content-Language",
    "Content-Length",
    "Content-MD5",
    "Content-Type",
    "Date",
    "If-Modified-Since",
    "If-Match",
    "If-None-Match",
    "If-Unmodified-Since",
    "Range",
];

/// Authorization scheme of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    SharedKey,
    SharedKeyLite,
}

impl AuthScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthScheme::SharedKey => "SharedKey",
            AuthScheme::SharedKeyLite => "SharedKeyLite",
        }
    }
}

/// Case-insensitive header lookup; missing headers sign as empty.
fn header<'a>(headers: &'a [(String, String)], name: &str) -> &'a str {
    headers
        .iter()
        .find(|(n, _)| n.trim().eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
        .unwrap_or("")
}

#[derive(Clone)]
pub struct SharedKeySigner {
    account: String,
    key: Vec<u8>,
}

impl std::fmt::Debug for SharedKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKeySigner")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

impl SharedKeySigner {
    /// Create a signer from the account name and its base64 account key.
    pub fn new(account: impl Into<String>, account_key: &str) -> Result<Self, TableError> {
        let key = STANDARD.decode(account_key.trim())?;
        Ok(Self {
            account: account.into(),
            key,
        })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// `x-ms-*` headers, lower-cased and sorted, one `name:value` per line.
    pub fn canonicalized_headers(headers: &[(String, String)]) -> String {
        let ms_headers: BTreeMap<String, &str> = headers
            .iter()
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.as_str()))
            .filter(|(name, _)| name.starts_with(MS_HEADER_PREFIX))
            .collect();

        ms_headers
            .iter()
            .map(|(name, value)| format!("{}:{}", name, value))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// `/{account}{path}`, followed by one sorted `key:v1,v2` line per query
    /// parameter.
    pub fn canonicalized_resource(&self, url: &Url) -> String {
        let mut resource = format!("/{}{}", self.account, url.path());

        let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, value) in url.query_pairs() {
            params
                .entry(key.into_owned())
                .or_default()
                .push(value.into_owned());
        }
        for (key, mut values) in params {
            values.sort();
            resource.push('\n');
            resource.push_str(&key);
            resource.push(':');
            resource.push_str(&values.join(","));
        }
        resource
    }

    pub fn shared_key_string(&self, verb: &str, headers: &[(String, String)], url: &Url) -> String {
        let mut lines: Vec<&str> = Vec::with_capacity(SIGNED_STANDARD_HEADERS.len() + 1);
        lines.push(verb);
        for name in SIGNED_STANDARD_HEADERS {
            let value = header(headers, name);
            // A zero length signs as empty
            if name == "Content-Length" && value == "0" {
                lines.push("");
            } else {
                lines.push(value);
            }
        }

        let mut out = lines.join("\n");
        out.push('\n');
        out.push_str(&Self::canonicalized_headers(headers));
        out.push('\n');
        out.push_str(&self.canonicalized_resource(url));
        out
    }

    pub fn shared_key_lite_string(&self, headers: &[(String, String)], url: &Url) -> String {
        format!(
            "{}\n/{}{}",
            header(headers, "x-ms-date"),
            self.account,
            url.path()
        )
    }

    /// base64(HMAC-SHA256(key, message))
    pub fn sign(&self, message: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size");
        mac.update(message.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Value of the `Authorization` header for a request.
    pub fn authorization(
        &self,
        scheme: AuthScheme,
        verb: &str,
        headers: &[(String, String)],
        url: &Url,
    ) -> String {
        let string_to_sign = match scheme {
            AuthScheme::SharedKey => self.shared_key_string(verb, headers, url),
            AuthScheme::SharedKeyLite => self.shared_key_lite_string(headers, url),
        };
        format!(
            "{} {}:{}",
            scheme.as_str(),
            self.account,
            self.sign(&string_to_sign)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "bG9nbWV0ZXItdGVzdC1rZXk=";
    const DATE: &str = "Sun, 31 Jul 2016 19:00:00 GMT";

    fn signer() -> SharedKeySigner {
        SharedKeySigner::new("acct", KEY).unwrap()
    }

    fn create_table_headers() -> HeaderList {
        vec![
            ("x-ms-version".to_string(), "2015-02-21".to_string()),
            ("x-ms-date".to_string(), DATE.to_string()),
            (
                "Accept".to_string(),
                "application/json;odata=nometadata".to_string(),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Content-Length".to_string(), "17".to_string()),
        ]
    }

    fn url(path: &str) -> Url {
        Url::parse(&format!("https://acct.table.core.windows.net{}", path)).unwrap()
    }

    #[test]
    fn test_rejects_malformed_key() {
        assert!(matches!(
            SharedKeySigner::new("acct", "not base64!"),
            Err(TableError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_shared_key_string_layout() {
        let s = signer().shared_key_string("POST", &create_table_headers(), &url("/Tables"));
        assert_eq!(
            s,
            "POST\n\n\n17\n\napplication/json\n\n\n\n\n\n\n\
             x-ms-date:Sun, 31 Jul 2016 19:00:00 GMT\nx-ms-version:2015-02-21\n\
             /acct/Tables"
        );
    }

    #[test]
    fn test_zero_content_length_signs_empty() {
        let mut headers = create_table_headers();
        headers.retain(|(n, _)| n != "Content-Length");
        let without = signer().shared_key_string("POST", &headers, &url("/Tables"));
        headers.push(("Content-Length".to_string(), "0".to_string()));
        let zero = signer().shared_key_string("POST", &headers, &url("/Tables"));
        assert_eq!(without, zero);
    }

    #[test]
    fn test_known_signatures() {
        let signer = signer();
        assert_eq!(
            signer.authorization(
                AuthScheme::SharedKey,
                "POST",
                &create_table_headers(),
                &url("/Tables")
            ),
            "SharedKey acct:/tm0e0DWbu6VQjbhemolW3VoVsmBIXIN3goDJ6n3lIQ="
        );
        assert_eq!(
            signer.authorization(
                AuthScheme::SharedKeyLite,
                "POST",
                &create_table_headers(),
                &url("/$batch")
            ),
            "SharedKeyLite acct:Fz6vZj6bJZQj4PEpmJqvwOb/8h7ISWWzkz7TViW6D7M="
        );
    }

    #[test]
    fn test_signature_is_deterministic() {
        let signer = signer();
        let a = signer.authorization(
            AuthScheme::SharedKey,
            "POST",
            &create_table_headers(),
            &url("/Tables"),
        );
        let b = signer.authorization(
            AuthScheme::SharedKey,
            "POST",
            &create_table_headers(),
            &url("/Tables"),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_any_signed_header_changes_signature() {
        let signer = signer();
        let base = signer.authorization(
            AuthScheme::SharedKey,
            "POST",
            &create_table_headers(),
            &url("/Tables"),
        );

        for (name, value) in [
            ("x-ms-date", "Sun, 31 Jul 2016 19:00:01 GMT"),
            ("x-ms-version", "2019-02-02"),
            ("x-ms-client-request-id", "abc"),
            ("Content-Type", "text/plain"),
            ("Content-Length", "18"),
            ("Range", "bytes=0-1"),
        ] {
            let mut headers = create_table_headers();
            headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
            headers.push((name.to_string(), value.to_string()));
            let changed = signer.authorization(AuthScheme::SharedKey, "POST", &headers, &url("/Tables"));
            assert_ne!(base, changed, "changing {name} must change the signature");
        }

        let other_verb =
            signer.authorization(AuthScheme::SharedKey, "PUT", &create_table_headers(), &url("/Tables"));
        assert_ne!(base, other_verb);
    }

    #[test]
    fn test_canonicalized_headers() {
        let headers = vec![
            (" X-MS-Version ".to_string(), "2015-02-21".to_string()),
            ("x-ms-date".to_string(), DATE.to_string()),
            ("Accept".to_string(), "application/json".to_string()),
        ];
        assert_eq!(
            SharedKeySigner::canonicalized_headers(&headers),
            "x-ms-date:Sun, 31 Jul 2016 19:00:00 GMT\nx-ms-version:2015-02-21"
        );
    }

    #[test]
    fn test_canonicalized_resource_with_query() {
        let resource = signer().canonicalized_resource(&url("/usage201607()?comp=x&$top=5&comp=a"));
        assert_eq!(resource, "/acct/usage201607()\n$top:5\ncomp:a,x");
    }
}
