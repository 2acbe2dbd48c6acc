//! HTTP client for the table service REST surface

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use logmeter_shared::utils::time::rfc1123;
use reqwest::{Method, Request};
use serde_json::json;
use tracing::debug;
use url::Url;

use super::auth::{AuthScheme, HeaderList, SharedKeySigner};
use super::batch::{check_batch_response, BatchEncoder, BatchOperation};
use super::entity::TableEntity;
use super::error::TableError;
use super::TableStore;
use crate::config::TableStoreConfig;

const ACCEPT_NO_METADATA: &str = "application/json;odata=nometadata";
const JSON_CONTENT_TYPE: &str = "application/json";

pub struct TableClient {
    http: reqwest::Client,
    signer: SharedKeySigner,
    base_url: String,
    api_version: String,
}

impl TableClient {
    pub fn new(config: &TableStoreConfig) -> Result<Self, TableError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Self::with_client(config, http)
    }

    pub fn with_client(config: &TableStoreConfig, http: reqwest::Client) -> Result<Self, TableError> {
        let signer = SharedKeySigner::new(config.account_name.clone(), &config.account_key)?;
        let base_url = config.base_url();
        // Fail early on a malformed endpoint
        Url::parse(&base_url)?;
        Ok(Self {
            http,
            signer,
            base_url,
            api_version: config.api_version.clone(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, TableError> {
        Ok(Url::parse(&format!("{}/{}", self.base_url, path))?)
    }

    fn standard_headers(&self, date: &str, content_type: &str, content_length: usize) -> HeaderList {
        vec![
            ("x-ms-version".to_string(), self.api_version.clone()),
            ("x-ms-date".to_string(), date.to_string()),
            ("Accept".to_string(), ACCEPT_NO_METADATA.to_string()),
            ("Accept-Charset".to_string(), "UTF-8".to_string()),
            ("Content-Type".to_string(), content_type.to_string()),
            ("Content-Length".to_string(), content_length.to_string()),
        ]
    }

    /// Sign and assemble a POST request. `Content-Length` is signed but left
    /// for the HTTP client to set from the body.
    fn build(
        &self,
        scheme: AuthScheme,
        url: Url,
        mut headers: HeaderList,
        body: String,
    ) -> Result<Request, TableError> {
        let authorization = self
            .signer
            .authorization(scheme, Method::POST.as_str(), &headers, &url);
        headers.push(("Authorization".to_string(), authorization));

        let mut builder = self.http.request(Method::POST, url);
        for (name, value) in headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("Content-Length"))
        {
            builder = builder.header(name.as_str(), value.as_str());
        }
        Ok(builder.body(body).build()?)
    }

    pub fn prepare_create_table(&self, table: &str, date: &str) -> Result<Request, TableError> {
        let body = serde_json::to_string(&json!({ "TableName": table }))?;
        let headers = self.standard_headers(date, JSON_CONTENT_TYPE, body.len());
        self.build(AuthScheme::SharedKey, self.url("Tables")?, headers, body)
    }

    pub fn prepare_insert_entity(
        &self,
        table: &str,
        entity: &TableEntity,
        date: &str,
    ) -> Result<Request, TableError> {
        let body = entity.to_json()?;
        let headers = self.standard_headers(date, JSON_CONTENT_TYPE, body.len());
        self.build(AuthScheme::SharedKeyLite, self.url(table)?, headers, body)
    }

    pub fn prepare_insert_batch(
        &self,
        table: &str,
        entities: &[TableEntity],
        encoder: &BatchEncoder,
        date: &str,
    ) -> Result<Request, TableError> {
        let partitions = entities
            .iter()
            .map(|e| e.partition_key.as_str())
            .collect::<std::collections::HashSet<_>>();
        if partitions.len() > 1 {
            return Err(TableError::InvalidBatch(format!(
                "batch spans {} partitions",
                partitions.len()
            )));
        }
        if entities.len() > crate::MAX_BATCH_ENTITIES {
            return Err(TableError::InvalidBatch(format!(
                "batch holds {} entities, limit is {}",
                entities.len(),
                crate::MAX_BATCH_ENTITIES
            )));
        }

        let table_url = self.url(table)?;
        let operations = entities
            .iter()
            .map(|e| Ok(BatchOperation::insert(table_url.as_str(), e.to_json()?)))
            .collect::<Result<Vec<_>, TableError>>()?;
        let body = encoder.encode(&operations);

        let mut headers = self.standard_headers(date, &encoder.content_type(), body.len());
        headers.push(("DataServiceVersion".to_string(), "3.0;".to_string()));
        headers.push(("MaxDataServiceVersion".to_string(), "3.0;NetFx".to_string()));
        self.build(AuthScheme::SharedKeyLite, self.url("$batch")?, headers, body)
    }

    /// Send a request; any non-2xx response becomes a `TableError::Service`.
    async fn send(&self, request: Request) -> Result<String, TableError> {
        let url = request.url().to_string();
        let response = self.http.execute(request).await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!(url = %url, status = %status, "Table store response");

        if status.is_success() {
            Ok(body)
        } else {
            Err(TableError::from_response(status.as_u16(), &body))
        }
    }
}

fn now() -> String {
    rfc1123(Utc::now())
}

#[async_trait]
impl TableStore for TableClient {
    async fn create_table(&self, table: &str) -> Result<(), TableError> {
        let request = self.prepare_create_table(table, &now())?;
        match self.send(request).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_already_exists() => {
                debug!(table = %table, "Table already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn insert_entity(&self, table: &str, entity: &TableEntity) -> Result<(), TableError> {
        let request = self.prepare_insert_entity(table, entity, &now())?;
        self.send(request).await.map(|_| ())
    }

    async fn insert_batch(&self, table: &str, entities: &[TableEntity]) -> Result<(), TableError> {
        if entities.is_empty() {
            return Ok(());
        }
        let request = self.prepare_insert_batch(table, entities, &BatchEncoder::new(), &now())?;
        let body = self.send(request).await?;
        check_batch_response(&body).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const DATE: &str = "Sun, 31 Jul 2016 19:00:00 GMT";

    fn config(endpoint: Option<String>) -> TableStoreConfig {
        TableStoreConfig {
            account_name: "acct".to_string(),
            account_key: "bG9nbWV0ZXItdGVzdC1rZXk=".to_string(),
            table_prefix: "usage".to_string(),
            endpoint,
            endpoint_suffix: crate::config::DEFAULT_ENDPOINT_SUFFIX.to_string(),
            api_version: crate::config::DEFAULT_API_VERSION.to_string(),
            request_timeout_secs: 5,
        }
    }

    fn header<'a>(request: &'a Request, name: &str) -> &'a str {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    fn body(request: &Request) -> String {
        let bytes = request.body().and_then(|b| b.as_bytes()).unwrap_or_default();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_create_table_request() {
        let client = TableClient::new(&config(None)).unwrap();
        let request = client.prepare_create_table("usage201607", DATE).unwrap();

        assert_eq!(request.method(), Method::POST);
        assert_eq!(
            request.url().as_str(),
            "https://acct.table.core.windows.net/Tables"
        );
        assert_eq!(body(&request), r#"{"TableName":"usage201607"}"#);
        assert_eq!(header(&request, "x-ms-version"), "2015-02-21");
        assert_eq!(header(&request, "x-ms-date"), DATE);
        assert_eq!(header(&request, "accept"), ACCEPT_NO_METADATA);
        assert_eq!(header(&request, "accept-charset"), "UTF-8");

        let signer = SharedKeySigner::new("acct", "bG9nbWV0ZXItdGVzdC1rZXk=").unwrap();
        let expected = signer.authorization(
            AuthScheme::SharedKey,
            "POST",
            &client.standard_headers(DATE, JSON_CONTENT_TYPE, 27),
            request.url(),
        );
        assert_eq!(header(&request, "authorization"), expected);
    }

    #[test]
    fn test_batch_request() {
        let client = TableClient::new(&config(None)).unwrap();
        let entities = vec![
            TableEntity::new("7", "a").with_property("Files", 1),
            TableEntity::new("7", "b").with_property("Files", 2),
        ];
        let encoder = BatchEncoder::with_ids("b1", "c1");
        let request = client
            .prepare_insert_batch("usage201607", &entities, &encoder, DATE)
            .unwrap();

        assert_eq!(
            request.url().as_str(),
            "https://acct.table.core.windows.net/$batch"
        );
        assert_eq!(
            header(&request, "content-type"),
            "multipart/mixed; boundary=batch_b1"
        );
        assert_eq!(header(&request, "dataserviceversion"), "3.0;");
        assert_eq!(header(&request, "maxdataserviceversion"), "3.0;NetFx");
        assert!(header(&request, "authorization").starts_with("SharedKeyLite acct:"));

        let body = body(&request);
        assert_eq!(
            body.matches("POST https://acct.table.core.windows.net/usage201607 HTTP/1.1")
                .count(),
            2
        );
        assert!(body.ends_with("--batch_b1--\r\n"));
    }

    #[test]
    fn test_batch_rejects_mixed_partitions() {
        let client = TableClient::new(&config(None)).unwrap();
        let entities = vec![TableEntity::new("1", "a"), TableEntity::new("2", "b")];
        let result =
            client.prepare_insert_batch("usage201607", &entities, &BatchEncoder::new(), DATE);
        assert!(matches!(result, Err(TableError::InvalidBatch(_))));
    }

    #[test]
    fn test_emulator_endpoint_path() {
        let client = TableClient::new(&config(Some(
            "http://127.0.0.1:10002/devstoreaccount1".to_string(),
        )))
        .unwrap();
        let entity = TableEntity::new("1", "a");
        let request = client
            .prepare_insert_entity("usage201607", &entity, DATE)
            .unwrap();
        assert_eq!(
            request.url().as_str(),
            "http://127.0.0.1:10002/devstoreaccount1/usage201607"
        );
    }

    fn local_client(endpoint: String) -> TableClient {
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        TableClient::with_client(&config(Some(endpoint)), http).unwrap()
    }

    /// Serve one canned HTTP response on a local port.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}/acct", addr)
    }

    #[tokio::test]
    async fn test_existing_table_is_success() {
        let endpoint = serve_once(
            "409 Conflict",
            r#"{"odata.error":{"code":"TableAlreadyExists","message":{"value":"The table specified already exists."}}}"#,
        )
        .await;
        let client = local_client(endpoint);
        client.create_table("usage201607").await.unwrap();
    }

    #[tokio::test]
    async fn test_service_error_is_typed() {
        let endpoint = serve_once(
            "403 Forbidden",
            r#"{"odata.error":{"code":"AuthenticationFailed","message":{"value":"Server failed to authenticate the request."}}}"#,
        )
        .await;
        let client = local_client(endpoint);
        let err = client
            .insert_entity("usage201607", &TableEntity::new("1", "a"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.code(), Some("AuthenticationFailed"));
    }
}
