//! reqwest implementation of [`TransferApi`].

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{ApiError, ApiResult, TransferApi};
use crate::config::{normalize_api_base_url, ConfigError};
use crate::models::{HttpMethod, OfflineRequest, Transfer, TransferId};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Clone)]
pub struct HttpTransferApi {
    base_url: String,
    client: Client,
}

impl HttpTransferApi {
    /// Build a client for `base_url`, e.g. `https://api.example.com/api`.
    ///
    /// Request deadlines are enforced by the orchestrator, not here.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let base_url = normalize_api_base_url(base_url)?;
        let client = Client::builder()
            .build()
            .map_err(|error| ConfigError::Invalid(format!("HTTP client: {error}")))?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the API host answers within `timeout`.
    ///
    /// Any HTTP response counts, error statuses included; only a failed
    /// connection or a timeout reads as unreachable.
    pub async fn is_reachable(&self, timeout: Duration) -> bool {
        match self
            .client
            .head(&self.base_url)
            .timeout(timeout)
            .send()
            .await
        {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!("Reachability check against {} failed: {error}", self.base_url);
                false
            }
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn request(&self, method: Method, path: &str, token: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(token)
            .header("Accept", "application/json")
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> ApiResult<T> {
        let response = Self::check(request.send().await?).await?;
        Ok(response.json::<T>().await?)
    }

    async fn check(response: Response) -> ApiResult<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status, &body))
    }
}

/// Servers answer either with the bare object or wrapped in a named field.
#[derive(Deserialize)]
#[serde(untagged)]
enum TransferBody {
    Wrapped { transfer: Transfer },
    Bare(Transfer),
}

impl From<TransferBody> for Transfer {
    fn from(body: TransferBody) -> Self {
        match body {
            TransferBody::Wrapped { transfer } | TransferBody::Bare(transfer) => transfer,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TransferListBody {
    Wrapped { transfers: Vec<Transfer> },
    Bare(Vec<Transfer>),
}

impl From<TransferListBody> for Vec<Transfer> {
    fn from(body: TransferListBody) -> Self {
        match body {
            TransferListBody::Wrapped { transfers } | TransferListBody::Bare(transfers) => {
                transfers
            }
        }
    }
}

const fn reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

impl TransferApi for HttpTransferApi {
    async fn create_transfer(&self, token: &str, transfer: &Transfer) -> ApiResult<Transfer> {
        let request = self
            .request(Method::POST, "/transfers", token)
            .header(IDEMPOTENCY_HEADER, transfer.id.as_str())
            .json(transfer);
        Ok(Self::send::<TransferBody>(request).await?.into())
    }

    async fn get_transfer(&self, token: &str, id: &TransferId) -> ApiResult<Transfer> {
        let request = self.request(Method::GET, &format!("/transfers/{id}"), token);
        Ok(Self::send::<TransferBody>(request).await?.into())
    }

    async fn approve(&self, token: &str, id: &TransferId) -> ApiResult<Transfer> {
        let request = self
            .request(Method::POST, &format!("/transfers/{id}/approve"), token)
            .header(IDEMPOTENCY_HEADER, format!("{id}:approve"));
        Ok(Self::send::<TransferBody>(request).await?.into())
    }

    async fn scan_qr(&self, token: &str, raw: &str) -> ApiResult<Transfer> {
        let request = self
            .request(Method::POST, "/transfers/scan-qr", token)
            .json(&serde_json::json!({ "qrData": raw }));
        Ok(Self::send::<TransferBody>(request).await?.into())
    }

    async fn list_pending(&self, token: &str) -> ApiResult<Vec<Transfer>> {
        let request = self.request(Method::GET, "/transfers/pending", token);
        Ok(Self::send::<TransferListBody>(request).await?.into())
    }

    async fn list_for_property(&self, token: &str, property_id: &str) -> ApiResult<Vec<Transfer>> {
        let request = self.request(
            Method::GET,
            &format!("/transfers/property/{}", property_id.trim()),
            token,
        );
        Ok(Self::send::<TransferListBody>(request).await?.into())
    }

    async fn replay(&self, token: &str, request: &OfflineRequest) -> ApiResult<()> {
        let mut builder = self
            .request(reqwest_method(request.method), &request.endpoint, token)
            .header(IDEMPOTENCY_HEADER, request.id.as_str());
        if let Some(data) = &request.data {
            builder = builder.json(data);
        }
        Self::check(builder.send().await?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_normalizes_base_url() {
        let api = HttpTransferApi::new("https://api.example.com/api/").unwrap();
        assert_eq!(api.base_url(), "https://api.example.com/api");
        assert_eq!(api.url("/transfers"), "https://api.example.com/api/transfers");
        assert!(HttpTransferApi::new("api.example.com").is_err());
    }

    #[test]
    fn transfer_body_accepts_wrapped_and_bare() {
        let transfer = Transfer::new("P1", "alice", "bob");
        let bare = serde_json::to_string(&transfer).unwrap();
        let wrapped = format!(r#"{{"transfer":{bare}}}"#);

        let from_bare: Transfer = serde_json::from_str::<TransferBody>(&bare).unwrap().into();
        let from_wrapped: Transfer = serde_json::from_str::<TransferBody>(&wrapped)
            .unwrap()
            .into();
        assert_eq!(from_bare, transfer);
        assert_eq!(from_wrapped, transfer);

        let list: Vec<Transfer> =
            serde_json::from_str::<TransferListBody>(&format!(r#"{{"transfers":[{bare}]}}"#))
                .unwrap()
                .into();
        assert_eq!(list.len(), 1);
    }

    #[tokio::test]
    async fn reachability_counts_any_http_answer() {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buffer = [0u8; 1024];
            let _ = stream.read(&mut buffer).unwrap();
            stream
                .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .unwrap();
        });

        let api = HttpTransferApi::new(&format!("http://{address}")).unwrap();
        assert!(api.is_reachable(Duration::from_secs(5)).await);
        server.join().unwrap();
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        // A proxy would answer on the port's behalf.
        if ["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"]
            .iter()
            .any(|name| std::env::var_os(name).is_some())
        {
            return;
        }
        let address = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();

        let api = HttpTransferApi::new(&format!("http://{address}")).unwrap();
        assert!(!api.is_reachable(Duration::from_secs(5)).await);
    }
}
