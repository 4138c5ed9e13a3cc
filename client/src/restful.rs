use std::str::FromStr;

use pool_shared::{errors::IdentityError, identity::{basic_auth, Identity}, types::MinerKey};
use reqwest::{header::AUTHORIZATION, Method, Url};
use thiserror::Error;
use tracing::*;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("fail to send request: {0}")]
    Request(#[from] reqwest::Error),
    #[error("status code: {status}, response: {body}")]
    Status { status: u16, body: String },
    #[error("fail to parse response of {endpoint}: {body:?}")]
    Parse { endpoint: &'static str, body: String },
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// The pool's plain text HTTP endpoints.
#[derive(Debug, Clone)]
pub struct PoolApi {
    url: Url,
    client: reqwest::Client,
}

impl PoolApi {
    pub fn new(url: Url) -> Self {
        Self { url, client: reqwest::Client::new() }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// pool clock, in unix seconds
    pub async fn timestamp(&self) -> Result<u64, ApiError> {
        self.fetch("/timestamp", &[]).await
    }

    pub async fn balance(&self, miner: &MinerKey) -> Result<f64, ApiError> {
        self.fetch("/miner/balance", &[("pubkey", miner.to_string())]).await
    }

    pub async fn rewards(&self, miner: &MinerKey) -> Result<f64, ApiError> {
        self.fetch("/miner/rewards", &[("pubkey", miner.to_string())]).await
    }

    pub async fn active_miners(&self) -> Result<u64, ApiError> {
        self.fetch("/active-miners", &[]).await
    }

    pub async fn pool_authority_pubkey(&self) -> Result<String, ApiError> {
        self.request(Method::GET, "/pool/authority/pubkey", &[], None).await
    }

    pub async fn latest_blockhash(&self) -> Result<String, ApiError> {
        self.request(Method::GET, "/latest-blockhash", &[], None).await
    }

    pub async fn signup(&self, miner: &MinerKey) -> Result<String, ApiError> {
        self.request(Method::POST, "/v2/signup", &[("miner", miner.to_string())], None).await
    }

    /// Ask the pool to pay `amount` base units of earned rewards to `receiver`.
    pub async fn claim(
        &self,
        identity: &dyn Identity,
        receiver: &MinerKey,
        amount: u64,
    ) -> Result<String, ApiError> {
        let timestamp = self.timestamp().await?;
        let auth = basic_auth(identity, timestamp)?;
        let query = [
            ("timestamp", timestamp.to_string()),
            ("receiver_pubkey", receiver.to_string()),
            ("amount", amount.to_string()),
        ];
        self.request(Method::POST, "/v2/claim", &query, Some(auth)).await
    }

    async fn fetch<T: FromStr>(
        &self,
        endpoint: &'static str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let body = self.request(Method::GET, endpoint, query, None).await?;
        body.parse::<T>().map_err(|_| ApiError::Parse { endpoint, body })
    }

    /// base request
    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, String)],
        auth: Option<String>,
    ) -> Result<String, ApiError> {
        let mut url = self.url.join(endpoint)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }

        trace!("{method} {url}");

        let mut request = self.client.request(method, url);
        if let Some(auth) = auth {
            request = request.header(AUTHORIZATION, auth);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ApiError::Status { status: status.as_u16(), body: text });
        }

        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use solana_sdk::signature::Keypair;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
        sync::Mutex,
    };

    use super::*;

    /// Serve canned responses, one per connection, and record request heads.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (Url, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(vec![]));
        let log = seen.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap();
                log.lock().await.push(String::from_utf8_lossy(&buf[..n]).to_string());

                let reply = format!(
                    "HTTP/1.1 {status} X\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });

        (Url::parse(&format!("http://{addr}")).unwrap(), seen)
    }

    #[tokio::test]
    async fn parses_numeric_bodies() {
        let (url, seen) = serve(vec![(200, "1718000000\n"), (200, "12.5"), (200, "42")]).await;
        let api = PoolApi::new(url);
        let miner = MinerKey("Miner1111".to_string());

        assert_eq!(api.timestamp().await.unwrap(), 1_718_000_000);
        assert_eq!(api.balance(&miner).await.unwrap(), 12.5);
        assert_eq!(api.active_miners().await.unwrap(), 42);

        let seen = seen.lock().await;
        assert!(seen[0].starts_with("GET /timestamp "));
        assert!(seen[1].starts_with("GET /miner/balance?pubkey=Miner1111 "));
        assert!(seen[2].starts_with("GET /active-miners "));
    }

    #[tokio::test]
    async fn non_success_carries_status() {
        let (url, _) = serve(vec![(503, "busy")]).await;
        let api = PoolApi::new(url);

        match api.latest_blockhash().await {
            Err(ApiError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "busy");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbage_number_is_a_parse_error() {
        let (url, _) = serve(vec![(200, "soon")]).await;
        let api = PoolApi::new(url);

        assert!(matches!(
            api.timestamp().await,
            Err(ApiError::Parse { endpoint: "/timestamp", .. })
        ));
    }

    #[tokio::test]
    async fn claim_signs_timestamp() {
        let (url, seen) = serve(vec![(200, "1718000000"), (200, "SUCCESS")]).await;
        let api = PoolApi::new(url);
        let keypair = Keypair::new();
        let receiver = MinerKey("Receiver1111".to_string());

        assert_eq!(api.claim(&keypair, &receiver, 5_000).await.unwrap(), "SUCCESS");

        let seen = seen.lock().await;
        let head = seen[1].to_lowercase();
        assert!(head.starts_with(
            "post /v2/claim?timestamp=1718000000&receiver_pubkey=receiver1111&amount=5000 "
        ));
        assert!(head.contains("authorization: basic "));
    }
}
