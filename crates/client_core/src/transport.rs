use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    error::ApiError,
    protocol::{ConnectRequest, ConnectResponse, PairingCodeResponse, PartnerStatusResponse},
};
use tracing::debug;
use url::Url;

use crate::{error::BackendError, PairingBackend, TokenStore};

const STATUS_PATH: &str = "couples/status";
const PAIRING_CODE_PATH: &str = "couples/pairing-code";
const CONNECT_PATH: &str = "couples/connect";
const UNMATCH_PATH: &str = "couples/unmatch";

struct Endpoints {
    status: Url,
    pairing_code: Url,
    connect: Url,
    unmatch: Url,
}

impl Endpoints {
    fn resolve(base_url: &Url) -> Result<Self, url::ParseError> {
        Ok(Self {
            status: base_url.join(STATUS_PATH)?,
            pairing_code: base_url.join(PAIRING_CODE_PATH)?,
            connect: base_url.join(CONNECT_PATH)?,
            unmatch: base_url.join(UNMATCH_PATH)?,
        })
    }
}

/// [`PairingBackend`] over the couples REST API, authenticated with the
/// bearer token from the injected [`TokenStore`].
pub struct HttpPairingBackend {
    http: Client,
    endpoints: Endpoints,
    tokens: Arc<dyn TokenStore>,
}

impl HttpPairingBackend {
    pub fn new(
        base_url: &Url,
        request_timeout: Duration,
        tokens: Arc<dyn TokenStore>,
    ) -> Result<Self, BackendError> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(BackendError::Transport)?;
        let endpoints = Endpoints::resolve(base_url)?;
        Ok(Self {
            http,
            endpoints,
            tokens,
        })
    }

    async fn authorized(&self, method: Method, url: &Url) -> Result<RequestBuilder, BackendError> {
        let token = self
            .tokens
            .token()
            .await
            .ok_or(BackendError::Unauthenticated)?;
        debug!(%method, %url, "pairing API request");
        Ok(self.http.request(method, url.clone()).bearer_auth(token))
    }
}

async fn checked(res: Response) -> Result<Response, BackendError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let error = res.json::<ApiError>().await.ok();
    Err(BackendError::Status {
        status: status.as_u16(),
        error,
    })
}

async fn decode<T: DeserializeOwned>(res: Response) -> Result<T, BackendError> {
    let body = res.bytes().await?;
    serde_json::from_slice(&body).map_err(|err| BackendError::Decode(err.to_string()))
}

#[async_trait]
impl PairingBackend for HttpPairingBackend {
    async fn partner_status(&self) -> Result<PartnerStatusResponse, BackendError> {
        let res = self
            .authorized(Method::GET, &self.endpoints.status)
            .await?
            .send()
            .await?;
        decode(checked(res).await?).await
    }

    async fn generate_pairing_code(&self) -> Result<PairingCodeResponse, BackendError> {
        let res = self
            .authorized(Method::POST, &self.endpoints.pairing_code)
            .await?
            .send()
            .await?;
        decode(checked(res).await?).await
    }

    async fn connect_with_code(&self, code: &str) -> Result<ConnectResponse, BackendError> {
        let res = self
            .authorized(Method::POST, &self.endpoints.connect)
            .await?
            .json(&ConnectRequest {
                code: code.to_string(),
            })
            .send()
            .await?;
        decode(checked(res).await?).await
    }

    async fn unmatch(&self) -> Result<(), BackendError> {
        let res = self
            .authorized(Method::POST, &self.endpoints.unmatch)
            .await?
            .send()
            .await?;
        checked(res).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
