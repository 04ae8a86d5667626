use std::sync::Arc;

use opsprobe_core::CallContext;
use opsprobe_core::RpcCode;
use opsprobe_exec::AccessTokenSource;
use reqwest::Client;
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use url::Url;

use crate::error::AuthSnafu;
use crate::error::DecodeSnafu;
use crate::error::QueryError;
use crate::error::Result;
use crate::error::TransportSnafu;
use crate::error::UrlSnafu;

/// Authenticated JSON client for one Google API endpoint.
#[derive(Clone)]
pub(crate) struct RestClient {
    http: Client,
    tokens: Arc<dyn AccessTokenSource>,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl RestClient {
    pub(crate) fn new(tokens: Arc<dyn AccessTokenSource>, base_url: &str) -> Result<Self> {
        Ok(Self {
            http: Client::new(),
            tokens,
            base_url: Url::parse(base_url).context(UrlSnafu)?,
        })
    }

    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context(UrlSnafu)
    }

    pub(crate) fn get(&self, url: Url) -> RequestBuilder {
        self.http.get(url)
    }

    pub(crate) fn post(&self, url: Url) -> RequestBuilder {
        self.http.post(url)
    }

    pub(crate) async fn send_json<T: DeserializeOwned>(&self, ctx: &CallContext, request: RequestBuilder) -> Result<T> {
        let token = self.tokens.access_token(ctx).await.context(AuthSnafu)?;
        let response = ctx
            .run(request.bearer_auth(token).send())
            .await
            .map_err(|reason| QueryError::Interrupted { reason })?
            .context(TransportSnafu)?;

        let status = response.status();
        if !status.is_success() {
            let body = ctx.run(response.text()).await.ok().and_then(|r| r.ok()).unwrap_or_default();
            return Err(api_error(status.as_u16(), &body));
        }
        ctx.run(response.json::<T>())
            .await
            .map_err(|reason| QueryError::Interrupted { reason })?
            .context(DecodeSnafu)
    }
}

/// Decode a Google JSON error body, falling back to the HTTP status.
pub(crate) fn api_error(status: u16, body: &str) -> QueryError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => QueryError::Api {
            code: RpcCode::from_status(&parsed.error.status).unwrap_or_else(|| RpcCode::from_http(status)),
            status,
            message: parsed.error.message,
        },
        Err(_) => QueryError::Api {
            code: RpcCode::from_http(status),
            status,
            message: body.trim().to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_prefers_status_field() {
        let err = api_error(
            400,
            r#"{"error":{"code":400,"message":"Cannot find metric(s) that match type","status":"NOT_FOUND"}}"#,
        );
        assert_eq!(err.code(), Some(RpcCode::NotFound));
        assert!(err.to_string().contains("Cannot find metric(s)"));
    }

    #[test]
    fn test_api_error_falls_back_to_http_status() {
        let err = api_error(500, "upstream connect error");
        assert_eq!(err.code(), Some(RpcCode::Internal));
        assert!(err.to_string().contains("upstream connect error"));
    }
}
