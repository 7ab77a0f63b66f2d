use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::Value;

use super::{ApiError, DeliveryApi, FilterMode, NewDelivery};
use crate::config::ParcelConfig;

/// Production endpoint of the Parcel external API.
pub const DEFAULT_BASE_URL: &str = "https://api.parcel.app/external";

/// Header carrying the account API key.
pub const API_KEY_HEADER: &str = "api-key";

/// Response envelope shared by every Parcel API endpoint.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    deliveries: Option<Value>,
}

impl Envelope {
    fn check(&self) -> Result<(), ApiError> {
        match self.success {
            Some(true) => Ok(()),
            Some(false) => Err(ApiError::from_envelope_message(self.error_message.clone())),
            None => Err(ApiError::MalformedResponse(
                "response has no `success` field".to_string(),
            )),
        }
    }

    fn into_deliveries(self) -> Result<Vec<Value>, ApiError> {
        self.check()?;
        match self.deliveries {
            Some(Value::Array(entries)) => Ok(entries),
            Some(other) => Err(ApiError::MalformedResponse(format!(
                "`deliveries` is not an array (got {})",
                json_type_name(&other)
            ))),
            None => Err(ApiError::MalformedResponse(
                "response has no `deliveries` field".to_string(),
            )),
        }
    }
}

/// [`DeliveryApi`] backed by the Parcel HTTP API.
#[derive(Clone)]
pub struct ParcelAppClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl std::fmt::Debug for ParcelAppClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParcelAppClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ParcelAppClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout,
        }
    }

    pub fn from_config(http: reqwest::Client, config: &ParcelConfig) -> Self {
        Self::new(
            http,
            config.base_url.as_str(),
            config.api_key.as_str(),
            config.request_timeout(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn build_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header(API_KEY_HEADER, &self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
    }

    /// Map non-2xx statuses to an error, otherwise decode the envelope.
    async fn read_envelope(response: reqwest::Response) -> Result<Envelope, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("(empty body)"));
            return Err(ApiError::from_status(status, &body));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ApiError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl DeliveryApi for ParcelAppClient {
    async fn fetch_deliveries(&self, filter_mode: FilterMode) -> Result<Vec<Value>, ApiError> {
        let url = self.endpoint("deliveries/");
        tracing::debug!(url = %url, filter_mode = %filter_mode, "Fetching deliveries");

        let response = self
            .build_request(self.http.get(&url))
            .query(&[("filter_mode", filter_mode.as_str())])
            .send()
            .await?;

        let deliveries = Self::read_envelope(response).await?.into_deliveries()?;
        tracing::debug!(count = deliveries.len(), "Fetched deliveries");
        Ok(deliveries)
    }

    async fn submit_delivery(&self, delivery: &NewDelivery) -> Result<(), ApiError> {
        let url = self.endpoint("add-delivery/");
        tracing::debug!(
            url = %url,
            tracking_number = %delivery.tracking_number,
            carrier_code = %delivery.carrier_code,
            "Submitting delivery"
        );

        let response = self
            .build_request(self.http.post(&url))
            .json(delivery)
            .send()
            .await?;

        Self::read_envelope(response).await?.check()
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, header, method, path, query_param},
    };

    use super::*;
    use crate::client::{ApiErrorKind, RATE_LIMIT_MESSAGE};

    fn client_for(server: &MockServer) -> ParcelAppClient {
        ParcelAppClient::new(
            reqwest::Client::new(),
            format!("{}/", server.uri()),
            "test-key",
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_fetch_deliveries_sends_key_and_filter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/deliveries/"))
            .and(query_param("filter_mode", "recent"))
            .and(header(API_KEY_HEADER, "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "deliveries": [
                    {"tracking_number": "T1", "carrier_code": "amzlde", "status_code": 2},
                    {"tracking_number": "T2", "carrier_code": "dhl", "status_code": 0}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let deliveries = client_for(&server)
            .fetch_deliveries(FilterMode::Recent)
            .await
            .unwrap();

        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0]["tracking_number"], "T1");
    }

    #[tokio::test]
    async fn test_fetch_deliveries_keeps_malformed_entries_raw() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/deliveries/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "deliveries": [{"carrier_code": "dhl"}, "garbage"]
            })))
            .mount(&server)
            .await;

        let deliveries = client_for(&server)
            .fetch_deliveries(FilterMode::Active)
            .await
            .unwrap();
        assert_eq!(deliveries.len(), 2);
    }

    #[tokio::test]
    async fn test_success_false_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/deliveries/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "error_message": RATE_LIMIT_MESSAGE
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_deliveries(FilterMode::Active)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ApiErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn test_success_false_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/deliveries/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "error_message": "Something else went wrong"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_deliveries(FilterMode::Active)
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::Rejected("Something else went wrong".into()));
    }

    #[tokio::test]
    async fn test_unauthorized_status_is_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/deliveries/"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_deliveries(FilterMode::Active)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ApiErrorKind::Auth);
        assert!(err.message().contains("bad key"));
    }

    #[tokio::test]
    async fn test_server_error_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/deliveries/"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_deliveries(FilterMode::Active)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ApiErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_non_json_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/deliveries/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_deliveries(FilterMode::Active)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ApiErrorKind::MalformedResponse);
    }

    #[tokio::test]
    async fn test_missing_or_wrong_deliveries_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/deliveries/"))
            .and(query_param("filter_mode", "active"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/deliveries/"))
            .and(query_param("filter_mode", "recent"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "deliveries": {"T1": {}}})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.fetch_deliveries(FilterMode::Active).await.unwrap_err();
        assert_eq!(err.kind(), ApiErrorKind::MalformedResponse);

        let err = client.fetch_deliveries(FilterMode::Recent).await.unwrap_err();
        assert_eq!(err.kind(), ApiErrorKind::MalformedResponse);
        assert!(err.message().contains("object"));
    }

    #[tokio::test]
    async fn test_missing_success_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/deliveries/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "deliveries": [{"tracking_number": "T1", "carrier_code": "dhl"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/add-delivery/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.fetch_deliveries(FilterMode::Active).await.unwrap_err();
        assert_eq!(err.kind(), ApiErrorKind::MalformedResponse);
        assert!(err.message().contains("success"));

        let err = client
            .submit_delivery(&NewDelivery::new("T9", "ups", "Lamp"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ApiErrorKind::MalformedResponse);
    }

    #[tokio::test]
    async fn test_timeout_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/deliveries/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "deliveries": []}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client = ParcelAppClient::new(
            reqwest::Client::new(),
            server.uri(),
            "test-key",
            Duration::from_millis(100),
        );
        let err = client.fetch_deliveries(FilterMode::Active).await.unwrap_err();
        assert_eq!(err.kind(), ApiErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_submit_delivery_posts_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/add-delivery/"))
            .and(header(API_KEY_HEADER, "test-key"))
            .and(body_json(json!({
                "tracking_number": "T9",
                "carrier_code": "ups",
                "description": "Lamp",
                "language": "en",
                "send_push_confirmation": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .submit_delivery(&NewDelivery::new("T9", "ups", "Lamp"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_submit_delivery_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/add-delivery/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "error_message": "Unsupported carrier"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .submit_delivery(&NewDelivery::new("T9", "nope", "Lamp"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ApiErrorKind::Rejected);
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let client = ParcelAppClient::new(
            reqwest::Client::new(),
            DEFAULT_BASE_URL,
            "super-secret",
            Duration::from_secs(1),
        );
        let debug = format!("{client:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
