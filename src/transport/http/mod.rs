use std::future::Future;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::error::{ConfigError, ProviderError};
use crate::core::types::{AdapterContext, ProviderId};
use crate::normalize::ErrorNormalizer;

const CUSTOM_HEADER_PREFIX: &str = "transport.header.";
const REQUEST_ID_HEADER_KEY: &str = "transport.request_id_header";
const DEFAULT_REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub retryable_status_codes: Vec<u16>,
}

impl RetryPolicy {
    /// Policy for calls the core must never repeat on its own.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            retryable_status_codes: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidRetryPolicy {
                reason: "max_attempts must be >= 1".to_string(),
            });
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::InvalidRetryPolicy {
                reason: "max_backoff_ms must be >= initial_backoff_ms".to_string(),
            });
        }
        if let Some(status) = self
            .retryable_status_codes
            .iter()
            .copied()
            .find(|status| !(100..=599).contains(status))
        {
            return Err(ConfigError::InvalidRetryPolicy {
                reason: format!("retryable status code must be in 100..=599: {status}"),
            });
        }
        Ok(())
    }

    fn should_retry_status(&self, status_code: u16) -> bool {
        self.retryable_status_codes.contains(&status_code)
    }

    fn backoff_duration_for_retry(&self, retry_index: u32) -> Duration {
        let shift = retry_index.min(63);
        let multiplier = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
        let backoff_ms = self
            .initial_backoff_ms
            .saturating_mul(multiplier)
            .min(self.max_backoff_ms);
        Duration::from_millis(backoff_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
            retryable_status_codes: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    retry_policy: RetryPolicy,
    timeout_ms: u64,
    normalizer: ErrorNormalizer,
}

impl HttpTransport {
    pub fn new(timeout_ms: u64, retry_policy: RetryPolicy) -> Result<Self, ConfigError> {
        Self::with_client(reqwest::Client::new(), timeout_ms, retry_policy)
    }

    pub fn with_client(
        client: reqwest::Client,
        timeout_ms: u64,
        retry_policy: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        Self::validate_timeout(timeout_ms)?;
        retry_policy.validate()?;

        Ok(Self {
            client,
            retry_policy,
            timeout_ms,
            normalizer: ErrorNormalizer::new(),
        })
    }

    pub fn with_error_normalizer(mut self, normalizer: ErrorNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// GET returning decoded JSON. Non-success statuses become
    /// `ProviderError::Upstream` after the retry policy is exhausted.
    pub async fn get_json<TResp>(
        &self,
        provider: ProviderId,
        model: Option<&str>,
        url: &str,
        headers: HeaderMap,
        ctx: &AdapterContext,
    ) -> Result<TResp, ProviderError>
    where
        TResp: DeserializeOwned,
    {
        let header_config = self.build_header_config(&provider, model, headers, ctx)?;
        let model_owned = model.map(str::to_string);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let request = self
                .client
                .request(Method::GET, url)
                .timeout(Duration::from_millis(self.timeout_ms))
                .headers(header_config.headers.clone())
                .send();

            match cancellable(&provider, ctx, request).await? {
                Ok(response) => {
                    let status_code = response.status().as_u16();
                    let request_id =
                        extract_request_id(response.headers(), &header_config.request_id_header);

                    if !response.status().is_success() {
                        let status_error = self
                            .build_status_error(
                                &provider,
                                model_owned.as_deref(),
                                request_id,
                                response,
                                ctx,
                            )
                            .await?;

                        if attempt < self.retry_policy.max_attempts
                            && self.retry_policy.should_retry_status(status_code)
                        {
                            tracing::debug!(
                                provider = %provider,
                                status_code,
                                attempt,
                                "retrying upstream request"
                            );
                            self.sleep_before_retry(&provider, attempt, ctx).await?;
                            continue;
                        }

                        return Err(status_error);
                    }

                    let body = cancellable(&provider, ctx, response.bytes())
                        .await?
                        .map_err(|error| ProviderError::Transport {
                            provider: provider.clone(),
                            request_id: request_id.clone(),
                            message: error.to_string(),
                        })?;

                    return serde_json::from_slice::<TResp>(&body).map_err(|error| {
                        ProviderError::Decode {
                            provider: provider.clone(),
                            model: model_owned.clone(),
                            request_id,
                            message: error.to_string(),
                        }
                    });
                }
                Err(error) => {
                    if attempt < self.retry_policy.max_attempts && is_retryable_transport(&error) {
                        self.sleep_before_retry(&provider, attempt, ctx).await?;
                        continue;
                    }

                    return Err(ProviderError::Transport {
                        provider: provider.clone(),
                        request_id: None,
                        message: error.to_string(),
                    });
                }
            }
        }
    }

    /// POSTs a JSON body once and hands back the raw response, whatever its
    /// status. The caller owns status handling and body consumption.
    pub async fn send_json<TReq>(
        &self,
        provider: ProviderId,
        model: Option<&str>,
        url: &str,
        headers: HeaderMap,
        body: &TReq,
        ctx: &AdapterContext,
    ) -> Result<Response, ProviderError>
    where
        TReq: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(body).map_err(|error| ProviderError::Serialization {
            provider: provider.clone(),
            model: model.map(str::to_string),
            message: error.to_string(),
        })?;
        let header_config = self.build_header_config(&provider, model, headers, ctx)?;

        let request = self
            .client
            .request(Method::POST, url)
            .timeout(Duration::from_millis(self.timeout_ms))
            .headers(header_config.headers)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(payload)
            .send();

        cancellable(&provider, ctx, request)
            .await?
            .map_err(|error| ProviderError::Transport {
                provider: provider.clone(),
                request_id: None,
                message: error.to_string(),
            })
    }

    pub fn error_normalizer(&self) -> &ErrorNormalizer {
        &self.normalizer
    }

    async fn build_status_error(
        &self,
        provider: &ProviderId,
        model: Option<&str>,
        request_id: Option<String>,
        response: Response,
        ctx: &AdapterContext,
    ) -> Result<ProviderError, ProviderError> {
        let status_code = response.status().as_u16();
        let body = cancellable(provider, ctx, response.bytes())
            .await?
            .map(|bytes| bytes.to_vec())
            .unwrap_or_default();

        tracing::warn!(provider = %provider, status_code, "upstream returned error status");

        Ok(ProviderError::Upstream {
            provider: provider.clone(),
            model: model.map(str::to_string),
            request_id,
            error: self.normalizer.normalize(status_code, &body),
        })
    }

    fn build_header_config(
        &self,
        provider: &ProviderId,
        model: Option<&str>,
        mut headers: HeaderMap,
        ctx: &AdapterContext,
    ) -> Result<HeaderConfig, ProviderError> {
        let request_id_header = match ctx.metadata.get(REQUEST_ID_HEADER_KEY) {
            Some(value) => parse_header_name(value, provider, model)?,
            None => HeaderName::from_static(DEFAULT_REQUEST_ID_HEADER),
        };

        for (key, value) in &ctx.metadata {
            if let Some(raw_name) = key.strip_prefix(CUSTOM_HEADER_PREFIX) {
                let header_name = parse_header_name(raw_name, provider, model)?;
                let header_value =
                    HeaderValue::from_str(value).map_err(|error| ProviderError::Protocol {
                        provider: provider.clone(),
                        model: model.map(str::to_string),
                        request_id: None,
                        message: format!("invalid header value for {raw_name}: {error}"),
                    })?;
                headers.insert(header_name, header_value);
            }
        }

        Ok(HeaderConfig {
            headers,
            request_id_header,
        })
    }

    fn validate_timeout(timeout_ms: u64) -> Result<(), ConfigError> {
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout { timeout_ms });
        }
        Ok(())
    }

    async fn sleep_before_retry(
        &self,
        provider: &ProviderId,
        attempt: u32,
        ctx: &AdapterContext,
    ) -> Result<(), ProviderError> {
        let retry_index = attempt.saturating_sub(1);
        let backoff = self.retry_policy.backoff_duration_for_retry(retry_index);
        cancellable(provider, ctx, tokio::time::sleep(backoff)).await
    }
}

/// Races `future` against the context's cancellation token.
pub(crate) async fn cancellable<F>(
    provider: &ProviderId,
    ctx: &AdapterContext,
    future: F,
) -> Result<F::Output, ProviderError>
where
    F: Future,
{
    tokio::select! {
        biased;
        () = ctx.cancellation.cancelled() => Err(ProviderError::Cancelled {
            provider: provider.clone(),
        }),
        output = future => Ok(output),
    }
}

struct HeaderConfig {
    headers: HeaderMap,
    request_id_header: HeaderName,
}

pub(crate) fn header_value(
    value: &str,
    provider: &ProviderId,
    model: Option<&str>,
) -> Result<HeaderValue, ProviderError> {
    HeaderValue::from_str(value).map_err(|error| ProviderError::Protocol {
        provider: provider.clone(),
        model: model.map(str::to_string),
        request_id: None,
        message: format!("invalid header value: {error}"),
    })
}

fn parse_header_name(
    value: &str,
    provider: &ProviderId,
    model: Option<&str>,
) -> Result<HeaderName, ProviderError> {
    HeaderName::from_bytes(value.as_bytes()).map_err(|error| ProviderError::Protocol {
        provider: provider.clone(),
        model: model.map(str::to_string),
        request_id: None,
        message: format!("invalid header name: {value}: {error}"),
    })
}

pub(crate) fn extract_request_id(
    headers: &HeaderMap,
    request_id_header: &HeaderName,
) -> Option<String> {
    headers
        .get(request_id_header)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn is_retryable_transport(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}
