use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use crate::config::GatewayConfig;

use super::{GatewayError, GatewayOrder, GatewayPayment, PaymentGateway, PaymentIntent, Refund};

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    description: Option<String>,
}

/// REST client for a Razorpay-compatible gateway.
#[derive(Debug)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    currency: String,
    breaker: CircuitBreaker,
}

impl HttpPaymentGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let (Some(key_id), Some(key_secret)) = (&config.key_id, &config.key_secret) else {
            return Err(GatewayError::NotConfigured);
        };
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            key_id: key_id.clone(),
            key_secret: key_secret.clone(),
            currency: config.currency.clone(),
            breaker: CircuitBreaker::new(
                "payment_gateway",
                CircuitBreakerConfig {
                    failure_threshold: config.circuit_breaker_failure_threshold.max(1),
                    timeout: std::time::Duration::from_secs(config.circuit_breaker_reset_secs),
                    success_threshold: 1,
                },
            ),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let request = request.basic_auth(&self.key_id, Some(&self.key_secret));
        self.breaker
            .call(|| async move {
                let response = request.send().await.map_err(|e| {
                    if e.is_timeout() {
                        GatewayError::Timeout
                    } else {
                        GatewayError::Transport(e.to_string())
                    }
                })?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    let description = serde_json::from_str::<ErrorEnvelope>(&body)
                        .ok()
                        .and_then(|envelope| envelope.error.description)
                        .unwrap_or_else(|| {
                            status.canonical_reason().unwrap_or("gateway error").to_string()
                        });
                    warn!(status = status.as_u16(), %description, "payment gateway call failed");
                    return Err(GatewayError::Api {
                        status: status.as_u16(),
                        description,
                    });
                }

                response.json::<T>().await.map_err(|e| {
                    if e.is_timeout() {
                        GatewayError::Timeout
                    } else {
                        GatewayError::Decode(e.to_string())
                    }
                })
            })
            .await
            .map_err(|e| match e {
                CircuitBreakerError::CircuitOpen => GatewayError::CircuitOpen,
                CircuitBreakerError::Inner(inner) => inner,
            })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self))]
    async fn create_intent(
        &self,
        amount: i64,
        receipt: &str,
    ) -> Result<PaymentIntent, GatewayError> {
        let body = json!({
            "amount": amount,
            "currency": self.currency,
            "receipt": receipt,
        });
        let intent: PaymentIntent = self
            .send(self.client.post(self.url("/v1/orders")).json(&body))
            .await?;
        info!(intent_id = %intent.id, amount, "payment intent created");
        Ok(intent)
    }

    #[instrument(skip(self))]
    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, GatewayError> {
        self.send(self.client.get(self.url(&format!("/v1/payments/{payment_id}"))))
            .await
    }

    #[instrument(skip(self))]
    async fn fetch_order(&self, gateway_order_id: &str) -> Result<GatewayOrder, GatewayError> {
        self.send(self.client.get(self.url(&format!("/v1/orders/{gateway_order_id}"))))
            .await
    }

    #[instrument(skip(self, notes))]
    async fn refund(
        &self,
        payment_id: &str,
        amount: i64,
        notes: &HashMap<String, String>,
    ) -> Result<Refund, GatewayError> {
        let body = json!({ "amount": amount, "notes": notes });
        let refund: Refund = self
            .send(
                self.client
                    .post(self.url(&format!("/v1/payments/{payment_id}/refund")))
                    .json(&body),
            )
            .await?;
        info!(refund_id = %refund.id, payment_id, amount, "refund issued");
        Ok(refund)
    }
}
