/// Live REST brokerage client. Session derivation uses a time-based
/// one-time-password (RFC 6238) against a base32 TOTP secret, matching the
/// broker's login flow.
use async_trait::async_trait;
use chrono::{Datelike, DateTime, TimeZone, Utc};
use chrono_tz::Asia::Kolkata;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::broker::tokens::{TokenManager, Tokens};
use crate::broker::{BrokerClient, Holding, Margins, Order, Position, Profile};
use crate::error::{EngineError, Result};
use crate::types::Side;

const BASE_URL: &str = "https://api.broker.example";

type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Serialize)]
struct LoginRequest {
    #[serde(rename = "clientcode")]
    client_code: String,
    password: String,
    totp: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    status: bool,
    message: String,
    data: Option<LoginData>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    #[serde(rename = "jwtToken")]
    jwt_token: String,
    #[serde(rename = "refreshToken")]
    refresh_token: String,
    #[serde(rename = "feedToken")]
    feed_token: String,
}

#[derive(Debug, Serialize)]
struct OrderRequest {
    variety: String,
    #[serde(rename = "tradingsymbol")]
    trading_symbol: String,
    #[serde(rename = "symboltoken")]
    symbol_token: String,
    exchange: String,
    #[serde(rename = "transactiontype")]
    transaction_type: String,
    #[serde(rename = "ordertype")]
    order_type: String,
    #[serde(rename = "producttype")]
    product_type: String,
    duration: String,
    quantity: String,
    tag: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    status: bool,
    message: String,
    data: Option<OrderResponseData>,
}

#[derive(Debug, Deserialize)]
struct OrderResponseData {
    #[serde(rename = "orderid")]
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ProfileData {
    #[serde(rename = "clientcode")]
    user_id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct MarginsData {
    #[serde(rename = "availablecash")]
    available_cash: String,
    net: String,
}

pub struct LiveBrokerClient {
    client: Client,
    token_manager: Arc<TokenManager>,
    client_code: String,
    password: String,
    totp_secret: String,
}

impl LiveBrokerClient {
    pub fn new(
        token_manager: Arc<TokenManager>,
        client_code: String,
        password: String,
        totp_secret: String,
    ) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        LiveBrokerClient {
            client,
            token_manager,
            client_code,
            password,
            totp_secret,
        }
    }

    pub async fn login(&self) -> Result<Tokens> {
        info!("deriving broker session via TOTP login");

        let totp = self.generate_totp()?;
        let login_req = LoginRequest {
            client_code: self.client_code.clone(),
            password: self.password.clone(),
            totp,
        };

        let response = self
            .client
            .post(format!("{}/rest/auth/user/v1/loginByPassword", BASE_URL))
            .header("Content-Type", "application/json")
            .json(&login_req)
            .send()
            .await?;

        let body = response.text().await?;
        debug!(body = %body, "login response");

        let login_response: LoginResponse = serde_json::from_str(&body)?;
        if !login_response.status {
            return Err(EngineError::BrokerSessionUnavailable(login_response.message));
        }

        let data = login_response
            .data
            .ok_or_else(|| EngineError::BrokerSessionUnavailable("no data in login response".to_string()))?;

        let expiry = self.next_session_expiry(Utc::now());
        let tokens = Tokens {
            jwt_token: data.jwt_token,
            feed_token: data.feed_token,
            jwt_expiry: expiry,
            feed_expiry: expiry,
            refresh_token: Some(data.refresh_token),
        };

        self.token_manager.set_tokens(tokens.clone()).await?;
        info!(expiry = %expiry, "broker session derived");
        Ok(tokens)
    }

    /// Sessions expire at 3:30 AM IST the following day.
    fn next_session_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let now_ist = now.with_timezone(&Kolkata);
        let today_330 = Kolkata
            .with_ymd_and_hms(now_ist.year(), now_ist.month(), now_ist.day(), 3, 30, 0)
            .unwrap();
        let expiry_ist = if now_ist < today_330 {
            today_330
        } else {
            today_330 + chrono::Duration::days(1)
        };
        expiry_ist.with_timezone(&Utc)
    }

    fn generate_totp(&self) -> Result<String> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs();
        totp_at(&self.totp_secret, timestamp)
    }

    async fn jwt(&self) -> Result<String> {
        let tokens = self
            .token_manager
            .get_tokens()
            .await
            .ok_or_else(|| EngineError::BrokerSessionUnavailable("no session tokens".to_string()))?;
        Ok(tokens.jwt_token)
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let jwt = self.jwt().await?;
        let response = self
            .client
            .get(format!("{}{}", BASE_URL, path))
            .header("Authorization", format!("Bearer {}", jwt))
            .header("X-PrivateKey", &self.client_code)
            .send()
            .await?;
        let body = response.text().await?;
        let envelope: Envelope<T> = serde_json::from_str(&body)?;
        if !envelope.status {
            return Err(EngineError::BrokerApiError {
                code: "BROKER".to_string(),
                message: envelope.message,
            });
        }
        envelope
            .data
            .ok_or_else(|| EngineError::BrokerApiError { code: "BROKER".to_string(), message: "empty response".to_string() })
    }
}

#[async_trait]
impl BrokerClient for LiveBrokerClient {
    async fn ensure_session(&self) -> Result<()> {
        if self.token_manager.is_valid().await {
            return Ok(());
        }
        self.login().await?;
        Ok(())
    }

    async fn profile(&self) -> Result<Profile> {
        let data: ProfileData = self.get("/rest/secure/user/v1/getProfile").await?;
        Ok(Profile {
            user_id: data.user_id,
            user_name: data.name,
        })
    }

    async fn margins(&self) -> Result<Margins> {
        let data: MarginsData = self.get("/rest/secure/user/v1/getRMS").await?;
        Ok(Margins {
            available_cash: data.available_cash.parse().unwrap_or(0.0),
            net: data.net.parse().unwrap_or(0.0),
        })
    }

    async fn orders(&self) -> Result<Vec<Order>> {
        #[derive(Deserialize)]
        struct RawOrder {
            #[serde(rename = "orderid")]
            order_id: String,
            tradingsymbol: String,
            status: String,
        }
        let raw: Vec<RawOrder> = self.get("/rest/secure/order/v1/getOrderBook").await.unwrap_or_default();
        Ok(raw
            .into_iter()
            .map(|r| Order {
                order_id: r.order_id,
                tradingsymbol: r.tradingsymbol,
                status: r.status,
            })
            .collect())
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        #[derive(Deserialize)]
        struct RawPosition {
            #[serde(rename = "symboltoken")]
            symbol_token: String,
            tradingsymbol: String,
            #[serde(rename = "netqty")]
            net_qty: String,
            #[serde(rename = "avgnetprice")]
            avg_net_price: String,
        }
        #[derive(Deserialize)]
        struct Net {
            net: Vec<RawPosition>,
        }
        let net: Net = self.get("/rest/secure/order/v1/getPosition").await.unwrap_or(Net { net: vec![] });
        Ok(net
            .net
            .into_iter()
            .map(|r| Position {
                instrument_token: r.symbol_token.parse().unwrap_or(0),
                tradingsymbol: r.tradingsymbol,
                quantity: r.net_qty.parse().unwrap_or(0),
                average_price: r.avg_net_price.parse().unwrap_or(0.0),
            })
            .collect())
    }

    async fn holdings(&self) -> Result<Vec<Holding>> {
        #[derive(Deserialize)]
        struct RawHolding {
            tradingsymbol: String,
            quantity: String,
            #[serde(rename = "averageprice")]
            average_price: String,
        }
        let raw: Vec<RawHolding> = self.get("/rest/secure/portfolio/v1/getHolding").await.unwrap_or_default();
        Ok(raw
            .into_iter()
            .map(|r| Holding {
                tradingsymbol: r.tradingsymbol,
                quantity: r.quantity.parse().unwrap_or(0),
                average_price: r.average_price.parse().unwrap_or(0.0),
            })
            .collect())
    }

    #[allow(clippy::too_many_arguments)]
    async fn place_order(
        &self,
        variety: &str,
        exchange: &str,
        tradingsymbol: &str,
        instrument_token: i64,
        transaction_type: Side,
        quantity: i64,
        product: &str,
        order_type: &str,
        validity: &str,
        tag: &str,
    ) -> Result<String> {
        let jwt = self.jwt().await?;
        let order_req = OrderRequest {
            variety: variety.to_string(),
            trading_symbol: tradingsymbol.to_string(),
            symbol_token: instrument_token.to_string(),
            exchange: exchange.to_string(),
            transaction_type: transaction_type.as_str().to_string(),
            order_type: order_type.to_string(),
            product_type: product.to_string(),
            duration: validity.to_string(),
            quantity: quantity.to_string(),
            tag: tag.to_string(),
        };

        debug!(?order_req, "placing order");

        let response = self
            .client
            .post(format!("{}/rest/secure/order/v1/placeOrder", BASE_URL))
            .header("Authorization", format!("Bearer {}", jwt))
            .header("X-PrivateKey", &self.client_code)
            .json(&order_req)
            .send()
            .await?;

        let body = response.text().await?;
        let order_response: OrderResponse = serde_json::from_str(&body)?;

        if !order_response.status {
            return Err(EngineError::OrderSubmissionFailed(order_response.message));
        }

        let order_id = order_response
            .data
            .ok_or_else(|| EngineError::OrderSubmissionFailed("no order id in response".to_string()))?
            .order_id;

        info!(order_id = %order_id, "order placed");
        Ok(order_id)
    }
}

/// RFC 6238 TOTP over a base32-encoded secret, 30-second step, 6 digits.
/// Free function (rather than a method taking `&self`) so it can be tested
/// against a fixed timestamp instead of `SystemTime::now()`.
fn totp_at(base32_secret: &str, unix_seconds: u64) -> Result<String> {
    let secret = base32::decode(base32::Alphabet::RFC4648 { padding: false }, base32_secret)
        .ok_or_else(|| EngineError::BrokerSessionUnavailable("invalid TOTP secret".to_string()))?;

    let time_step = unix_seconds / 30;

    let mut mac = HmacSha1::new_from_slice(&secret)
        .map_err(|e| EngineError::BrokerSessionUnavailable(format!("HMAC error: {}", e)))?;
    mac.update(&time_step.to_be_bytes());
    let hash = mac.finalize().into_bytes();

    let offset = (hash[hash.len() - 1] & 0x0f) as usize;
    let code = u32::from_be_bytes([
        hash[offset] & 0x7f,
        hash[offset + 1],
        hash[offset + 2],
        hash[offset + 3],
    ]);

    Ok(format!("{:06}", code % 1_000_000))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "JBSWY3DPEHPK3PXP";

    #[test]
    fn totp_is_six_digits() {
        let code = totp_at(SECRET, 1_700_000_000).unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn totp_is_deterministic_within_the_same_time_step() {
        let a = totp_at(SECRET, 1_700_000_000).unwrap();
        let b = totp_at(SECRET, 1_700_000_001).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn totp_changes_across_a_time_step_boundary() {
        let a = totp_at(SECRET, 1_700_000_000).unwrap();
        let b = totp_at(SECRET, 1_700_000_030).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn invalid_base32_secret_is_rejected() {
        assert!(totp_at("not valid base32!!", 1_700_000_000).is_err());
    }
}
