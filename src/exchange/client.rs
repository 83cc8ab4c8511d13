// =============================================================================
// OKX REST API Client — header-based HMAC-SHA256 request signing
// =============================================================================
//
// SECURITY: the secret key and passphrase are never logged or serialised.
// Every private request carries OK-ACCESS-KEY / OK-ACCESS-SIGN /
// OK-ACCESS-TIMESTAMP / OK-ACCESS-PASSPHRASE headers, unlike Binance's
// query-string HMAC — the prehash string is `timestamp + method + path +
// body` and the signature is base64, not hex.
// =============================================================================

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::{ExchangeClient, OrderRequest, OrderResult, OrderType};
use crate::market_data::Candle;

type HmacSha256 = Hmac<Sha256>;

/// Error returned for any non-zero `code` field in an OKX response envelope.
/// Callers that need to branch on specific codes (leverage-not-set,
/// price-outside-limit) downcast against this type instead of string
/// matching the anyhow chain.
#[derive(Debug, Error)]
#[error("OKX API error {code}: {msg}")]
pub struct OkxApiError {
    pub code: String,
    pub msg: String,
}

impl OkxApiError {
    pub fn is_leverage_not_set(&self) -> bool {
        self.code == "50004" || self.code == "50067"
    }

    pub fn is_reprice_required(&self) -> bool {
        self.code == "51006"
    }

    pub fn is_rate_limited(&self) -> bool {
        self.code == "50011" || self.code == "50061"
    }
}

/// OKX REST API client with header-based request signing.
#[derive(Clone)]
pub struct OkxClient {
    api_key: String,
    secret: String,
    passphrase: String,
    base_url: String,
    client: reqwest::Client,
}

impl OkxClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, passphrase: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!("OkxClient initialised (base_url=https://www.okx.com)");

        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            passphrase: passphrase.into(),
            base_url: "https://www.okx.com".to_string(),
            client,
        }
    }

    fn timestamp_iso() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn sign(&self, prehash: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(prehash.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    fn signed_headers(&self, method: &str, request_path: &str, body: &str) -> Result<HeaderMap> {
        let ts = Self::timestamp_iso();
        let prehash = format!("{ts}{method}{request_path}{body}");
        let sig = self.sign(&prehash);

        let mut headers = HeaderMap::new();
        headers.insert("OK-ACCESS-KEY", HeaderValue::from_str(&self.api_key)?);
        headers.insert("OK-ACCESS-SIGN", HeaderValue::from_str(&sig)?);
        headers.insert("OK-ACCESS-TIMESTAMP", HeaderValue::from_str(&ts)?);
        headers.insert("OK-ACCESS-PASSPHRASE", HeaderValue::from_str(&self.passphrase)?);
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Unwrap OKX's `{code, msg, data}` envelope, turning any non-"0" code
    /// into an `OkxApiError`.
    fn unwrap_envelope(body: serde_json::Value) -> Result<serde_json::Value> {
        let code = body["code"].as_str().unwrap_or("").to_string();
        if code != "0" {
            let msg = body["msg"].as_str().unwrap_or("").to_string();
            return Err(OkxApiError { code, msg }.into());
        }
        Ok(body["data"].clone())
    }

    fn side_str(side: crate::types::Side) -> &'static str {
        match side {
            crate::types::Side::Long => "buy",
            crate::types::Side::Short => "sell",
        }
    }

    fn parse_str_f64(val: &serde_json::Value) -> f64 {
        val.as_str().and_then(|s| s.parse().ok()).or_else(|| val.as_f64()).unwrap_or(0.0)
    }
}

#[async_trait]
impl ExchangeClient for OkxClient {
    #[instrument(skip(self), name = "okx::get_balance")]
    async fn get_balance(&self, ccy: &str) -> Result<f64> {
        let path = format!("/api/v5/account/balance?ccy={ccy}");
        let headers = self.signed_headers("GET", &path, "")?;
        let url = format!("{}{}", self.base_url, path);

        let resp = self.client.get(&url).headers(headers).send().await.context("GET account/balance failed")?;
        let body: serde_json::Value = resp.json().await.context("failed to parse balance response")?;
        let data = Self::unwrap_envelope(body)?;

        let free = data
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|acct| acct["details"].as_array())
            .and_then(|details| details.iter().find(|d| d["ccy"].as_str() == Some(ccy)))
            .map(|d| Self::parse_str_f64(&d["availBal"]))
            .unwrap_or(0.0);

        debug!(ccy, free, "balance retrieved");
        Ok(free)
    }

    #[instrument(skip(self), name = "okx::set_leverage")]
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let body = serde_json::json!({
            "instId": symbol,
            "lever": leverage.to_string(),
            "mgnMode": "cross",
        })
        .to_string();
        let path = "/api/v5/account/set-leverage";
        let headers = self.signed_headers("POST", path, &body)?;
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .client
            .post(&url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .context("POST account/set-leverage failed")?;
        let json: serde_json::Value = resp.json().await.context("failed to parse set-leverage response")?;
        Self::unwrap_envelope(json)?;

        debug!(symbol, leverage, "leverage set");
        Ok(())
    }

    #[instrument(skip(self), name = "okx::place_order")]
    async fn place_order(&self, req: OrderRequest) -> Result<OrderResult> {
        let ord_type = match req.order_type {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
        };

        let mut payload = serde_json::json!({
            "instId": req.symbol,
            "tdMode": "cross",
            "side": Self::side_str(req.side),
            "ordType": ord_type,
            "sz": format!("{}", req.quantity),
        });
        if let Some(price) = req.price {
            payload["px"] = serde_json::json!(format!("{}", price));
        }
        if req.reduce_only {
            payload["reduceOnly"] = serde_json::json!(true);
        }
        if let Some(coid) = &req.client_order_id {
            payload["clOrdId"] = serde_json::json!(coid);
        }

        let body = payload.to_string();
        let path = "/api/v5/trade/order";
        let headers = self.signed_headers("POST", path, &body)?;
        let url = format!("{}{}", self.base_url, path);

        debug!(symbol = %req.symbol, side = %req.side, quantity = req.quantity, "placing order");

        let resp = self
            .client
            .post(&url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .context("POST trade/order failed")?;
        let json: serde_json::Value = resp.json().await.context("failed to parse order response")?;
        let data = Self::unwrap_envelope(json)?;

        let entry = data.as_array().and_then(|a| a.first()).cloned().unwrap_or_default();
        let order_id = entry["ordId"].as_str().unwrap_or_default().to_string();

        Ok(OrderResult {
            order_id,
            filled_qty: req.quantity,
            avg_price: req.price.unwrap_or(0.0),
            status: "live".to_string(),
        })
    }

    #[instrument(skip(self), name = "okx::cancel_order")]
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let body = serde_json::json!({ "instId": symbol, "ordId": order_id }).to_string();
        let path = "/api/v5/trade/cancel-order";
        let headers = self.signed_headers("POST", path, &body)?;
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .client
            .post(&url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .context("POST trade/cancel-order failed")?;
        let json: serde_json::Value = resp.json().await.context("failed to parse cancel response")?;
        Self::unwrap_envelope(json)?;

        debug!(symbol, order_id, "order cancelled");
        Ok(())
    }

    #[instrument(skip(self), name = "okx::get_open_orders")]
    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<serde_json::Value>> {
        let path = match symbol {
            Some(s) => format!("/api/v5/trade/orders-pending?instId={s}"),
            None => "/api/v5/trade/orders-pending".to_string(),
        };
        let headers = self.signed_headers("GET", &path, "")?;
        let url = format!("{}{}", self.base_url, path);

        let resp = self.client.get(&url).headers(headers).send().await.context("GET orders-pending failed")?;
        let json: serde_json::Value = resp.json().await.context("failed to parse orders-pending response")?;
        let data = Self::unwrap_envelope(json)?;

        Ok(data.as_array().cloned().unwrap_or_default())
    }

    #[instrument(skip(self), name = "okx::get_klines")]
    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/api/v5/market/candles?instId={}&bar={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        let resp = self.client.get(&url).send().await.context("GET market/candles failed")?;
        let json: serde_json::Value = resp.json().await.context("failed to parse candles response")?;
        let data = Self::unwrap_envelope(json)?;

        let raw = data.as_array().context("candles response is not an array")?;
        let mut candles = Vec::with_capacity(raw.len());

        for row in raw {
            let arr = match row.as_array() {
                Some(a) if a.len() >= 9 => a,
                _ => {
                    warn!("skipping malformed candle row");
                    continue;
                }
            };
            let open_time: i64 = arr[0].as_str().and_then(|s| s.parse().ok()).unwrap_or(0);
            let open = Self::parse_str_f64(&arr[1]);
            let high = Self::parse_str_f64(&arr[2]);
            let low = Self::parse_str_f64(&arr[3]);
            let close = Self::parse_str_f64(&arr[4]);
            let volume = Self::parse_str_f64(&arr[5]);
            candles.push(Candle::new(open_time, open, high, low, close, volume, open_time));
        }

        // OKX returns newest-first; the rest of the engine expects oldest-first.
        candles.reverse();
        debug!(symbol, interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }

    #[instrument(skip(self), name = "okx::get_mark_price")]
    async fn get_mark_price(&self, symbol: &str) -> Result<f64> {
        let url = format!("{}/api/v5/public/mark-price?instType=SWAP&instId={}", self.base_url, symbol);
        let resp = self.client.get(&url).send().await.context("GET public/mark-price failed")?;
        let json: serde_json::Value = resp.json().await.context("failed to parse mark-price response")?;
        let data = Self::unwrap_envelope(json)?;

        let price = data
            .as_array()
            .and_then(|a| a.first())
            .map(|e| Self::parse_str_f64(&e["markPx"]))
            .unwrap_or(0.0);
        Ok(price)
    }

    #[instrument(skip(self), name = "okx::get_funding_rate")]
    async fn get_funding_rate(&self, symbol: &str) -> Result<f64> {
        let url = format!("{}/api/v5/public/funding-rate?instId={}", self.base_url, symbol);
        let resp = self.client.get(&url).send().await.context("GET public/funding-rate failed")?;
        let json: serde_json::Value = resp.json().await.context("failed to parse funding-rate response")?;
        let data = Self::unwrap_envelope(json)?;

        let rate = data
            .as_array()
            .and_then(|a| a.first())
            .map(|e| Self::parse_str_f64(&e["fundingRate"]))
            .unwrap_or(0.0);
        Ok(rate)
    }
}

impl std::fmt::Debug for OkxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OkxClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_is_deterministic_for_same_prehash() {
        let client = OkxClient::new("key", "secret", "pass");
        let a = client.sign("hello");
        let b = client.sign("hello");
        assert_eq!(a, b);
    }

    #[test]
    fn okx_api_error_classifies_leverage_code() {
        let err = OkxApiError { code: "50004".to_string(), msg: "leverage not set".to_string() };
        assert!(err.is_leverage_not_set());
        assert!(!err.is_reprice_required());
    }

    #[test]
    fn okx_api_error_classifies_reprice_code() {
        let err = OkxApiError { code: "51006".to_string(), msg: "price outside limit".to_string() };
        assert!(err.is_reprice_required());
    }

    #[test]
    fn unwrap_envelope_passes_through_zero_code() {
        let body = serde_json::json!({"code": "0", "msg": "", "data": [{"a": 1}]});
        let data = OkxClient::unwrap_envelope(body).unwrap();
        assert_eq!(data[0]["a"], 1);
    }

    #[test]
    fn unwrap_envelope_errors_on_nonzero_code() {
        let body = serde_json::json!({"code": "51008", "msg": "insufficient balance", "data": []});
        let result = OkxClient::unwrap_envelope(body);
        assert!(result.is_err());
    }
}
