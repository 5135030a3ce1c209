//! Broker-facing data types: domain records plus DEGIRO wire formats.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A tradable product as returned by the broker's product search.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub isin: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub exchange_id: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub close_price: Option<Decimal>,
    /// Identifier used by the chart/quote service
    #[serde(default)]
    pub vwd_id: Option<String>,
}

/// A currently held position in one product.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedPosition {
    pub product_id: String,
    pub symbol: String,
    pub isin: String,
    /// Number of units held
    pub size: Decimal,
    /// Market value (units x current price) in the account currency
    pub value: Decimal,
}

/// Fee information obtained from a trial order check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderInfo {
    /// Fixed fee charged per order
    pub transaction_fee: Decimal,
    /// Product is part of the broker's fee-free core selection
    pub in_core_selection: bool,
}

/// A buy order handed to the executor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
    pub product_id: String,
    pub symbol: String,
    pub quantity: u64,
    /// Limit price; market order when absent
    pub limit_price: Option<Decimal>,
}

impl fmt::Display for OrderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.limit_price {
            Some(limit) => write!(f, "BUY {} x {} @ {}", self.quantity, self.symbol, limit),
            None => write!(f, "BUY {} x {} @ market", self.quantity, self.symbol),
        }
    }
}

// ==================== DEGIRO wire formats ====================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub is_pass_code_reset: bool,
    pub is_redirect_to_mobile: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub one_time_password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoginResponse {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub status_text: Option<String>,
}

/// Login status codes returned instead of a session id.
pub(crate) const LOGIN_STATUS_BAD_CREDENTIALS: i32 = 3;
pub(crate) const LOGIN_STATUS_TOTP_NEEDED: i32 = 6;

#[derive(Debug, Deserialize)]
pub(crate) struct DataEnvelope<T> {
    pub data: T,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountConfig {
    pub client_id: i64,
    pub pa_url: String,
    pub trading_url: String,
    pub product_search_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ClientInfo {
    pub int_account: i64,
}

/// Response of the `update` endpoint; only the requested sections are present.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpdateResponse {
    #[serde(default)]
    pub cash_funds: Option<UpdateSection>,
    #[serde(default)]
    pub portfolio: Option<UpdateSection>,
    #[serde(default)]
    pub orders: Option<UpdateSection>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct UpdateSection {
    #[serde(default)]
    pub value: Vec<UpdateRow>,
}

/// One row of an update section: a list of named values.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct UpdateRow {
    #[serde(default)]
    pub value: Vec<NamedValue>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NamedValue {
    pub name: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl UpdateRow {
    fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.value.iter().find(|v| v.name == name).map(|v| &v.value)
    }

    pub fn string(&self, name: &str) -> Option<String> {
        match self.field(name)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn decimal(&self, name: &str) -> Option<Decimal> {
        match self.field(name)? {
            serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
                .or_else(|_| Decimal::from_scientific(&n.to_string()))
                .ok(),
            serde_json::Value::String(s) => Decimal::from_str(s).ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct LookupResponse {
    #[serde(default)]
    pub products: Vec<Product>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ProductInfoResponse {
    #[serde(default)]
    pub data: HashMap<String, Product>,
}

/// DEGIRO order types.
pub(crate) const ORDER_TYPE_LIMIT: u8 = 0;
pub(crate) const ORDER_TYPE_MARKET: u8 = 2;
/// Order valid for the current trading day only.
pub(crate) const TIME_TYPE_DAY: u8 = 1;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CheckOrderRequest {
    pub buy_sell: &'static str,
    pub order_type: u8,
    pub product_id: String,
    pub size: u64,
    pub time_type: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
}

impl CheckOrderRequest {
    pub fn buy(product_id: &str, size: u64, limit_price: Option<Decimal>) -> Self {
        Self {
            buy_sell: "BUY",
            order_type: if limit_price.is_some() {
                ORDER_TYPE_LIMIT
            } else {
                ORDER_TYPE_MARKET
            },
            product_id: product_id.to_string(),
            size,
            time_type: TIME_TYPE_DAY,
            price: limit_price,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CheckOrderData {
    pub confirmation_id: String,
    #[serde(default)]
    pub transaction_fee: Option<Decimal>,
    #[serde(default)]
    pub transaction_fees: Vec<TransactionFee>,
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TransactionFee {
    pub amount: Decimal,
}

impl CheckOrderData {
    /// Fixed order fee, from the single fee field or the itemized list.
    pub fn fee(&self) -> Decimal {
        self.transaction_fee
            .unwrap_or_else(|| self.transaction_fees.iter().map(|f| f.amount).sum())
            .abs()
    }

    pub fn has_message(&self, needle: &str) -> bool {
        self.messages.iter().any(|m| match m.as_str() {
            Some(s) => s == needle,
            None => m.to_string().contains(needle),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConfirmOrderData {
    #[serde(deserialize_with = "string_or_number")]
    pub order_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ChartResponse {
    #[serde(default)]
    pub series: Vec<ChartSeries>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ChartSeries {
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ChartResponse {
    pub fn last_price(&self) -> Option<Decimal> {
        let value = self.series.first()?.data.get("lastPrice")?;
        match value {
            serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            serde_json::Value::String(s) => Decimal::from_str(s).ok(),
            _ => None,
        }
    }
}

/// DEGIRO sends ids sometimes as strings, sometimes as numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_product_deserialize_mixed_ids() {
        let product: Product = serde_json::from_value(serde_json::json!({
            "id": 4586985,
            "name": "iShares Core MSCI World",
            "symbol": "IWDA",
            "isin": "IE00B4L5Y983",
            "exchangeId": "200",
            "currency": "EUR",
            "closePrice": 84.12,
            "vwdId": "360114899"
        }))
        .unwrap();

        assert_eq!(product.id, "4586985");
        assert_eq!(product.exchange_id, "200");
        assert_eq!(product.close_price, Some(dec!(84.12)));
        assert_eq!(product.vwd_id.as_deref(), Some("360114899"));
    }

    #[test]
    fn test_update_row_fields() {
        let row: UpdateRow = serde_json::from_value(serde_json::json!({
            "value": [
                { "name": "id", "value": "4586985" },
                { "name": "positionType", "value": "PRODUCT" },
                { "name": "size", "value": 12 },
                { "name": "value", "value": 1009.44 }
            ]
        }))
        .unwrap();

        assert_eq!(row.string("id").as_deref(), Some("4586985"));
        assert_eq!(row.string("positionType").as_deref(), Some("PRODUCT"));
        assert_eq!(row.decimal("size"), Some(dec!(12)));
        assert_eq!(row.decimal("value"), Some(dec!(1009.44)));
        assert_eq!(row.decimal("missing"), None);
    }

    #[test]
    fn test_check_order_fee_sources() {
        let single: CheckOrderData = serde_json::from_value(serde_json::json!({
            "confirmationId": "abc",
            "transactionFee": 2
        }))
        .unwrap();
        assert_eq!(single.fee(), dec!(2));

        let itemized: CheckOrderData = serde_json::from_value(serde_json::json!({
            "confirmationId": "abc",
            "transactionFees": [{ "amount": -1.0 }, { "amount": -1.0 }]
        }))
        .unwrap();
        assert_eq!(itemized.fee(), dec!(2));
    }

    #[test]
    fn test_check_order_request_types() {
        let limit = CheckOrderRequest::buy("1", 3, Some(dec!(10.02)));
        assert_eq!(limit.order_type, ORDER_TYPE_LIMIT);
        let market = CheckOrderRequest::buy("1", 3, None);
        assert_eq!(market.order_type, ORDER_TYPE_MARKET);
        let json = serde_json::to_value(&market).unwrap();
        assert!(json.get("price").is_none());
        assert_eq!(json["buySell"], "BUY");
    }

    #[test]
    fn test_chart_last_price() {
        let chart: ChartResponse = serde_json::from_value(serde_json::json!({
            "series": [{ "data": { "lastPrice": 84.5 } }]
        }))
        .unwrap();
        assert_eq!(chart.last_price(), Some(dec!(84.5)));
        assert_eq!(ChartResponse::default().last_price(), None);
    }

    #[test]
    fn test_order_request_display() {
        let order = OrderRequest {
            product_id: "1".into(),
            symbol: "IWDA".into(),
            quantity: 4,
            limit_price: Some(dec!(84.14)),
        };
        assert_eq!(order.to_string(), "BUY 4 x IWDA @ 84.14");
    }
}
