//! DEGIRO web API client.

use super::totp;
use super::traits::{BrokerProvider, OrderExecutor};
use super::types::*;
use crate::config::Credentials;
use crate::error::{AutobuyError, Result};
use async_trait::async_trait;
use reqwest::header::{COOKIE, ORIGIN};
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

const TRADER_BASE_URL: &str = "https://trader.degiro.nl";
const CHART_BASE_URL: &str = "https://charting.vwdservices.com";
const CHART_ORIGIN: &str = "https://trader.degiro.nl/";
const ETF_PRODUCT_TYPE: u32 = 131;
const LOOKUP_LIMIT: u32 = 10;
/// Check-order message marking a product as part of the fee-free core selection.
const CORE_SELECTION_NOTICE: &str = "trader.orderConfirmation.freeETFCommissionNotice";
/// Price used for fee probes; the check never turns into an order.
const PROBE_LIMIT_PRICE: Decimal = dec!(0.01);

/// Authenticated session state discovered after login.
#[derive(Debug, Clone)]
struct Session {
    session_id: String,
    int_account: i64,
    client_id: i64,
    trading_url: String,
    product_search_url: String,
}

/// DEGIRO client implementing both broker traits.
pub struct DegiroClient {
    http: Client,
    credentials: Credentials,
    trader_base_url: String,
    chart_base_url: String,
    session_path: Option<PathBuf>,
    session: RwLock<Option<Session>>,
}

impl DegiroClient {
    /// Create a client; `session_path` persists the session id between runs.
    pub fn new(credentials: &Credentials, session_path: Option<PathBuf>) -> Result<Self> {
        Self::with_base_urls(credentials, session_path, TRADER_BASE_URL, CHART_BASE_URL)
    }

    /// Create a client against custom endpoints.
    pub fn with_base_urls(
        credentials: &Credentials,
        session_path: Option<PathBuf>,
        trader_base_url: &str,
        chart_base_url: &str,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AutobuyError::Broker(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            credentials: credentials.clone(),
            trader_base_url: trader_base_url.trim_end_matches('/').to_string(),
            chart_base_url: chart_base_url.trim_end_matches('/').to_string(),
            session_path,
            session: RwLock::new(None),
        })
    }

    async fn session(&self) -> Result<Session> {
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| AutobuyError::Broker("not logged in".to_string()))
    }

    // ==================== Session ====================

    fn read_saved_session(&self) -> Option<String> {
        let path = self.session_path.as_ref()?;
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let id = contents.trim().to_string();
                (!id.is_empty()).then_some(id)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read session file");
                None
            }
        }
    }

    fn save_session(&self, session_id: &str) {
        let Some(path) = self.session_path.as_ref() else {
            return;
        };
        if let Err(e) = std::fs::write(path, session_id) {
            warn!(path = %path.display(), error = %e, "Could not write session file");
        }
    }

    async fn login_with_credentials(&self) -> Result<String> {
        let mut body = LoginRequest {
            username: &self.credentials.username,
            password: &self.credentials.password,
            is_pass_code_reset: false,
            is_redirect_to_mobile: false,
            one_time_password: None,
        };

        let url = match &self.credentials.totp_seed {
            Some(seed) => {
                body.one_time_password = Some(totp::current_code(seed)?);
                format!("{}/login/secure/login/totp", self.trader_base_url)
            }
            None => format!("{}/login/secure/login", self.trader_base_url),
        };

        let login: LoginResponse = self.http.post(&url).json(&body).send().await?.json().await?;

        match login.session_id {
            Some(id) => Ok(id),
            None => Err(AutobuyError::Broker(match login.status {
                LOGIN_STATUS_BAD_CREDENTIALS => {
                    "Invalid credentials, check username and password".to_string()
                }
                LOGIN_STATUS_TOTP_NEEDED => {
                    "Two-factor login required but no TOTP seed configured".to_string()
                }
                status => format!(
                    "Error logging in (status {status}): {}",
                    login.status_text.unwrap_or_default()
                ),
            })),
        }
    }

    /// Resolve account URLs and ids for a session id.
    async fn open_session(&self, session_id: String) -> Result<Session> {
        let config: DataEnvelope<AccountConfig> = self
            .http
            .get(format!("{}/login/secure/config", self.trader_base_url))
            .header(COOKIE, format!("JSESSIONID={session_id};"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let config = config.data;

        let client: DataEnvelope<ClientInfo> = self
            .http
            .get(format!("{}client", config.pa_url))
            .query(&[("sessionId", session_id.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(Session {
            session_id,
            int_account: client.data.int_account,
            client_id: config.client_id,
            trading_url: config.trading_url,
            product_search_url: config.product_search_url,
        })
    }

    // ==================== Account ====================

    async fn update(&self, section: &str) -> Result<UpdateResponse> {
        let session = self.session().await?;
        let url = format!(
            "{}v5/update/{};jsessionid={}",
            session.trading_url, session.int_account, session.session_id
        );

        let response = self
            .http
            .get(&url)
            .query(&[
                ("intAccount", session.int_account.to_string()),
                ("sessionId", session.session_id.clone()),
                (section, "0".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    async fn products_info(&self, ids: &[String]) -> Result<ProductInfoResponse> {
        let session = self.session().await?;
        let url = format!("{}v5/products/info", session.product_search_url);

        let response = self
            .http
            .post(&url)
            .query(&[
                ("intAccount", session.int_account.to_string()),
                ("sessionId", session.session_id.clone()),
            ])
            .json(ids)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    // ==================== Orders ====================

    async fn check_order(&self, request: &CheckOrderRequest) -> Result<CheckOrderData> {
        let session = self.session().await?;
        let url = format!(
            "{}v5/checkOrder;jsessionid={}",
            session.trading_url, session.session_id
        );

        let response = self
            .http
            .post(&url)
            .query(&[
                ("intAccount", session.int_account.to_string()),
                ("sessionId", session.session_id.clone()),
            ])
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AutobuyError::Broker(format!(
                "check order failed ({status}): {body}"
            )));
        }

        let envelope: DataEnvelope<CheckOrderData> = response.json().await?;
        Ok(envelope.data)
    }

    async fn confirm_order(
        &self,
        confirmation_id: &str,
        request: &CheckOrderRequest,
    ) -> Result<String> {
        let session = self.session().await?;
        let url = format!(
            "{}v5/order/{};jsessionid={}",
            session.trading_url, confirmation_id, session.session_id
        );

        let response = self
            .http
            .post(&url)
            .query(&[
                ("intAccount", session.int_account.to_string()),
                ("sessionId", session.session_id.clone()),
            ])
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AutobuyError::Broker(format!(
                "order confirmation failed ({status}): {body}"
            )));
        }

        let envelope: DataEnvelope<ConfirmOrderData> = response.json().await?;
        Ok(envelope.data.order_id)
    }
}

#[async_trait]
impl BrokerProvider for DegiroClient {
    #[instrument(skip(self))]
    async fn login(&self) -> Result<()> {
        // Sessions expire between scheduled runs, so a known id is revalidated.
        let known = match self.session.read().await.as_ref() {
            Some(session) => Some(session.session_id.clone()),
            None => self.read_saved_session(),
        };

        if let Some(saved) = known {
            match self.open_session(saved).await {
                Ok(session) => {
                    debug!(int_account = session.int_account, "Reusing saved session");
                    *self.session.write().await = Some(session);
                    return Ok(());
                }
                Err(e) => debug!(error = %e, "Saved session rejected, logging in again"),
            }
        }

        let session_id = self.login_with_credentials().await?;
        let session = self.open_session(session_id).await?;
        self.save_session(&session.session_id);
        info!(int_account = session.int_account, "Logged in");
        *self.session.write().await = Some(session);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cash_funds(&self, currency: &str) -> Result<Decimal> {
        let update = self.update("cashFunds").await?;
        let rows = update.cash_funds.unwrap_or_default().value;

        rows.iter()
            .find(|row| row.string("currencyCode").as_deref() == Some(currency))
            .and_then(|row| row.decimal("value"))
            .ok_or_else(|| AutobuyError::Broker(format!("no cash funds in {currency}")))
    }

    #[instrument(skip(self))]
    async fn owned_positions(&self) -> Result<Vec<OwnedPosition>> {
        let update = self.update("portfolio").await?;
        let rows = update.portfolio.unwrap_or_default().value;

        let held: Vec<(String, Decimal, Decimal)> = rows
            .iter()
            .filter(|row| row.string("positionType").as_deref() == Some("PRODUCT"))
            .filter_map(|row| {
                let id = row.string("id")?;
                let size = row.decimal("size")?;
                let value = row.decimal("value").unwrap_or(Decimal::ZERO);
                (size > Decimal::ZERO).then_some((id, size, value))
            })
            .collect();

        if held.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = held.iter().map(|(id, _, _)| id.clone()).collect();
        let info = self.products_info(&ids).await?;

        let mut positions = Vec::with_capacity(held.len());
        for (id, size, value) in held {
            match info.data.get(&id) {
                Some(product) => positions.push(OwnedPosition {
                    product_id: id,
                    symbol: product.symbol.clone(),
                    isin: product.isin.clone(),
                    size,
                    value,
                }),
                None => warn!(product_id = %id, "No product details for held position"),
            }
        }

        debug!(count = positions.len(), "Fetched owned positions");
        Ok(positions)
    }

    #[instrument(skip(self))]
    async fn has_open_orders(&self) -> Result<bool> {
        let update = self.update("orders").await?;
        Ok(!update.orders.unwrap_or_default().value.is_empty())
    }

    #[instrument(skip(self))]
    async fn search_product(&self, isin: &str, exchange: u32) -> Result<Option<Product>> {
        let session = self.session().await?;
        let url = format!("{}v5/products/lookup", session.product_search_url);

        let response = self
            .http
            .get(&url)
            .query(&[
                ("intAccount", session.int_account.to_string()),
                ("sessionId", session.session_id.clone()),
                ("searchText", isin.to_string()),
                ("productTypeId", ETF_PRODUCT_TYPE.to_string()),
                ("limit", LOOKUP_LIMIT.to_string()),
                ("offset", "0".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let lookup: LookupResponse = response.json().await?;
        let exchange = exchange.to_string();

        Ok(lookup
            .products
            .into_iter()
            .find(|p| p.isin.eq_ignore_ascii_case(isin) && p.exchange_id == exchange))
    }

    #[instrument(skip(self, product), fields(symbol = %product.symbol))]
    async fn unit_price(&self, product: &Product) -> Result<Option<Decimal>> {
        let Some(vwd_id) = product.vwd_id.as_deref() else {
            debug!("Product has no quote identifier");
            return Ok(None);
        };
        let session = self.session().await?;

        let response = self
            .http
            .get(format!("{}/hchart/v1/deGiro/data.js", self.chart_base_url))
            .header(ORIGIN, CHART_ORIGIN)
            .query(&[
                ("requestid", "1".to_string()),
                ("resolution", "PT1M".to_string()),
                ("period", "P1D".to_string()),
                ("series", format!("issueid:{vwd_id}")),
                ("format", "json".to_string()),
                ("userToken", session.client_id.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let chart: ChartResponse = response.json().await?;
        Ok(chart.last_price())
    }

    #[instrument(skip(self, product), fields(symbol = %product.symbol))]
    async fn order_info(&self, product: &Product) -> Result<OrderInfo> {
        let probe = CheckOrderRequest::buy(&product.id, 1, Some(PROBE_LIMIT_PRICE));
        let check = self.check_order(&probe).await?;

        Ok(OrderInfo {
            transaction_fee: check.fee(),
            in_core_selection: check.has_message(CORE_SELECTION_NOTICE),
        })
    }
}

#[async_trait]
impl OrderExecutor for DegiroClient {
    #[instrument(skip(self, order), fields(order = %order))]
    async fn place_order(&self, order: &OrderRequest, dry_run: bool) -> Result<String> {
        let request = CheckOrderRequest::buy(&order.product_id, order.quantity, order.limit_price);
        let check = self.check_order(&request).await?;

        if dry_run {
            return Ok(format!(
                "Dry run. Not placing an actual order (check {} passed, fee {})",
                check.confirmation_id,
                check.fee()
            ));
        }

        let order_id = self.confirm_order(&check.confirmation_id, &request).await?;
        Ok(format!("Order placed, id {order_id}"))
    }
}
