//! Builds allocation candidates from the desired portfolio and broker data.

use super::candidate::Candidate;
use crate::broker::{BrokerProvider, OwnedPosition};
use crate::config::TargetPosition;
use crate::error::{AutobuyError, Result};
use crate::utils::round_up_to_tick;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, warn};

/// Limit prices are quoted in cents.
const PRICE_TICK: Decimal = dec!(0.01);

/// Candidates ready for allocation plus the targets that had to be skipped.
#[derive(Debug, Default)]
pub struct Assembly {
    pub candidates: Vec<Candidate>,
    pub skipped: Vec<AutobuyError>,
}

/// Build one candidate per target, in order.
///
/// Targets whose product, price or fee cannot be retrieved, or that are
/// `core_only` but outside the broker's core selection, are skipped with a
/// `DataUnavailable` error instead of failing the run.
pub async fn assemble_candidates<P>(
    provider: &P,
    targets: &[TargetPosition],
    owned: &[OwnedPosition],
    price_buffer: Decimal,
) -> Assembly
where
    P: BrokerProvider + ?Sized,
{
    let mut assembly = Assembly::default();

    for target in targets {
        match build_candidate(provider, target, owned, price_buffer).await {
            Ok(candidate) => {
                debug!(
                    symbol = %candidate.symbol,
                    owned_value = %candidate.owned_value,
                    price = %candidate.price,
                    fee = %candidate.fee,
                    "Candidate ready"
                );
                assembly.candidates.push(candidate);
            }
            Err(e) => {
                warn!(symbol = %target.symbol, error = %e, "Excluding from this run");
                assembly.skipped.push(e);
            }
        }
    }

    assembly
}

async fn build_candidate<P>(
    provider: &P,
    target: &TargetPosition,
    owned: &[OwnedPosition],
    price_buffer: Decimal,
) -> Result<Candidate>
where
    P: BrokerProvider + ?Sized,
{
    let unavailable = |reason: String| AutobuyError::DataUnavailable {
        symbol: target.symbol.clone(),
        reason,
    };

    let product = provider
        .search_product(&target.isin, target.exchange)
        .await
        .map_err(|e| unavailable(e.to_string()))?
        .ok_or_else(|| {
            unavailable(format!(
                "no product with ISIN {} on exchange {}",
                target.isin, target.exchange
            ))
        })?;

    let price = provider
        .unit_price(&product)
        .await
        .map_err(|e| unavailable(e.to_string()))?
        .filter(|p| *p > Decimal::ZERO)
        .ok_or_else(|| unavailable("no price available".to_string()))?;

    let info = provider
        .order_info(&product)
        .await
        .map_err(|e| unavailable(e.to_string()))?;

    if info.transaction_fee < Decimal::ZERO {
        return Err(unavailable(format!(
            "negative transaction fee {}",
            info.transaction_fee
        )));
    }
    if target.core_only && !info.in_core_selection {
        return Err(unavailable("not part of the core selection".to_string()));
    }

    let owned_value: Decimal = owned
        .iter()
        .filter(|p| {
            p.isin.eq_ignore_ascii_case(&target.isin) && p.symbol.eq_ignore_ascii_case(&target.symbol)
        })
        .map(|p| p.value)
        .sum();

    Ok(Candidate::new(
        target.symbol.clone(),
        target.isin.clone(),
        product.id,
        owned_value,
        target.ratio,
        round_up_to_tick(price + price_buffer, PRICE_TICK),
        info.transaction_fee,
    ))
}
