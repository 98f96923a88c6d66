//! Invoice extraction for zap receipts.
//!
//! A zap receipt carries the paid BOLT-11 invoice in its `bolt11` tag and
//! the payer's signed zap request (kind 9734) as JSON in its `description`
//! tag. The amount is read from the invoice's human-readable part; the payer
//! and comment come from the zap request.

use std::sync::LazyLock;

use glean_nostr::{Event, EventKind};
use regex::Regex;
use tracing::trace;

/// `ln` + network prefix, then the amount and its multiplier, then the `1`
/// separator.
static BOLT11_AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ln(?:bcrt|bc|tbs|tb|sb)(\d+)([munp]?)1").expect("valid bolt11 amount regex")
});

/// Millisatoshis per bitcoin.
const MSAT_PER_BTC: u128 = 100_000_000_000;

/// What a zap receipt says about its payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZapDetails {
    pub payer: String,
    pub payee: String,
    /// Amount in sats.
    pub amount: u64,
    pub comment: Option<String>,
}

/// Amount encoded in a BOLT-11 invoice, in sats.
///
/// Returns `None` for invoices without an amount or with an unusable one.
/// Sub-satoshi remainders are truncated.
pub fn bolt11_amount_sats(invoice: &str) -> Option<u64> {
    let invoice = invoice.trim().to_ascii_lowercase();
    let captures = BOLT11_AMOUNT.captures(&invoice)?;
    let value: u128 = captures.get(1)?.as_str().parse().ok()?;

    let msat = match captures.get(2).map(|m| m.as_str()) {
        Some("m") => value.checked_mul(MSAT_PER_BTC / 1_000)?,
        Some("u") => value.checked_mul(MSAT_PER_BTC / 1_000_000)?,
        Some("n") => value.checked_mul(MSAT_PER_BTC / 1_000_000_000)?,
        Some("p") => value / 10,
        _ => value.checked_mul(MSAT_PER_BTC)?,
    };

    u64::try_from(msat / 1_000).ok()
}

/// Extract payer, payee, amount and comment from a zap receipt.
///
/// Returns `None` when the receipt does not carry enough to identify the
/// payment; callers drop such receipts.
pub fn extract(receipt: &Event) -> Option<ZapDetails> {
    let request = receipt
        .tag("description")
        .and_then(|json| Event::from_json(json).ok())
        .filter(|request| request.event_kind() == EventKind::ZapRequest);

    let payee = receipt.tag("p")?.to_string();

    let payer = request
        .as_ref()
        .map(|r| r.pubkey.clone())
        .or_else(|| receipt.tag("P").map(str::to_string));
    let Some(payer) = payer else {
        trace!(id = %receipt.id, "zap receipt has no payer");
        return None;
    };

    // Fall back to the amount the payer asked for
    let amount = receipt
        .tag("bolt11")
        .and_then(bolt11_amount_sats)
        .or_else(|| {
            request
                .as_ref()
                .and_then(|r| r.tag("amount"))
                .and_then(|msat| msat.parse::<u64>().ok())
                .map(|msat| msat / 1_000)
        });
    let Some(amount) = amount else {
        trace!(id = %receipt.id, "zap receipt has no amount");
        return None;
    };

    let comment = request
        .map(|r| r.content)
        .filter(|content| !content.is_empty());

    Some(ZapDetails {
        payer,
        payee,
        amount,
        comment,
    })
}
