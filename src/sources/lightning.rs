use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::amount::msat_to_sats;
use crate::models::{ForwardingEvent, LightningHistoryPoint};

use super::command::{CommandRunner, ProcessRunner};
use super::SourceError;

/// Page size requested from `fwdinghistory`.
const FORWARDING_PAGE_SIZE: u32 = 50_000;
const LIST_LIMIT: u32 = 100_000;

const NEAR_RFC3339_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

const NEAR_RFC3339_OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Parse a timestamp that may be a Unix integer (as a number or a numeric
/// string), RFC3339, or one of a few near-RFC3339 layouts. Offset-less
/// layouts are taken as UTC.
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => parse_timestamp_str(s),
        _ => None,
    }
}

pub fn parse_timestamp_str(raw: &str) -> Option<i64> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(secs) = text.parse::<i64>() {
        return Some(secs);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp());
    }
    for format in NEAR_RFC3339_OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Some(dt.timestamp());
        }
    }
    for format in NEAR_RFC3339_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().timestamp());
        }
    }
    None
}

/// Render a numeric channel id as a `block:tx:output` short channel id.
/// Ids that are not plain integers are returned unchanged.
pub fn format_channel_id(raw: &str) -> String {
    match raw.trim().parse::<u64>() {
        Ok(id) => format!("{}:{}:{}", id >> 40, (id >> 16) & 0xFF_FFFF, id & 0xFFFF),
        Err(_) => raw.trim().to_string(),
    }
}

fn amount_field(value: &Value, sat_key: &str, msat_key: &str) -> Result<i64, SourceError> {
    if let Some(msat) = value.get(msat_key).and_then(number_text) {
        return Ok(msat_to_sats(&msat)?);
    }
    match value.get(sat_key).and_then(number_text) {
        Some(sat) => sat
            .parse::<i64>()
            .map_err(|_| SourceError::Parse(format!("invalid {}: {}", sat_key, sat))),
        None => Ok(0),
    }
}

/// lncli emits 64-bit integers as strings; accept plain numbers too.
fn number_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelBalance {
    pub local: i64,
    pub remote: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletBalance {
    pub confirmed: i64,
    pub unconfirmed: i64,
}

/// A balance-changing event seen by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightningEvent {
    pub timestamp: i64,
    pub kind: LightningEventKind,
    /// Signed satoshi: positive for inbound, negative for outbound.
    pub amount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightningEventKind {
    Invoice,
    Payment,
    Chain,
}

#[derive(Debug, Deserialize)]
struct ForwardingPage {
    #[serde(default)]
    forwarding_events: Vec<Value>,
    #[serde(default)]
    last_offset_index: Value,
}

#[derive(Debug, Deserialize)]
struct InvoiceList {
    #[serde(default)]
    invoices: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct PaymentList {
    #[serde(default)]
    payments: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ChainTransactionList {
    #[serde(default)]
    transactions: Vec<Value>,
}

/// Lightning node access over `lncli`.
pub struct LightningNodeAdapter {
    cli: String,
    base_args: Vec<String>,
    runner: Arc<dyn CommandRunner>,
}

impl LightningNodeAdapter {
    pub fn new(cli: impl Into<String>, base_args: Vec<String>, runner: Arc<dyn CommandRunner>) -> Self {
        let cli = cli.into();
        info!("Initializing lightning adapter: {}", cli);
        Self { cli, base_args, runner }
    }

    pub fn with_process_runner(cli: impl Into<String>, base_args: Vec<String>) -> Self {
        Self::new(cli, base_args, Arc::new(ProcessRunner))
    }

    async fn call_json<T: DeserializeOwned>(&self, verb: &str, params: &[String]) -> Result<T, SourceError> {
        let mut args = self.base_args.clone();
        args.push(verb.to_string());
        args.extend(params.iter().cloned());

        let output = self.runner.run(&self.cli, &args).await?;
        serde_json::from_str(output.trim())
            .map_err(|e| SourceError::Parse(format!("{} returned unexpected output: {}", verb, e)))
    }

    pub async fn channel_balance(&self) -> Result<ChannelBalance, SourceError> {
        let value: Value = self.call_json("channelbalance", &[]).await?;
        let side = |key: &str| -> Result<i64, SourceError> {
            match value.get(key) {
                Some(inner) => amount_field(inner, "sat", "msat"),
                None => Ok(0),
            }
        };

        Ok(ChannelBalance {
            local: side("local_balance")?,
            remote: side("remote_balance")?,
        })
    }

    pub async fn wallet_balance(&self) -> Result<WalletBalance, SourceError> {
        let value: Value = self.call_json("walletbalance", &[]).await?;
        let field = |key: &str| -> Result<i64, SourceError> {
            match value.get(key).and_then(number_text) {
                Some(text) => text
                    .parse::<i64>()
                    .map_err(|_| SourceError::Parse(format!("invalid {}: {}", key, text))),
                None => Ok(0),
            }
        };

        Ok(WalletBalance {
            confirmed: field("confirmed_balance")?,
            unconfirmed: field("unconfirmed_balance")?,
        })
    }

    /// Every forward completed in `[start, end]`, following the offset
    /// cursor until a short page.
    pub async fn forwarding_history(&self, start: i64, end: i64) -> Result<Vec<ForwardingEvent>, SourceError> {
        let mut events = Vec::new();
        let mut offset: u64 = 0;

        loop {
            let page: ForwardingPage = self
                .call_json(
                    "fwdinghistory",
                    &[
                        start.to_string(),
                        end.to_string(),
                        offset.to_string(),
                        FORWARDING_PAGE_SIZE.to_string(),
                    ],
                )
                .await?;

            let count = page.forwarding_events.len();
            for raw in &page.forwarding_events {
                events.push(parse_forwarding_event(raw)?);
            }

            let next = number_text(&page.last_offset_index)
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(offset);
            if count < FORWARDING_PAGE_SIZE as usize || next <= offset {
                break;
            }
            offset = next;
        }

        debug!("Fetched {} forwarding events between {} and {}", events.len(), start, end);
        Ok(events)
    }

    pub async fn settled_invoices(&self) -> Result<Vec<LightningEvent>, SourceError> {
        let list: InvoiceList = self
            .call_json("listinvoices", &[format!("--max_invoices={}", LIST_LIMIT)])
            .await?;

        let mut events = Vec::new();
        for invoice in &list.invoices {
            let settled = invoice.get("settled").and_then(Value::as_bool).unwrap_or(false);
            let state = invoice.get("state").and_then(Value::as_str).unwrap_or_default();
            if !settled || state != "SETTLED" {
                continue;
            }

            let timestamp = invoice
                .get("settle_date")
                .and_then(parse_timestamp)
                .filter(|t| *t > 0)
                .or_else(|| invoice.get("creation_date").and_then(parse_timestamp))
                .ok_or_else(|| SourceError::Parse("invoice without a timestamp".to_string()))?;
            let amount = amount_field(invoice, "amt_paid_sat", "amt_paid_msat")?;

            events.push(LightningEvent {
                timestamp,
                kind: LightningEventKind::Invoice,
                amount,
            });
        }
        Ok(events)
    }

    pub async fn succeeded_payments(&self) -> Result<Vec<LightningEvent>, SourceError> {
        let list: PaymentList = self
            .call_json("listpayments", &[format!("--max_payments={}", LIST_LIMIT)])
            .await?;

        let mut events = Vec::new();
        for payment in &list.payments {
            if payment.get("status").and_then(Value::as_str) != Some("SUCCEEDED") {
                continue;
            }

            let timestamp = payment
                .get("creation_date")
                .and_then(parse_timestamp)
                .ok_or_else(|| SourceError::Parse("payment without a timestamp".to_string()))?;
            let value = amount_field(payment, "value_sat", "value_msat")?;
            let fee = amount_field(payment, "fee_sat", "fee_msat")?;

            events.push(LightningEvent {
                timestamp,
                kind: LightningEventKind::Payment,
                amount: -(value + fee),
            });
        }
        Ok(events)
    }

    pub async fn chain_transactions(&self) -> Result<Vec<LightningEvent>, SourceError> {
        let list: ChainTransactionList = self.call_json("listchaintxns", &[]).await?;

        let mut events = Vec::new();
        for tx in &list.transactions {
            let timestamp = tx
                .get("time_stamp")
                .and_then(parse_timestamp)
                .ok_or_else(|| SourceError::Parse("chain transaction without a timestamp".to_string()))?;
            let amount = match tx.get("amount").and_then(number_text) {
                Some(text) => text
                    .parse::<i64>()
                    .map_err(|_| SourceError::Parse(format!("invalid amount: {}", text)))?,
                None => 0,
            };

            events.push(LightningEvent {
                timestamp,
                kind: LightningEventKind::Chain,
                amount,
            });
        }
        Ok(events)
    }

    /// Balance points over `[from, to]`, oldest first, reconstructed by
    /// walking node events backwards from the current balances.
    pub async fn history(&self, from: i64, to: i64) -> Result<Vec<LightningHistoryPoint>, SourceError> {
        let channels = self.channel_balance().await?;
        let wallet = self.wallet_balance().await?;

        let mut events = self.settled_invoices().await?;
        events.extend(self.succeeded_payments().await?);
        events.extend(self.chain_transactions().await?);

        Ok(reconstruct_history(channels, wallet.confirmed, events, from, to))
    }
}

fn parse_forwarding_event(raw: &Value) -> Result<ForwardingEvent, SourceError> {
    let timestamp = raw
        .get("timestamp")
        .and_then(parse_timestamp)
        .ok_or_else(|| SourceError::Parse("forwarding event without a timestamp".to_string()))?;
    let channel = |key: &str| {
        raw.get(key)
            .and_then(number_text)
            .map(|id| format_channel_id(&id))
            .ok_or_else(|| SourceError::Parse(format!("forwarding event without {}", key)))
    };

    Ok(ForwardingEvent {
        timestamp,
        chan_id_in: channel("chan_id_in")?,
        chan_id_out: channel("chan_id_out")?,
        amount_in: amount_field(raw, "amt_in", "amt_in_msat")?,
        amount_out: amount_field(raw, "amt_out", "amt_out_msat")?,
        fee: amount_field(raw, "fee", "fee_msat")?,
    })
}

/// Undo `event` on the running balances.
fn reverse(event: &LightningEvent, local: &mut i64, onchain: &mut i64) {
    match event.kind {
        LightningEventKind::Invoice | LightningEventKind::Payment => *local -= event.amount,
        LightningEventKind::Chain => *onchain -= event.amount,
    }
}

/// Walk `events` backwards from the current balances. A point is emitted at
/// `to`, after every event inside the window, and at `from`. The remote
/// channel balance is carried unchanged.
pub fn reconstruct_history(
    current: ChannelBalance,
    current_onchain: i64,
    mut events: Vec<LightningEvent>,
    from: i64,
    to: i64,
) -> Vec<LightningHistoryPoint> {
    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let mut local = current.local;
    let mut onchain = current_onchain;
    let point = |timestamp: i64, local: i64, onchain: i64| LightningHistoryPoint {
        timestamp,
        local,
        remote: current.remote,
        onchain,
    };

    // Events after the window end are undone before the first point.
    let mut remaining = events.iter().peekable();
    while let Some(event) = remaining.next_if(|e| e.timestamp > to) {
        reverse(event, &mut local, &mut onchain);
    }

    let mut points = vec![point(to, local, onchain)];
    for event in remaining {
        if event.timestamp < from {
            break;
        }
        points.push(point(event.timestamp, local, onchain));
        reverse(event, &mut local, &mut onchain);
    }
    points.push(point(from, local, onchain));

    points.reverse();
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamps_in_all_supported_shapes() {
        assert_eq!(parse_timestamp(&json!(1_700_000_000)), Some(1_700_000_000));
        assert_eq!(parse_timestamp(&json!("1700000000")), Some(1_700_000_000));
        assert_eq!(parse_timestamp(&json!("2023-11-14T22:13:20Z")), Some(1_700_000_000));
        assert_eq!(parse_timestamp(&json!("2023-11-14T23:13:20+01:00")), Some(1_700_000_000));
        assert_eq!(parse_timestamp(&json!("2023-11-14 22:13:20")), Some(1_700_000_000));
        assert_eq!(parse_timestamp(&json!("2023-11-14T22:13:20.250")), Some(1_700_000_000));
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
        assert_eq!(parse_timestamp(&json!(null)), None);
    }

    #[test]
    fn numeric_channel_ids_become_short_ids() {
        let id: u64 = (123 << 40) | (1 << 16);
        assert_eq!(format_channel_id(&id.to_string()), "123:1:0");
        assert_eq!(format_channel_id("987:1:0"), "987:1:0");
    }

    #[test]
    fn forwarding_event_prefers_msat_fields() {
        let raw = json!({
            "timestamp": "1700000000",
            "chan_id_in": ((123u64 << 40) | (1 << 16)).to_string(),
            "chan_id_out": "987:1:0",
            "amt_in": "100000",
            "amt_out": "99800",
            "fee": "200",
            "amt_in_msat": "100000999",
            "amt_out_msat": "99800000",
            "fee_msat": "200999",
        });
        let event = parse_forwarding_event(&raw).unwrap();
        assert_eq!(event.chan_id_in, "123:1:0");
        assert_eq!(event.amount_in, 100_000);
        assert_eq!(event.amount_out, 99_800);
        assert_eq!(event.fee, 200);
    }

    #[test]
    fn history_walks_back_from_current_balances() {
        let current = ChannelBalance {
            local: 1_000,
            remote: 5_000,
        };
        let events = vec![
            LightningEvent {
                timestamp: 200,
                kind: LightningEventKind::Invoice,
                amount: 300,
            },
            LightningEvent {
                timestamp: 300,
                kind: LightningEventKind::Payment,
                amount: -100,
            },
            LightningEvent {
                timestamp: 250,
                kind: LightningEventKind::Chain,
                amount: 40,
            },
            LightningEvent {
                timestamp: 900,
                kind: LightningEventKind::Invoice,
                amount: 10,
            },
        ];

        let points = reconstruct_history(current, 500, events, 100, 400);
        let shape: Vec<(i64, i64, i64)> = points.iter().map(|p| (p.timestamp, p.local, p.onchain)).collect();
        assert_eq!(
            shape,
            vec![
                (100, 790, 460),
                (200, 1_090, 460),
                (250, 1_090, 500),
                (300, 990, 500),
                (400, 990, 500),
            ]
        );
        assert!(points.iter().all(|p| p.remote == 5_000));
    }
}
