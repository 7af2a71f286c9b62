//! CSV format handling for change requests and run output
//!
//! This module centralizes all CSV format concerns, providing:
//! - CsvRecord structure for deserialization of replay files
//! - Conversion from CSV records to change requests
//! - Serialization of ledger rows, journal entries and the run report
//!
//! All functions are pure (no file handling) for easy testing.

use crate::load::LoadReport;
use crate::types::{
    AccountId, AccountLedger, ChangeRequest, CurrencyId, JournalEntry, LedgerError,
    TransactionId, TransactionType, DEFAULT_PROJECT,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Write;
use std::str::FromStr;

/// CSV record structure for deserialization
///
/// Matches the replay format with columns:
/// `account, tx, type, change, pincoin, bet, currency, project`.
/// Everything after `change` is optional and defaults to zero (or the
/// default project).
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CsvRecord {
    pub account: AccountId,
    pub tx: TransactionId,
    #[serde(rename = "type")]
    pub tx_type: String,
    pub change: String,
    #[serde(default)]
    pub pincoin: Option<String>,
    #[serde(default)]
    pub bet: Option<String>,
    #[serde(default)]
    pub currency: Option<CurrencyId>,
    #[serde(default)]
    pub project: Option<String>,
}

fn parse_amount(
    field: &str,
    raw: Option<&str>,
    tx: TransactionId,
) -> Result<Decimal, LedgerError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Decimal::ZERO),
        Some(value) => Decimal::from_str(value).map_err(|_| {
            LedgerError::invalid_request(format!("invalid {} '{}' for tx {}", field, value, tx))
        }),
    }
}

/// Convert a CsvRecord to a ChangeRequest
///
/// # Returns
///
/// * `Ok(ChangeRequest)` - Successfully converted record
/// * `Err(LedgerError::InvalidRequest)` - Unknown type or malformed amount
pub fn convert_csv_record(csv_record: CsvRecord) -> Result<ChangeRequest, LedgerError> {
    let tx = csv_record.tx;
    let tx_type = TransactionType::from_str(&csv_record.tx_type)?;

    if csv_record.change.trim().is_empty() {
        return Err(LedgerError::invalid_request(format!(
            "{} transaction {} for account {} requires a change",
            tx_type, tx, csv_record.account
        )));
    }
    let change = parse_amount("change", Some(&csv_record.change), tx)?;
    let pincoin = parse_amount("pincoin", csv_record.pincoin.as_deref(), tx)?;
    let bet = parse_amount("bet", csv_record.bet.as_deref(), tx)?;

    let project = csv_record
        .project
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_PROJECT.to_string());

    Ok(ChangeRequest::new(csv_record.account, tx, tx_type, change)
        .with_pincoin_change(pincoin)
        .with_bet_amount(bet)
        .with_currency(csv_record.currency.unwrap_or_default())
        .with_project(project))
}

/// Write ledger rows to CSV format
///
/// Columns: account, balance, pincoin_balance, deposit_all_sum,
/// deposit_count, pincoins_all_sum. Rows are sorted by account ID for
/// deterministic output.
pub fn write_ledgers_csv(
    ledgers: &[AccountLedger],
    output: &mut dyn Write,
) -> Result<(), LedgerError> {
    let mut writer = csv::Writer::from_writer(output);

    writer.write_record([
        "account",
        "balance",
        "pincoin_balance",
        "deposit_all_sum",
        "deposit_count",
        "pincoins_all_sum",
    ])?;

    let mut sorted = ledgers.to_vec();
    sorted.sort_by_key(|ledger| ledger.account_id);

    for ledger in sorted {
        writer.write_record(&[
            ledger.account_id.to_string(),
            format!("{:.2}", ledger.balance),
            ledger.pincoin_balance.to_string(),
            format!("{:.2}", ledger.deposit_all_sum),
            ledger.deposit_count.to_string(),
            ledger.pincoins_all_sum.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Write journal entries to CSV format, in the given order
pub fn write_journal_csv(
    entries: &[JournalEntry],
    output: &mut dyn Write,
) -> Result<(), LedgerError> {
    let mut writer = csv::Writer::from_writer(output);

    writer.write_record([
        "id",
        "idempotency_key",
        "account",
        "tx",
        "type",
        "project",
        "currency",
        "date",
        "change",
        "pincoin",
        "balance",
        "pincoin_balance",
    ])?;

    for entry in entries {
        writer.write_record(&[
            entry.id.to_string(),
            entry.idempotency_key.to_string(),
            entry.account_id.to_string(),
            entry.transaction_id.to_string(),
            entry.transaction_type.to_string(),
            entry.project.clone(),
            entry.currency.to_string(),
            entry.date.to_rfc3339(),
            entry.change.to_string(),
            entry.pincoin_change.to_string(),
            format!("{:.2}", entry.ledger.balance),
            entry.ledger.pincoin_balance.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Write the run report as a single-row CSV
pub fn write_report_csv(report: &LoadReport, output: &mut dyn Write) -> Result<(), LedgerError> {
    let mut writer = csv::Writer::from_writer(output);

    writer.write_record([
        "total",
        "succeeded",
        "rejected",
        "replayed",
        "errored",
        "elapsed_secs",
        "tps",
    ])?;
    writer.write_record(&[
        report.total().to_string(),
        report.succeeded.to_string(),
        report.rejected.to_string(),
        report.replayed.to_string(),
        report.errored.to_string(),
        format!("{:.3}", report.elapsed.as_secs_f64()),
        format!("{:.1}", report.tps()),
    ])?;

    writer.flush()?;
    Ok(())
}
