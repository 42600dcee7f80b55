use std::io::Write;

use anyhow::Context;
use csv::Writer;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{account::AccountId, balance::LedgerId};

/// Final state of one ledger, amounts in major units.
#[derive(Debug, Serialize)]
pub struct LedgerRow {
    pub account: AccountId,
    pub ledger: LedgerId,
    pub actual: Decimal,
    pub obligating: Decimal,
    pub receiving: Decimal,
}

pub fn print_ledgers<W>(output: &mut W, rows: impl Iterator<Item = LedgerRow>) -> anyhow::Result<()>
where
    W: Write,
{
    let mut writer = Writer::from_writer(output);
    for row in rows {
        let account = row.account;
        writer
            .serialize(row)
            .with_context(|| format!("Failed to write ledger of account {account}"))?;
    }
    writer.flush().context("Failed to flush ledger report")
}
