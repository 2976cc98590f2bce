use crate::domain::account::{Principal, Subaccount, Tokens};
use crate::error::Result;
use std::io::Write;

/// One ledger balance as reported at the end of a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceRow {
    pub ledger: Principal,
    pub owner: Principal,
    pub subaccount: Option<Subaccount>,
    pub balance: Tokens,
}

/// Writes balances as CSV with the header `ledger,owner,subaccount,balance`.
///
/// Default accounts leave the subaccount column empty; derived accounts show
/// the subaccount as hex.
pub struct BalanceWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> BalanceWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_balances(&mut self, rows: impl IntoIterator<Item = BalanceRow>) -> Result<()> {
        self.writer
            .write_record(["ledger", "owner", "subaccount", "balance"])?;
        for row in rows {
            let subaccount = row.subaccount.map(|s| s.to_hex()).unwrap_or_default();
            self.writer.write_record([
                row.ledger.as_str(),
                row.owner.as_str(),
                subaccount.as_str(),
                row.balance.to_string().as_str(),
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
