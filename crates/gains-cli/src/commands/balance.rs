use anyhow::Result;
use gains_db::{lifetime_total, BalanceRow, LedgerStore};

fn print_row(b: &BalanceRow) {
    println!(
        "tax_year={} net={} short_term={} long_term={} carryover_loss={} after_carryover={}",
        b.tax_year,
        b.net_change,
        b.short_term,
        b.long_term,
        b.carryover_loss,
        b.after_carryover()
    );
}

/// Print one year, or every year plus the lifetime total.
pub async fn run(store: &dyn LedgerStore, account_id: i64, year: Option<i32>) -> Result<()> {
    match year {
        Some(year) => match store.fetch_balance(account_id, year).await? {
            Some(b) => print_row(&b),
            None => println!("tax_year={year} balance=none"),
        },
        None => {
            let mut rows = store.fetch_balances(account_id).await?;
            rows.sort_by_key(|r| r.tax_year);
            for b in &rows {
                print_row(b);
            }
            println!("lifetime_total={}", lifetime_total(&rows));
        }
    }
    Ok(())
}
