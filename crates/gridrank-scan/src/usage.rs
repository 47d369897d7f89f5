//! Per-account scan allowance.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::ScanError;

pub trait UsageLedger: Send + Sync {
    /// Units left for `account_id`. Unknown accounts have none.
    fn remaining(&self, account_id: &str) -> impl Future<Output = Result<i64, ScanError>> + Send;

    /// Atomically subtracts `units`, returning what is left.
    ///
    /// Fails with [`ScanError::InsufficientAllowance`] without deducting
    /// anything when fewer than `units` remain.
    fn deduct(
        &self,
        account_id: &str,
        units: i64,
    ) -> impl Future<Output = Result<i64, ScanError>> + Send;
}

impl<U: UsageLedger> UsageLedger for Arc<U> {
    fn remaining(&self, account_id: &str) -> impl Future<Output = Result<i64, ScanError>> + Send {
        U::remaining(self, account_id)
    }

    fn deduct(
        &self,
        account_id: &str,
        units: i64,
    ) -> impl Future<Output = Result<i64, ScanError>> + Send {
        U::deduct(self, account_id, units)
    }
}

#[derive(Debug, Default)]
pub struct MemoryUsageLedger {
    balances: Mutex<HashMap<String, i64>>,
}

impl MemoryUsageLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger seeded with a single account.
    #[must_use]
    pub fn with_allowance(account_id: impl Into<String>, units: i64) -> Self {
        let mut balances = HashMap::new();
        balances.insert(account_id.into(), units);
        Self {
            balances: Mutex::new(balances),
        }
    }

    pub async fn grant(&self, account_id: &str, units: i64) {
        *self
            .balances
            .lock()
            .await
            .entry(account_id.to_string())
            .or_insert(0) += units;
    }
}

impl UsageLedger for MemoryUsageLedger {
    async fn remaining(&self, account_id: &str) -> Result<i64, ScanError> {
        Ok(self
            .balances
            .lock()
            .await
            .get(account_id)
            .copied()
            .unwrap_or(0))
    }

    async fn deduct(&self, account_id: &str, units: i64) -> Result<i64, ScanError> {
        let mut balances = self.balances.lock().await;
        let remaining = balances.get(account_id).copied().unwrap_or(0);
        if remaining < units {
            return Err(ScanError::InsufficientAllowance {
                account_id: account_id.to_string(),
                remaining,
            });
        }
        let left = remaining - units;
        balances.insert(account_id.to_string(), left);
        Ok(left)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deduct_reduces_balance() {
        let ledger = MemoryUsageLedger::with_allowance("acct", 2);
        assert_eq!(ledger.deduct("acct", 1).await.unwrap(), 1);
        assert_eq!(ledger.remaining("acct").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn deduct_refuses_overdraft() {
        let ledger = MemoryUsageLedger::with_allowance("acct", 0);
        let err = ledger.deduct("acct", 1).await.unwrap_err();
        assert!(matches!(
            err,
            ScanError::InsufficientAllowance { remaining: 0, .. }
        ));
        assert_eq!(ledger.remaining("acct").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_account_has_nothing_until_granted() {
        let ledger = MemoryUsageLedger::new();
        assert_eq!(ledger.remaining("new").await.unwrap(), 0);
        ledger.grant("new", 3).await;
        assert_eq!(ledger.remaining("new").await.unwrap(), 3);
    }
}
