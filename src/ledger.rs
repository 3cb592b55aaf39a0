// ============================================================================
// Balance Ledger
// ============================================================================
//
// Per-wallet balance store with atomic credit/debit and create-on-first-touch
// semantics: the first time a wallet is seen it is registered with a fixed
// starting credit. Wallet identifiers are case-insensitive and stored
// lowercased.
//
// The ledger carries its own lock because it is touched from more than one
// place: the settlement worker debits/credits on trades, the resolution sweep
// credits payouts, and balance endpoints read it directly. Every mutation is
// a single locked read-modify-write, so interleaved callers cannot lose
// updates or drive a balance negative.
//
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

use crate::errors::TradeError;
use crate::models::{now, Account};

#[derive(Debug)]
pub struct Ledger {
    accounts: Mutex<HashMap<String, Account>>,
    initial_balance: f64,
}

impl Ledger {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            initial_balance,
        }
    }

    fn normalize(wallet: &str) -> String {
        wallet.trim().to_lowercase()
    }

    /// Current balance, creating the account with the starting credit if this
    /// is the first touch.
    pub fn balance(&self, wallet: &str) -> f64 {
        let key = Self::normalize(wallet);
        let mut accounts = self.accounts.lock().unwrap();
        accounts
            .entry(key.clone())
            .or_insert_with(|| {
                info!(wallet = %key, credit = self.initial_balance, "account created on first touch");
                Account::new(&key, self.initial_balance)
            })
            .balance
    }

    /// True if the wallet has been seen before (does not create it).
    pub fn exists(&self, wallet: &str) -> bool {
        let key = Self::normalize(wallet);
        self.accounts.lock().unwrap().contains_key(&key)
    }

    /// Credit `amount` to the wallet and return the new balance. Creates the
    /// account (with the starting credit) if needed.
    pub fn credit(&self, wallet: &str, amount: f64) -> f64 {
        let key = Self::normalize(wallet);
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts
            .entry(key.clone())
            .or_insert_with(|| Account::new(&key, self.initial_balance));
        account.balance += amount;
        account.last_activity = now();
        account.balance
    }

    /// Debit `amount` from the wallet, failing with `InsufficientBalance` if
    /// the funds are not there. The check and the write happen under one
    /// lock, so a balance can never go negative.
    pub fn debit(&self, wallet: &str, amount: f64) -> Result<f64, TradeError> {
        let key = Self::normalize(wallet);
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts
            .entry(key.clone())
            .or_insert_with(|| Account::new(&key, self.initial_balance));
        if account.balance < amount {
            return Err(TradeError::InsufficientBalance(format!(
                "have {:.2}, need {:.2}",
                account.balance, amount
            )));
        }
        account.balance -= amount;
        account.last_activity = now();
        Ok(account.balance)
    }

    /// Snapshot of all accounts, for persistence.
    pub fn snapshot(&self) -> Vec<Account> {
        self.accounts.lock().unwrap().values().cloned().collect()
    }

    /// Restore accounts from a persisted snapshot.
    pub fn restore(&self, accounts: Vec<Account>) {
        let mut map = self.accounts.lock().unwrap();
        for account in accounts {
            map.insert(account.wallet.clone(), account);
        }
    }
}
