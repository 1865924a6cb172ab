//! Wallet users and their transactions.
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub wallet_balance: i64,
}

crate::entity!(User, "users");

impl User {
    /// Balance after crediting `amount`. A sum that does not fit is an
    /// invalid amount.
    pub fn credited(&self, amount: i64) -> crate::Result<i64> {
        self.wallet_balance
            .checked_add(amount)
            .ok_or(crate::Error::InvalidAmount(amount))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub amount: i64,
    pub kind: TransactionKind,
    pub created_at: String,
}

crate::entity!(Transaction, "transactions");

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    TopUp,
    Purchase,
    Refund,
}

/// Body of a wallet top-up request.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct WalletTopUp {
    pub amount: i64,
}

impl WalletTopUp {
    pub fn new(amount: i64) -> crate::Result<Self> {
        if amount <= 0 {
            return Err(crate::Error::InvalidAmount(amount));
        }
        Ok(Self { amount })
    }
}
