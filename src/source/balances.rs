//! Latest balances reported by a decoder, served as a `BalanceReader`

use super::{BalanceReader, SourceError};
use crate::types::{Address, Payment};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BalanceKey {
    Native(Address),
    Withdrawable(Address),
    Token { token: Address, holder: Address },
}

impl std::fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalanceKey::Native(account) => write!(f, "native balance of {}", account),
            BalanceKey::Withdrawable(oracle) => write!(f, "withdrawable of {}", oracle),
            BalanceKey::Token { token, holder } => {
                write!(f, "token {} balance of {}", token, holder)
            }
        }
    }
}

/// Last value seen per balance; reads never block on the chain
#[derive(Default)]
pub struct BalanceBook {
    values: RwLock<HashMap<BalanceKey, Payment>>,
}

impl BalanceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: BalanceKey, amount: Payment) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, amount);
    }

    pub fn get(&self, key: &BalanceKey) -> Result<Payment, SourceError> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .ok_or_else(|| SourceError::Unavailable(key.to_string()))
    }
}

#[async_trait]
impl BalanceReader for BalanceBook {
    async fn native_balance(&self, account: Address) -> Result<Payment, SourceError> {
        self.get(&BalanceKey::Native(account))
    }

    async fn withdrawable(&self, oracle: Address) -> Result<Payment, SourceError> {
        self.get(&BalanceKey::Withdrawable(oracle))
    }

    async fn token_balance(&self, token: Address, holder: Address) -> Result<Payment, SourceError> {
        self.get(&BalanceKey::Token { token, holder })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::U256;

    #[tokio::test]
    async fn test_latest_value_wins() {
        let book = BalanceBook::new();
        let node = Address::from([1; 20]);

        assert!(matches!(
            book.native_balance(node).await,
            Err(SourceError::Unavailable(_))
        ));

        book.record(BalanceKey::Native(node), U256::from(5u64));
        book.record(BalanceKey::Native(node), U256::from(7u64));
        assert_eq!(book.native_balance(node).await.unwrap(), U256::from(7u64));
    }

    #[tokio::test]
    async fn test_token_balance_keyed_by_token_and_holder() {
        let book = BalanceBook::new();
        let link = Address::from([2; 20]);
        let oracle = Address::from([3; 20]);

        book.record(BalanceKey::Token { token: link, holder: oracle }, U256::exp10(18));
        book.record(BalanceKey::Withdrawable(oracle), U256::from(9u64));

        assert_eq!(book.token_balance(link, oracle).await.unwrap(), U256::exp10(18));
        assert!(book.token_balance(oracle, link).await.is_err());
        assert_eq!(book.withdrawable(oracle).await.unwrap(), U256::from(9u64));
    }
}
