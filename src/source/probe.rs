use super::{ContractProbe, SourceError};
use crate::types::Address;
use async_trait::async_trait;
use std::collections::HashSet;

/// Probe answering from configuration instead of contract calls
///
/// The oracle is confirmed only for the configured address. Aggregators are confirmed when
/// listed; an empty list accepts every requester.
pub struct AllowlistProbe {
    oracle: Address,
    aggregators: HashSet<Address>,
}

impl AllowlistProbe {
    pub fn new(oracle: Address, aggregators: impl IntoIterator<Item = Address>) -> Self {
        Self {
            oracle,
            aggregators: aggregators.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ContractProbe for AllowlistProbe {
    async fn is_aggregator(&self, address: Address) -> Result<bool, SourceError> {
        Ok(self.aggregators.is_empty() || self.aggregators.contains(&address))
    }

    async fn is_oracle(&self, address: Address) -> Result<bool, SourceError> {
        Ok(address == self.oracle)
    }
}
