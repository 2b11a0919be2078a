//! ChainReader is the interface the pipeline uses to read blocks, transactions and
//! reference metadata from the chain node.
//! The trait keeps the indexer independent from the transport, so tests can drive the
//! whole pipeline with a scripted node.

use explorer_primitives::{
    AccountRecord, BlockHeight, BlockView, GovProposalRefresh, IbcChannelKey, IbcChannelRecord,
    MarkerRecord, SmCodeRecord, SmContractRecord, StakingValidatorRecord, ValidatorSetEntry,
};

mod grpc_gateway;

pub use grpc_gateway::GrpcGatewayClient;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    /// Transport failure, timeout or server error that survived the retries
    #[error("chain node unavailable: {0}")]
    Unavailable(String),
    /// The node answered with something the indexer cannot use
    #[error("unexpected response from chain node: {0}")]
    Malformed(String),
}

impl ChainError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Unavailable(_))
    }
}

pub type ChainResult<T> = Result<T, ChainError>;

/// Every lookup returns `Ok(None)` when the node does not know the entity.
pub trait ChainReader {
    fn latest_height(&self) -> impl std::future::Future<Output = ChainResult<BlockHeight>> + Send;

    fn block(
        &self,
        height: BlockHeight,
    ) -> impl std::future::Future<Output = ChainResult<Option<BlockView>>> + Send;

    /// Raw transaction responses of the block in block order.
    /// Fails unless exactly `expected_count` transactions are returned.
    fn transactions(
        &self,
        height: BlockHeight,
        expected_count: usize,
    ) -> impl std::future::Future<Output = ChainResult<Vec<serde_json::Value>>> + Send;

    fn validator_set(
        &self,
        height: BlockHeight,
    ) -> impl std::future::Future<Output = ChainResult<Option<Vec<ValidatorSetEntry>>>> + Send;

    fn account(
        &self,
        address: &str,
        height: BlockHeight,
    ) -> impl std::future::Future<Output = ChainResult<Option<AccountRecord>>> + Send;

    fn staking_validator(
        &self,
        operator_address: &str,
        height: BlockHeight,
    ) -> impl std::future::Future<Output = ChainResult<Option<StakingValidatorRecord>>> + Send;

    /// Marker detail with its current bank supply
    fn marker(
        &self,
        denom: &str,
        height: BlockHeight,
    ) -> impl std::future::Future<Output = ChainResult<Option<MarkerRecord>>> + Send;

    fn sm_code(
        &self,
        code_id: u64,
        height: BlockHeight,
    ) -> impl std::future::Future<Output = ChainResult<Option<SmCodeRecord>>> + Send;

    fn sm_contract(
        &self,
        contract_address: &str,
        height: BlockHeight,
    ) -> impl std::future::Future<Output = ChainResult<Option<SmContractRecord>>> + Send;

    fn ibc_channel(
        &self,
        channel: &IbcChannelKey,
    ) -> impl std::future::Future<Output = ChainResult<Option<IbcChannelRecord>>> + Send;

    fn gov_proposal(
        &self,
        proposal_id: u64,
    ) -> impl std::future::Future<Output = ChainResult<Option<GovProposalRefresh>>> + Send;
}
