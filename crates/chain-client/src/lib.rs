//! Chain interface: router/coordinator/client contract calls, request-id hashing, and
//! commitment ABI encoding. The one bit-exact surface of this system: byte layouts here
//! must match the on-chain ABI exactly.

pub mod abi;
pub mod error;
pub mod ids;
pub mod mock;
pub mod provider;
pub mod traits;

pub use abi::{encode_commitment, Commitment as AbiCommitment, InputType, RequestStarted};
pub use error::{ChainError, Result, NO_NEXT_INTERVAL_SELECTOR};
pub use ids::{container_id_hash, priority_seed, request_id};
pub use mock::MockChainClient;
pub use provider::{connect_http, AlloyChainClient};
pub use traits::{ChainClient, ClientChain, CoordinatorChain, RouterChain};
