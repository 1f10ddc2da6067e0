// File: testing-framework/src/chain/mod.rs
//
// Synthetic Chain Construction
//
// Block encoding plus the builder that mines light and oversized blocks on a
// node under the shared virtual clock.

/// Block, header and coinbase encoding
pub mod block;
/// Mining driver
pub mod builder;

pub use block::{
    block_subsidy, decode_block, decode_block_hex, serialized_block_size, Block, BlockHash,
    BlockHeader, DecodeError, DecodedBlock, PayloadKind, DEFAULT_LARGE_PAYLOAD,
    MAX_BLOCK_SERIALIZED_SIZE, REGTEST_BITS,
};
pub use builder::{ChainBuilder, DEFAULT_BLOCK_SPACING};
