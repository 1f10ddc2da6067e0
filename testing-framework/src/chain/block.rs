//! Synthetic block construction
//!
//! Blocks carry a single coinbase transaction whose output script is either
//! a one-byte `OP_TRUE` (light) or `OP_RETURN` followed by a long run of
//! `OP_TRUE` (large). The large variant exists purely to consume the prune
//! budget of the node under test.
//!
//! Serialization follows the node's legacy (non-witness) wire format so the
//! hex produced here can be passed straight to `submitblock`.

use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Header version with the BIP9 top bits set
pub const BLOCK_VERSION: i32 = 0x2000_0000;
/// Compact difficulty target used by regtest
pub const REGTEST_BITS: u32 = 0x207f_ffff;
/// Largest block accepted by the node without witness data
pub const MAX_BLOCK_SERIALIZED_SIZE: usize = 1_000_000;
/// Regtest subsidy halving interval
pub const HALVING_INTERVAL: u64 = 150;
/// Base units per coin
pub const COIN: u64 = 100_000_000;
/// Default filler length for large coinbase scripts
pub const DEFAULT_LARGE_PAYLOAD: usize = 950_000;

const HEADER_SIZE: usize = 80;
const OP_0: u8 = 0x00;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_1: u8 = 0x51;
const OP_16: u8 = 0x60;
const OP_TRUE: u8 = OP_1;
const OP_RETURN: u8 = 0x6a;

/// Double SHA-256
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// 256-bit block hash stored in internal (little-endian) byte order
///
/// `Display` and `FromStr` use the reversed hex form nodes print.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    /// All-zero hash (previous hash of genesis)
    pub const ZERO: BlockHash = BlockHash([0u8; 32]);

    /// Wrap raw internal-order bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw internal-order bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Display-order hex string
    pub fn to_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }
}

impl FromStr for BlockHash {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| DecodeError::InvalidHash(s.to_string()))?;
        let mut array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| DecodeError::InvalidHash(s.to_string()))?;
        array.reverse();
        Ok(Self(array))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self.to_hex())
    }
}

/// Failure while decoding serialized block data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of data at offset {0}")]
    Truncated(usize),
    #[error("{0} trailing bytes after block")]
    Trailing(usize),
    #[error("unsupported block layout: {0}")]
    Unsupported(&'static str),
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("invalid block hash '{0}'")]
    InvalidHash(String),
}

/// Coinbase payload size class
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// Minimal output script, for quick height-only progression
    Light,
    /// Near-maximum output script, to consume prune budget
    Large,
}

impl PayloadKind {
    /// Output script for this payload; `large_len` is the `OP_TRUE` run length
    pub fn script_pubkey(&self, large_len: usize) -> Vec<u8> {
        match self {
            Self::Light => vec![OP_TRUE],
            Self::Large => {
                let mut script = Vec::with_capacity(large_len + 1);
                script.push(OP_RETURN);
                script.resize(large_len + 1, OP_TRUE);
                script
            }
        }
    }
}

/// Block reward at `height` under the regtest halving schedule
pub fn block_subsidy(height: u64) -> u64 {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= 64 {
        return 0;
    }
    (50 * COIN) >> halvings
}

fn write_compact_size(buf: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => buf.push(n as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&n.to_le_bytes());
        }
    }
}

/// Minimal little-endian script number encoding
fn script_num(value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    let mut v = value;
    while v > 0 {
        out.push((v & 0xff) as u8);
        v >>= 8;
    }
    if out.last().is_some_and(|b| b & 0x80 != 0) {
        out.push(0x00);
    }
    out
}

/// BIP34 height push followed by an `OP_1` pad (coinbase scripts need >= 2 bytes)
pub fn coinbase_script_sig(height: u64) -> Vec<u8> {
    let mut script = match height {
        0 => vec![OP_0],
        1..=16 => vec![OP_1 + (height as u8) - 1],
        _ => {
            let num = script_num(height);
            let mut push = Vec::with_capacity(num.len() + 1);
            push.push(num.len() as u8);
            push.extend_from_slice(&num);
            push
        }
    };
    script.push(OP_1);
    script
}

/// Height committed by a coinbase script signature, if it starts with a BIP34 push
pub fn parse_bip34_height(script_sig: &[u8]) -> Option<u64> {
    let first = *script_sig.first()?;
    match first {
        OP_0 => Some(0),
        OP_1..=OP_16 => Some((first - OP_1 + 1) as u64),
        1..=8 => {
            let len = first as usize;
            let data = script_sig.get(1..1 + len)?;
            if data.last().is_some_and(|b| b & 0x80 != 0) {
                // Negative numbers never encode a height
                return None;
            }
            Some(
                data.iter()
                    .rev()
                    .fold(0u64, |acc, b| (acc << 8) | (*b as u64)),
            )
        }
        _ if first >= OP_PUSHDATA1 => None,
        _ => None,
    }
}

/// Serialize a coinbase transaction paying the subsidy to `script_pubkey`
pub fn build_coinbase(height: u64, script_pubkey: &[u8]) -> Vec<u8> {
    let script_sig = coinbase_script_sig(height);
    let mut tx = Vec::with_capacity(script_pubkey.len() + 64);

    tx.extend_from_slice(&1i32.to_le_bytes());
    write_compact_size(&mut tx, 1);
    tx.extend_from_slice(&[0u8; 32]);
    tx.extend_from_slice(&u32::MAX.to_le_bytes());
    write_compact_size(&mut tx, script_sig.len() as u64);
    tx.extend_from_slice(&script_sig);
    tx.extend_from_slice(&u32::MAX.to_le_bytes());

    write_compact_size(&mut tx, 1);
    tx.extend_from_slice(&block_subsidy(height).to_le_bytes());
    write_compact_size(&mut tx, script_pubkey.len() as u64);
    tx.extend_from_slice(script_pubkey);

    tx.extend_from_slice(&0u32.to_le_bytes());
    tx
}

/// Expand compact `bits` into a big-endian 256-bit target
pub fn compact_to_target(bits: u32) -> [u8; 32] {
    let mut target = [0u8; 32];
    if bits & 0x0080_0000 != 0 {
        // Negative targets are unsatisfiable
        return target;
    }

    let exponent = (bits >> 24) as usize;
    let mut mantissa = bits & 0x007f_ffff;
    let exponent = if exponent < 3 {
        mantissa >>= 8 * (3 - exponent);
        3
    } else {
        exponent
    };
    if exponent > 34 {
        return [0xff; 32];
    }

    let bytes = [(mantissa >> 16) as u8, (mantissa >> 8) as u8, mantissa as u8];
    for (i, b) in bytes.iter().enumerate() {
        if let Some(idx) = (32 + i).checked_sub(exponent) {
            target[idx] = *b;
        }
    }
    target
}

/// Whether `hash` satisfies the proof-of-work target encoded in `bits`
pub fn hash_meets_target(hash: &BlockHash, bits: u32) -> bool {
    let mut big_endian = *hash.as_bytes();
    big_endian.reverse();
    big_endian <= compact_to_target(bits)
}

/// 80-byte block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_hash: BlockHash,
    pub merkle_root: BlockHash,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// Wire encoding
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(self.prev_hash.as_bytes());
        out[36..68].copy_from_slice(self.merkle_root.as_bytes());
        out[68..72].copy_from_slice(&self.time.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// Decode the first 80 bytes of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let raw = bytes
            .get(..HEADER_SIZE)
            .ok_or(DecodeError::Truncated(bytes.len()))?;
        let word = |at: usize| [raw[at], raw[at + 1], raw[at + 2], raw[at + 3]];
        let hash_at = |at: usize| {
            let mut h = [0u8; 32];
            h.copy_from_slice(&raw[at..at + 32]);
            BlockHash::from_bytes(h)
        };

        Ok(Self {
            version: i32::from_le_bytes(word(0)),
            prev_hash: hash_at(4),
            merkle_root: hash_at(36),
            time: u32::from_le_bytes(word(68)),
            bits: u32::from_le_bytes(word(72)),
            nonce: u32::from_le_bytes(word(76)),
        })
    }

    /// Double-SHA-256 of the encoded header
    pub fn hash(&self) -> BlockHash {
        BlockHash::from_bytes(double_sha256(&self.encode()))
    }

    /// Whether the header hash satisfies its own target
    pub fn has_valid_pow(&self) -> bool {
        hash_meets_target(&self.hash(), self.bits)
    }
}

/// A synthetic block extending a known tip
///
/// # Example
///
/// ```rust
/// use wallet_pruning_harness::chain::{Block, BlockHash, PayloadKind};
///
/// let script = PayloadKind::Light.script_pubkey(0);
/// let mut block = Block::new(1, BlockHash::ZERO, 1_296_689_202, &script);
/// block.solve();
/// assert!(block.header().has_valid_pow());
/// ```
#[derive(Debug, Clone)]
pub struct Block {
    height: u64,
    header: BlockHeader,
    coinbase: Vec<u8>,
}

impl Block {
    /// Build an unsolved block at `height` on top of `prev_hash`
    pub fn new(height: u64, prev_hash: BlockHash, time: u32, script_pubkey: &[u8]) -> Self {
        let coinbase = build_coinbase(height, script_pubkey);
        // Single transaction: the merkle root is the coinbase txid
        let merkle_root = BlockHash::from_bytes(double_sha256(&coinbase));

        Self {
            height,
            header: BlockHeader {
                version: BLOCK_VERSION,
                prev_hash,
                merkle_root,
                time,
                bits: REGTEST_BITS,
                nonce: 0,
            },
            coinbase,
        }
    }

    /// Height this block commits to
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Block header
    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    /// Header timestamp
    pub fn time(&self) -> u32 {
        self.header.time
    }

    /// Block hash
    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }

    /// Grind the nonce until the header meets its target
    ///
    /// Regtest targets accept about half of all hashes, so this returns
    /// after a handful of attempts. Returns the number of attempts.
    pub fn solve(&mut self) -> u64 {
        let mut attempts = 1;
        while !self.header.has_valid_pow() {
            self.header.nonce = self.header.nonce.wrapping_add(1);
            if self.header.nonce == 0 {
                // Exhausted the nonce space: bump the time like a miner would
                self.header.time = self.header.time.wrapping_add(1);
            }
            attempts += 1;
        }
        attempts
    }

    /// Serialized size in bytes
    pub fn size(&self) -> usize {
        HEADER_SIZE + 1 + self.coinbase.len()
    }

    /// Wire serialization
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        out.extend_from_slice(&self.header.encode());
        write_compact_size(&mut out, 1);
        out.extend_from_slice(&self.coinbase);
        out
    }

    /// Hex serialization, as expected by `submitblock`
    pub fn to_hex(&self) -> String {
        hex::encode(self.serialize())
    }
}

/// Serialized size of a block at `height` carrying `kind`
pub fn serialized_block_size(height: u64, kind: PayloadKind, large_len: usize) -> usize {
    let script = kind.script_pubkey(large_len);
    HEADER_SIZE + 1 + build_coinbase(height, &script).len()
}

/// A block decoded from its wire form
#[derive(Debug, Clone)]
pub struct DecodedBlock {
    /// Block header
    pub header: BlockHeader,
    /// Number of transactions
    pub tx_count: u64,
    /// Height from the coinbase BIP34 push, if present
    pub coinbase_height: Option<u64>,
    /// Whether the header merkle root matches the transactions
    pub merkle_matches: bool,
    /// Serialized size
    pub size: usize,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(DecodeError::Truncated(self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn compact_size(&mut self) -> Result<u64, DecodeError> {
        let first = self.take(1)?[0];
        Ok(match first {
            0xfd => u16::from_le_bytes([self.take(1)?[0], self.take(1)?[0]]) as u64,
            0xfe => {
                let b = self.take(4)?;
                u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64
            }
            0xff => {
                let b = self.take(8)?;
                let mut a = [0u8; 8];
                a.copy_from_slice(b);
                u64::from_le_bytes(a)
            }
            n => n as u64,
        })
    }

    fn var_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.compact_size()?;
        let len = usize::try_from(len).map_err(|_| DecodeError::Truncated(self.pos))?;
        self.take(len)
    }
}

/// Decode a coinbase-only block
///
/// Only the shapes produced by [`Block`] are understood: exactly one
/// transaction, one input, no witness data.
pub fn decode_block(bytes: &[u8]) -> Result<DecodedBlock, DecodeError> {
    let header = BlockHeader::decode(bytes)?;
    let mut reader = Reader {
        bytes,
        pos: HEADER_SIZE,
    };

    let tx_count = reader.compact_size()?;
    if tx_count != 1 {
        return Err(DecodeError::Unsupported("expected exactly one transaction"));
    }

    let tx_start = reader.pos;
    reader.take(4)?;
    if reader.compact_size()? != 1 {
        return Err(DecodeError::Unsupported("coinbase must have one input"));
    }
    reader.take(36)?;
    let script_sig = reader.var_bytes()?;
    reader.take(4)?;
    let outputs = reader.compact_size()?;
    for _ in 0..outputs {
        reader.take(8)?;
        reader.var_bytes()?;
    }
    reader.take(4)?;
    let tx_end = reader.pos;

    if reader.pos != bytes.len() {
        return Err(DecodeError::Trailing(bytes.len() - reader.pos));
    }

    let txid = BlockHash::from_bytes(double_sha256(&bytes[tx_start..tx_end]));

    Ok(DecodedBlock {
        header,
        tx_count,
        coinbase_height: parse_bip34_height(script_sig),
        merkle_matches: txid == header.merkle_root,
        size: bytes.len(),
    })
}

/// Decode a hex-encoded block
pub fn decode_block_hex(hex_block: &str) -> Result<DecodedBlock, DecodeError> {
    let bytes = hex::decode(hex_block.trim()).map_err(|e| DecodeError::InvalidHex(e.to_string()))?;
    decode_block(&bytes)
}
