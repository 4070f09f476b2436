//! Execution signatures: a 32-bit fingerprint of the ordered branches of one run.
//!
//! The fingerprint is an identity key for deduplicating paths. It is not
//! collision resistant.
use crate::branch::BranchTarget;
use crate::tracker::RunRecord;

pub const SIGNATURE_SEED: u32 = 0x726f_7373;

/// Stand-in for the offset of a branch whose target could not be decoded.
pub const UNKNOWN_TARGET_BYTES: [u8; 8] = [0xff; 8];

/// MurmurHash2 of the empty input under [`SIGNATURE_SEED`].
pub const EMPTY_INPUT_HASH: u32 = 0x6fcd_7333;

/// 32-bit MurmurHash2 by Austin Appleby (public domain).
pub fn murmur_hash2(data: &[u8], seed: u32) -> u32 {
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    // the reference implementation takes an `int` length
    let mut h = seed ^ (data.len() as u32);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);

        h = h.wrapping_mul(M);
        h ^= k;
    }

    // cascading tail: 3 bytes also mixes in bytes 2 and 1, 2 bytes also mixes in byte 1
    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= u32::from(tail[2]) << 16;
    }
    if tail.len() >= 2 {
        h ^= u32::from(tail[1]) << 8;
    }
    if !tail.is_empty() {
        h ^= u32::from(tail[0]);
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

/// The three per-stream hashes a signature is folded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubHashes {
    pub sources: u32,
    pub mnemonics: u32,
    pub targets: u32,
}

impl SubHashes {
    fn to_le_bytes(self) -> [u8; 12] {
        let mut out = [0; 12];
        out[..4].copy_from_slice(&self.sources.to_le_bytes());
        out[4..8].copy_from_slice(&self.mnemonics.to_le_bytes());
        out[8..].copy_from_slice(&self.targets.to_le_bytes());
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub value: u32,
    pub parts: SubHashes,
}

/// Folds a [`RunRecord`] into a [`Signature`].
///
/// Addresses enter the hash as `reference - address` (wrapping), eight bytes
/// little-endian each, so the signature does not depend on where the image was
/// loaded as long as `reference` is the region base.
#[derive(Debug, Clone, Copy)]
pub struct SignatureComputer {
    reference: u64,
    seed: u32,
}

impl SignatureComputer {
    pub fn new(reference: u64) -> Self {
        Self {
            reference,
            seed: SIGNATURE_SEED,
        }
    }

    #[inline]
    fn offset_bytes(&self, addr: u64) -> [u8; 8] {
        self.reference.wrapping_sub(addr).to_le_bytes()
    }

    pub fn sub_hashes(&self, record: &RunRecord) -> SubHashes {
        if record.is_empty() {
            return SubHashes {
                sources: EMPTY_INPUT_HASH,
                mnemonics: EMPTY_INPUT_HASH,
                targets: EMPTY_INPUT_HASH,
            };
        }

        let branches = record.branches();
        let mut sources = Vec::with_capacity(branches.len() * 8);
        let mut mnemonics = String::new();
        let mut targets = Vec::with_capacity(branches.len() * 8);
        for branch in branches {
            sources.extend_from_slice(&self.offset_bytes(branch.source));
            mnemonics.push_str(&branch.mnemonic);
            match branch.target {
                BranchTarget::Direct(addr) => targets.extend_from_slice(&self.offset_bytes(addr)),
                BranchTarget::Unknown => targets.extend_from_slice(&UNKNOWN_TARGET_BYTES),
            }
        }

        SubHashes {
            sources: murmur_hash2(&sources, self.seed),
            mnemonics: murmur_hash2(mnemonics.as_bytes(), self.seed),
            targets: murmur_hash2(&targets, self.seed),
        }
    }

    pub fn finalize(&self, record: &RunRecord) -> Signature {
        let parts = self.sub_hashes(record);
        Signature {
            value: murmur_hash2(&parts.to_le_bytes(), self.seed),
            parts,
        }
    }
}
