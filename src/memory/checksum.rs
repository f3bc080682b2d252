//! Header validation.
//!
//! A pointer handed to `release` or `reallocate` is only trusted after
//! its header passes validation. The scheme is pluggable: the contract is
//! just "reject with `InvalidPointer` on mismatch", so a pool can be built
//! with a stronger function than the default XOR seal without changing
//! any operation's observable behavior.

use crate::memory::block::BlockHeader;

/// Constant folded into the default seal, as a cheap distinguisher from
/// uninitialized or zeroed pool bytes.
pub const MAGIC: u64 = 0xDEAD_BEEF;

/// Seals and verifies allocation headers.
pub trait Validator: Send {
    /// Derive the checksum stored in a header with the given `size` and
    /// `addr` fields.
    fn seal(&self, size: u64, addr: u64) -> u64;

    /// Check a header against its own stored fields.
    fn verify(&self, header: &BlockHeader) -> bool {
        self.seal(header.size, header.addr) == header.checksum
    }
}

/// Default scheme: `size ^ addr ^ MAGIC`.
///
/// Weak by construction; it catches accidental corruption and most stale
/// headers, not adversarial forgery.
#[derive(Debug, Default, Clone, Copy)]
pub struct XorValidator;

impl Validator for XorValidator {
    fn seal(&self, size: u64, addr: u64) -> u64 {
        size ^ addr ^ MAGIC
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_matches_its_own_verify() {
        let v = XorValidator;
        let header = BlockHeader {
            checksum: v.seal(100, 24),
            size: 100,
            addr: 24,
        };
        assert!(v.verify(&header));
    }

    #[test]
    fn single_field_bit_flip_is_rejected() {
        let v = XorValidator;
        let mut header = BlockHeader {
            checksum: v.seal(100, 24),
            size: 100,
            addr: 24,
        };
        header.size ^= 0x01;
        assert!(!v.verify(&header));
    }

    #[test]
    fn custom_scheme_plugs_in() {
        struct Crc;
        impl Validator for Crc {
            fn seal(&self, size: u64, addr: u64) -> u64 {
                // Any deterministic function of (size, addr) satisfies the
                // contract; this one just mixes harder than XOR.
                (size.wrapping_mul(0x9E37_79B9_7F4A_7C15)).rotate_left(17) ^ addr
            }
        }
        let v = Crc;
        let header = BlockHeader {
            checksum: v.seal(64, 0),
            size: 64,
            addr: 0,
        };
        assert!(v.verify(&header));
    }
}
