//! hash functions shared by the host side and generated code.
//!
//! `mix64` scrambles a single 64-bit word; `combine` folds a second hash into a first.  Tuple hashes start from
//! the first member's hash and combine each following member into it.  The `emit_*` functions produce the
//! exact same arithmetic as IR, so a hash computed by generated code matches one computed here.

use crate::codegen::ir::{BinOp, IrType, ValueId};
use crate::codegen::FunctionBuilder;

const MIX_C1: u64 = 0xff51_afd7_ed55_8ccd;
const MIX_C2: u64 = 0xc4ce_b9fe_1a85_ec53;
const COMBINE_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// The hash of SQL NULL, whatever its type.
pub const NULL_HASH: u64 = 0x2d35_8dcc_aa6c_78a5;

pub fn mix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(MIX_C1);
    k ^= k >> 33;
    k = k.wrapping_mul(MIX_C2);
    k ^= k >> 33;
    k
}

/// host side reference for `emit_combine`.
#[cfg(test)]
pub fn combine(h1: u64, h2: u64) -> u64 {
    h1 ^ h2
        .wrapping_add(COMBINE_SEED)
        .wrapping_add(h1 << 6)
        .wrapping_add(h1 >> 2)
}

/// FNV-1a over the bytes, finished with `mix64`.
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        h ^= *b as u64;
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    mix64(h)
}

fn emit_xor_shift(fb: &mut FunctionBuilder, k: ValueId, shift: i64) -> ValueId {
    let amount = fb.const_int(IrType::I64, shift);
    let shifted = fb.binary(BinOp::LShr, k, amount);
    fb.binary(BinOp::Xor, k, shifted)
}

/// emits `mix64` of an `I64` value.
pub fn emit_mix64(fb: &mut FunctionBuilder, k: ValueId) -> ValueId {
    let k = emit_xor_shift(fb, k, 33);
    let c1 = fb.const_int(IrType::I64, MIX_C1 as i64);
    let k = fb.binary(BinOp::Mul, k, c1);
    let k = emit_xor_shift(fb, k, 33);
    let c2 = fb.const_int(IrType::I64, MIX_C2 as i64);
    let k = fb.binary(BinOp::Mul, k, c2);
    emit_xor_shift(fb, k, 33)
}

/// emits `combine` of two `I64` hashes.
pub fn emit_combine(fb: &mut FunctionBuilder, h1: ValueId, h2: ValueId) -> ValueId {
    let seed = fb.const_int(IrType::I64, COMBINE_SEED as i64);
    let six = fb.const_int(IrType::I64, 6);
    let two = fb.const_int(IrType::I64, 2);
    let shl = fb.binary(BinOp::Shl, h1, six);
    let shr = fb.binary(BinOp::LShr, h1, two);
    let sum = fb.binary(BinOp::Add, h2, seed);
    let sum = fb.binary(BinOp::Add, sum, shl);
    let sum = fb.binary(BinOp::Add, sum, shr);
    fb.binary(BinOp::Xor, h1, sum)
}

#[test]
fn test_mix64_spreads_small_keys() {
    let hashes: std::collections::BTreeSet<u64> = (0..1000u64).map(mix64).collect();
    assert_eq!(hashes.len(), 1000);
    assert_eq!(mix64(0), 0);
    // Consecutive keys must not land in consecutive buckets of a small table.
    let low_bits: std::collections::BTreeSet<u64> = (0..64u64).map(|k| mix64(k) & 15).collect();
    assert!(low_bits.len() > 8);
}

#[test]
fn test_emitted_combine_matches_combine() {
    use crate::sql_value::eval_to_word;
    let pairs = [(mix64(1), mix64(2)), (mix64(2), mix64(1)), (0, u64::MAX), (NULL_HASH, 7)];
    for (a, b) in pairs {
        let got = eval_to_word(IrType::I64, |fb| {
            let a = fb.const_int(IrType::I64, a as i64);
            let b = fb.const_int(IrType::I64, b as i64);
            Ok(emit_combine(fb, a, b))
        });
        assert_eq!(got, combine(a, b), "{:x} {:x}", a, b);
    }
    assert_ne!(combine(mix64(1), mix64(2)), combine(mix64(2), mix64(1)));
}

#[test]
fn test_hash_bytes() {
    assert_eq!(hash_bytes(b"abc"), hash_bytes(b"abc"));
    assert_ne!(hash_bytes(b"abc"), hash_bytes(b"abd"));
    assert_ne!(hash_bytes(b""), hash_bytes(b"\0"));
}
