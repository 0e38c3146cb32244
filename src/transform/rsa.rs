//! Raw (unpadded) RSA block decryption transform.
//!
//! Models the Tibia/Forgotten Server handshake (spec §4.4's rationale): the
//! login packet carries an RSA-sealed XTEA session key at a fixed offset.
//! No ecosystem crate implements unpadded RSA over a caller-supplied
//! `(d, n)` pair, so the modular exponentiation is written directly against
//! `num-bigint`.

use byteorder::{ByteOrder, LittleEndian};
use num_bigint::BigUint;
use num_traits::Zero;
use serde::Deserialize;

use super::{Transform, TransformContext};
use crate::value::Value;

const DEFAULT_BLOCK_LEN: usize = 128;

#[derive(Debug, Default, Deserialize)]
struct RsaOptions {
    /// Hex-encoded private exponent `d`.
    d: Option<String>,
    /// Hex-encoded modulus `n`.
    n: Option<String>,
    /// Byte offset of the sealed block within the message. Defaults to 0.
    #[serde(default)]
    offset: usize,
    /// Block length in bytes. Defaults to 128 (1024-bit modulus).
    block_len: Option<usize>,
    /// Transform-context key the decrypted block's first 16 bytes (read as
    /// four little-endian `u32` words) are stashed under, for a later XTEA
    /// stage to pick up as its session key.
    xtea_key_output: Option<String>,
}

/// Decrypts one fixed-length big-endian block per message with a private
/// RSA key: `m = c^d mod n`. Identity whenever the key is missing, the
/// input is too short, or the stored key fails to parse — per spec §4.4
/// the transform is "stateful only through the context; its identity
/// applies on any exception".
pub struct RawRsaTransform {
    key: Option<(BigUint, BigUint)>,
    offset: usize,
    block_len: usize,
    xtea_key_output: Option<String>,
}

impl RawRsaTransform {
    pub fn new(
        key: Option<(BigUint, BigUint)>,
        offset: usize,
        block_len: usize,
        xtea_key_output: Option<String>,
    ) -> Self {
        RawRsaTransform {
            key,
            offset,
            block_len,
            xtea_key_output,
        }
    }

    pub fn from_options(options: &serde_json::Value) -> Self {
        let opts: RsaOptions = serde_json::from_value(options.clone()).unwrap_or_default();
        let key = match (opts.d.as_deref(), opts.n.as_deref()) {
            (Some(d), Some(n)) => parse_hex_biguint(d).zip(parse_hex_biguint(n)),
            _ => None,
        };
        RawRsaTransform::new(
            key,
            opts.offset,
            opts.block_len.unwrap_or(DEFAULT_BLOCK_LEN),
            opts.xtea_key_output,
        )
    }
}

fn parse_hex_biguint(s: &str) -> Option<BigUint> {
    let bytes = hex::decode(s.trim_start_matches("0x")).ok()?;
    Some(BigUint::from_bytes_be(&bytes))
}

/// Left-pad `value`'s big-endian representation to exactly `len` bytes.
fn to_fixed_be(value: &BigUint, len: usize) -> Vec<u8> {
    let raw = value.to_bytes_be();
    if raw.len() >= len {
        return raw[raw.len() - len..].to_vec();
    }
    let mut out = vec![0u8; len - raw.len()];
    out.extend_from_slice(&raw);
    out
}

impl Transform for RawRsaTransform {
    fn name(&self) -> &str {
        "raw_rsa"
    }

    fn apply(&self, input: &[u8], ctx: &mut TransformContext) -> Vec<u8> {
        let Some((d, n)) = &self.key else {
            tracing::warn!("raw_rsa transform has no configured key, passing input through");
            return input.to_vec();
        };
        if input.len() < self.offset + self.block_len {
            tracing::warn!(
                len = input.len(),
                needed = self.offset + self.block_len,
                "raw_rsa input too short for declared block, passing through"
            );
            return input.to_vec();
        }

        if n.is_zero() {
            tracing::warn!("raw_rsa modulus is zero, passing input through");
            return input.to_vec();
        }
        let c = BigUint::from_bytes_be(&input[self.offset..self.offset + self.block_len]);
        let m = c.modpow(d, n);
        let decrypted = to_fixed_be(&m, self.block_len);

        if let Some(name) = &self.xtea_key_output {
            if decrypted.len() >= 16 {
                let words: Vec<Value> = (0..4)
                    .map(|i| Value::U64(LittleEndian::read_u32(&decrypted[i * 4..i * 4 + 4]) as u64))
                    .collect();
                ctx.insert(name.clone(), Value::Bytes(decrypted[..16].to_vec()));
                // Also expose the word-split form, in case a consumer prefers it.
                ctx.insert(format!("{name}_words"), Value::List(words));
            }
        }

        let mut out = input.to_vec();
        out[self.offset..self.offset + self.block_len].copy_from_slice(&decrypted);
        out
    }
}
