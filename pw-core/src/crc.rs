//! CRC-24 parity for Mode S messages.
//!
//! Generator 0xFFF409. For DF11/17/18 the trailing 24 bits are the plain
//! parity, so a clean frame leaves a zero residual. DF0/4/5/16/20/21
//! overlay the parity with the aircraft address, so the residual *is*
//! the ICAO address.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::types::{icao_from_u32, Icao};

const GENERATOR: u32 = 0xFFF409;

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 16;
        let mut bit = 0;
        while bit < 8 {
            if crc & 0x800000 != 0 {
                crc = (crc << 1) ^ GENERATOR;
            } else {
                crc <<= 1;
            }
            crc &= 0xFFFFFF;
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u32; 256] = build_crc_table();

/// Polynomial division of the payload XOR'd with the trailing parity field.
///
/// Zero for a clean DF11/17/18 frame, the ICAO address for
/// address/parity formats.
pub fn residual(data: &[u8]) -> u32 {
    if data.len() <= 3 {
        return data.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32) & 0xFFFFFF;
    }
    let payload_len = data.len() - 3;
    let mut crc = 0u32;
    for &byte in &data[..payload_len] {
        crc = ((crc << 8) ^ CRC_TABLE[((crc >> 16) ^ byte as u32) as usize & 0xFF]) & 0xFFFFFF;
    }
    crc ^ ((data[payload_len] as u32) << 16
        | (data[payload_len + 1] as u32) << 8
        | data[payload_len + 2] as u32)
}

/// ICAO address recovered from the parity of an address/parity frame.
pub fn residual_icao(data: &[u8]) -> Icao {
    icao_from_u32(residual(data))
}

// Syndrome -> flipped bit positions, for 1 and 2 bit errors.
fn build_syndrome_table(n_bytes: usize) -> HashMap<u32, Vec<usize>> {
    let n_bits = n_bytes * 8;
    let mut table = HashMap::new();
    let mut msg = vec![0u8; n_bytes];

    for bit in 0..n_bits {
        msg[bit / 8] ^= 1 << (7 - (bit % 8));
        table.entry(residual(&msg)).or_insert_with(|| vec![bit]);
        for bit2 in (bit + 1)..n_bits {
            msg[bit2 / 8] ^= 1 << (7 - (bit2 % 8));
            table.entry(residual(&msg)).or_insert_with(|| vec![bit, bit2]);
            msg[bit2 / 8] ^= 1 << (7 - (bit2 % 8));
        }
        msg[bit / 8] ^= 1 << (7 - (bit % 8));
    }
    table
}

static SYNDROME_LONG: LazyLock<HashMap<u32, Vec<usize>>> =
    LazyLock::new(|| build_syndrome_table(14));
static SYNDROME_SHORT: LazyLock<HashMap<u32, Vec<usize>>> =
    LazyLock::new(|| build_syndrome_table(7));

/// Correct up to two flipped bits in a frame whose parity should be zero.
///
/// The DF field (first 5 bits) is never touched so a repair can not turn
/// one message kind into another. Returns the repaired bytes, or `None`
/// when the syndrome is unknown.
pub fn try_fix(data: &[u8]) -> Option<Vec<u8>> {
    let syndrome = residual(data);
    if syndrome == 0 {
        return Some(data.to_vec());
    }
    let table = match data.len() {
        14 => &*SYNDROME_LONG,
        7 => &*SYNDROME_SHORT,
        _ => return None,
    };
    let bits = table.get(&syndrome)?;
    if bits.iter().any(|&b| b < 5) {
        return None;
    }
    let mut fixed = data.to_vec();
    for &bit in bits {
        fixed[bit / 8] ^= 1 << (7 - (bit % 8));
    }
    (residual(&fixed) == 0).then_some(fixed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::hex_decode;

    const VALID_FRAMES: &[&str] = &[
        "8D4840D6202CC371C32CE0576098",
        "8D40621D58C382D690C8AC2863A7",
        "8D485020994409940838175B284F",
    ];

    #[test]
    fn test_crc_table_entry_zero() {
        assert_eq!(CRC_TABLE[0], 0);
        assert_ne!(CRC_TABLE[1], 0);
    }

    #[test]
    fn test_valid_df17_residual_zero() {
        for hex in VALID_FRAMES {
            let data = hex_decode(hex).unwrap();
            assert_eq!(residual(&data), 0, "residual should be 0 for {hex}");
        }
    }

    #[test]
    fn test_corrupted_residual_nonzero() {
        let mut data = hex_decode(VALID_FRAMES[0]).unwrap();
        data[5] ^= 0x01;
        assert_ne!(residual(&data), 0);
    }

    #[test]
    fn test_residual_icao_address_parity() {
        // DF0 and DF5 replies from 7C7DAA
        let df0 = hex_decode("0005050870B303").unwrap();
        assert_eq!(residual_icao(&df0), [0x7C, 0x7D, 0xAA]);
        let df5 = hex_decode("28000A00307264").unwrap();
        assert_eq!(residual_icao(&df5), [0x7C, 0x7D, 0xAA]);
    }

    #[test]
    fn test_residual_df11_interrogator_code() {
        let clean = hex_decode("5D7C7DAACD3CE9").unwrap();
        assert_eq!(residual(&clean), 0);
        // II/SI code in the low 7 bits
        let with_ii = hex_decode("5D48C234182715").unwrap();
        assert_eq!(residual(&with_ii), 0x35);
    }

    #[test]
    fn test_try_fix_already_valid() {
        let data = hex_decode(VALID_FRAMES[0]).unwrap();
        assert_eq!(try_fix(&data).unwrap(), data);
    }

    #[test]
    fn test_try_fix_single_bit_error() {
        let good = hex_decode(VALID_FRAMES[0]).unwrap();
        let mut bad = good.clone();
        bad[5] ^= 0x01;
        assert_eq!(try_fix(&bad).unwrap(), good);
    }

    #[test]
    fn test_try_fix_double_bit_error() {
        let good = hex_decode(VALID_FRAMES[1]).unwrap();
        let mut bad = good.clone();
        bad[6] ^= 0x10;
        bad[9] ^= 0x02;
        assert_eq!(try_fix(&bad).unwrap(), good);
    }

    #[test]
    fn test_try_fix_df_field_protection() {
        let mut data = hex_decode(VALID_FRAMES[0]).unwrap();
        data[0] ^= 0x80;
        assert!(try_fix(&data).is_none());
    }
}
