//! Registration marks derived algorithmically from the ICAO address.
//!
//! Two national blocks are allocated in a way that lets the tail number be
//! computed rather than looked up: the US civil block (N-numbers) and the
//! Australian VH- block.

use crate::types::{icao_to_u32, Icao};

const US_FIRST: u32 = 0xA00001;
const US_LAST: u32 = 0xADF7C7;

/// N-number letters skip I and O.
const US_LETTERS: &[u8; 24] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const DIGITS: &[u8; 10] = b"0123456789";

// Size of each subtree in the N-number allocation. A suffix block is the
// empty suffix, 24 single letters and 24 * 24 two-letter pairs.
const SUFFIX_BLOCK: u32 = 1 + 24 * 25;
const DEPTH4: u32 = 1 + 24 + 10;
const DEPTH3: u32 = 10 * DEPTH4 + SUFFIX_BLOCK;
const DEPTH2: u32 = 10 * DEPTH3 + SUFFIX_BLOCK;
const DEPTH1: u32 = 10 * DEPTH2 + SUFFIX_BLOCK;

const AU_FIRST: u32 = 0x7C0000;
const AU_LAST: u32 = 0x7C822D;
const AU_CHARS: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Registration for an ICAO address, when it falls in a computable block.
pub fn registration(icao: &Icao) -> Option<String> {
    let addr = icao_to_u32(icao);
    us_n_number(addr).or_else(|| au_registration(addr))
}

/// US civil N-number, e.g. `A00001` -> `N1`.
pub fn us_n_number(addr: u32) -> Option<String> {
    if !(US_FIRST..=US_LAST).contains(&addr) {
        return None;
    }
    let offset = addr - US_FIRST;
    let mut out = String::with_capacity(6);
    out.push('N');

    // first digit is 1-9, later ones 0-9
    out.push(char::from(b'1' + (offset / DEPTH1) as u8));
    let mut rem = offset % DEPTH1;

    for depth in [DEPTH2, DEPTH3, DEPTH4] {
        if rem < SUFFIX_BLOCK {
            push_letter_suffix(&mut out, rem);
            return Some(out);
        }
        rem -= SUFFIX_BLOCK;
        out.push(char::from(DIGITS[(rem / depth) as usize]));
        rem %= depth;
    }

    // fifth position: nothing, a letter or a digit
    if rem > 0 {
        let idx = (rem - 1) as usize;
        let c = US_LETTERS.get(idx).or_else(|| DIGITS.get(idx - US_LETTERS.len()))?;
        out.push(char::from(*c));
    }
    Some(out)
}

fn push_letter_suffix(out: &mut String, rem: u32) {
    if rem == 0 {
        return;
    }
    let first = (rem - 1) / 25;
    let second = (rem - 1) % 25;
    out.push(char::from(US_LETTERS[first as usize]));
    if second > 0 {
        out.push(char::from(US_LETTERS[(second - 1) as usize]));
    }
}

/// Australian VH- mark, three base-36 characters counted from `7C0000`.
pub fn au_registration(addr: u32) -> Option<String> {
    if !(AU_FIRST..=AU_LAST).contains(&addr) {
        return None;
    }
    let offset = (addr - AU_FIRST) as usize;
    let chars = [offset / (36 * 36), (offset / 36) % 36, offset % 36];
    let mut out = String::from("VH-");
    out.extend(chars.iter().map(|&i| char::from(AU_CHARS[i])));
    Some(out)
}
