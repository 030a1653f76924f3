//! GF(2^8) arithmetic with the irreducible polynomial 0x11D, matching the
//! field Intel ISA-L (and this crate's teacher's `reed_solomon.h`/
//! `galois_field.h` ground truth) uses for erasure coding.

const GF_POLY: u16 = 0x11D;

fn build_tables() -> ([u8; 256], [u8; 256]) {
    let mut exp = [0u8; 256];
    let mut log = [0u8; 256];
    let mut x: u16 = 1;
    for i in 0..255usize {
        exp[i] = x as u8;
        log[x as usize] = i as u8;
        x <<= 1;
        if x & 0x100 != 0 {
            x ^= GF_POLY;
        }
    }
    exp[255] = exp[0];
    (exp, log)
}

struct Tables {
    exp: [u8; 256],
    log: [u8; 256],
}

fn tables() -> &'static Tables {
    use std::sync::OnceLock;
    static TABLES: OnceLock<Tables> = OnceLock::new();
    TABLES.get_or_init(|| {
        let (exp, log) = build_tables();
        Tables { exp, log }
    })
}

/// Multiply two elements of GF(2^8).
pub fn gf_mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    let t = tables();
    let sum = t.log[a as usize] as u16 + t.log[b as usize] as u16;
    t.exp[(sum % 255) as usize]
}

/// Divide `a` by `b` in GF(2^8). Panics if `b` is zero.
pub fn gf_div(a: u8, b: u8) -> u8 {
    assert!(b != 0, "division by zero in GF(2^8)");
    if a == 0 {
        return 0;
    }
    let t = tables();
    let diff = t.log[a as usize] as i32 - t.log[b as usize] as i32;
    let idx = ((diff % 255) + 255) % 255;
    t.exp[idx as usize]
}

/// Multiplicative inverse of `a` in GF(2^8). Panics if `a` is zero.
pub fn gf_inv(a: u8) -> u8 {
    gf_div(1, a)
}

/// `a` raised to `power` in GF(2^8).
pub fn gf_pow(a: u8, power: u32) -> u8 {
    if power == 0 {
        return 1;
    }
    if a == 0 {
        return 0;
    }
    let t = tables();
    let e = (t.log[a as usize] as u32 * power) % 255;
    t.exp[e as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_by_zero_is_zero() {
        assert_eq!(gf_mul(0, 42), 0);
        assert_eq!(gf_mul(42, 0), 0);
    }

    #[test]
    fn mul_by_one_is_identity() {
        for a in 1..=255u8 {
            assert_eq!(gf_mul(a, 1), a);
        }
    }

    #[test]
    fn div_undoes_mul() {
        for a in 1..=255u8 {
            for b in 1..=255u8 {
                let product = gf_mul(a, b);
                assert_eq!(gf_div(product, b), a);
            }
        }
    }

    #[test]
    fn inverse_round_trips() {
        for a in 1..=255u8 {
            assert_eq!(gf_mul(a, gf_inv(a)), 1);
        }
    }
}
