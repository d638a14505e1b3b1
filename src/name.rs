//! Collision-resistant segment names
//!
//! Names are a fixed 30 characters: a `p<pid>_` prefix identifying the
//! creating process, padded out with random symbols from a 64-character
//! alphabet (6 bits per symbol, drawn from 128-bit random values).
//! Collisions are statistically negligible; recovering from one is the
//! lifecycle manager's job, not this module's.

/// Fixed length of every generated segment name
pub const MAX_NAME_LENGTH: usize = 30;

/// 64-symbol alphabet for the random suffix (6-bit packing)
const LOOKUP: &[u8; 64] = b"0123456789_ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Bits of a 128-bit value usable as whole 6-bit symbols
const SYMBOLS_PER_DRAW: usize = 128 / 6;

/// Generate a segment name of exactly [`MAX_NAME_LENGTH`] characters.
///
/// The prefix makes the creating process recognizable in `/dev/shm`
/// listings; the suffix makes the name unique.
pub fn generate_name() -> String {
    let mut name = format!("p{}_", std::process::id());
    name.truncate(MAX_NAME_LENGTH);

    let mut pool = fastrand::u128(..);
    let mut drawn = 0usize;
    while name.len() < MAX_NAME_LENGTH {
        if drawn == SYMBOLS_PER_DRAW {
            pool = fastrand::u128(..);
            drawn = 0;
        }
        name.push(LOOKUP[(pool & 0x3f) as usize] as char);
        pool >>= 6;
        drawn += 1;
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_shape() {
        let name = generate_name();
        assert_eq!(name.len(), MAX_NAME_LENGTH);
        assert!(name.starts_with(&format!("p{}_", std::process::id())));
        assert!(name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_'));
    }

    #[test]
    fn test_names_unique() {
        let names: std::collections::HashSet<String> =
            (0..1000).map(|_| generate_name()).collect();
        assert_eq!(names.len(), 1000);
    }
}
