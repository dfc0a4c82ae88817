use super::types::GENERATED_LOBBY_CODE_LENGTH;

/// Alphabet for generated lobby codes with visually ambiguous characters
/// removed (no 0/O/1/I).
const CLEAN_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Generate a shareable lobby code from the unambiguous alphabet.
pub fn generate_lobby_code() -> String {
    (0..GENERATED_LOBBY_CODE_LENGTH)
        .map(|_| CLEAN_ALPHABET[fastrand::usize(..CLEAN_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_use_clean_alphabet() {
        for _ in 0..50 {
            let code = generate_lobby_code();
            assert_eq!(code.len(), GENERATED_LOBBY_CODE_LENGTH);
            assert!(!code.contains('0'));
            assert!(!code.contains('O'));
            assert!(!code.contains('1'));
            assert!(!code.contains('I'));
            assert!(code
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn generated_codes_are_mostly_unique() {
        let codes: std::collections::HashSet<_> =
            (0..100).map(|_| generate_lobby_code()).collect();
        assert!(codes.len() > 90);
    }
}
