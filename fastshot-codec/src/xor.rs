/// XOR's `data` in place against `key`, cycling the key bytes modulo
/// its length (§4.2: "key bytes cycle modulo key length"). XOR is its own
/// inverse, so this one function does both encryption and decryption.
///
/// This is obfuscation, not authenticated encryption -- see the open
/// question in §9 about substituting a real AEAD scheme if confidentiality
/// against a capable attacker is ever required.
pub fn xor_keystream(data: &mut [u8], key: &[u8]) {
    if key.is_empty() {
        return;
    }
    for (byte, k) in data.iter_mut().zip(key.iter().cycle()) {
        *byte ^= k;
    }
}

/// Finds the first occurrence of the 4-byte `FHDR` sentinel in `haystack`,
/// the boundary between cover-image bytes and ciphertext (§4.2). A manual
/// scan rather than a dependency: `peoci::ocidist::digest_eq` takes the
/// same "four bytes, don't pull in a crate" stance for its own
/// byte-comparison need.
pub fn find_sentinel(haystack: &[u8]) -> Option<usize> {
    const SENTINEL: &[u8; 4] = b"FHDR";
    if haystack.len() < 4 {
        return None;
    }
    haystack.windows(4).position(|w| w == SENTINEL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_is_its_own_inverse() {
        let key = b"passphrase";
        let original = b"the quick brown fox jumps over the lazy dog".to_vec();
        let mut data = original.clone();
        xor_keystream(&mut data, key);
        assert_ne!(data, original);
        xor_keystream(&mut data, key);
        assert_eq!(data, original);
    }

    #[test]
    fn find_sentinel_locates_marker_after_cover_bytes() {
        let mut haystack = vec![0x89, b'P', b'N', b'G', 0, 0, 0];
        haystack.extend_from_slice(b"FHDR");
        haystack.extend_from_slice(b"ciphertext");
        assert_eq!(find_sentinel(&haystack), Some(7));
    }

    #[test]
    fn find_sentinel_absent_returns_none() {
        assert_eq!(find_sentinel(b"no marker here"), None);
    }
}
