use hkdf::Hkdf;
use rand::RngCore;
use rand_core::OsRng;
use sha2::{Digest, Sha256};

/// Generates `length` random bytes from the OS CSPRNG.
pub fn random_bytes(length: usize) -> Vec<u8> {
    let mut output = vec![0u8; length];
    OsRng.fill_bytes(&mut output);
    output
}

/// Generates a fixed-size random array from the OS CSPRNG.
pub fn random_array<const N: usize>() -> [u8; N] {
    let mut output = [0u8; N];
    OsRng.fill_bytes(&mut output);
    output
}

/// Computes the SHA256 of the input.
pub fn sha256(bytes: &[u8]) -> Vec<u8> {
    Sha256::digest(bytes).as_slice().to_vec()
}

/// Extract-then-expand key derivation from RFC 5869, using SHA256.
/// Passing no salt is equivalent to a salt of `HashLen` zero bytes.
pub fn hkdf_sha256(
    input_key_material: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    length: usize,
) -> Result<Vec<u8>, hkdf::InvalidLength> {
    let hkdf = Hkdf::<Sha256>::new(salt, input_key_material);
    let mut output = vec![0u8; length];
    hkdf.expand(info, &mut output)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_bytes_have_requested_length() {
        assert_eq!(random_bytes(16).len(), 16);
        assert_eq!(random_bytes(0).len(), 0);
    }

    #[test]
    fn random_bytes_differ_between_draws() {
        assert_ne!(random_bytes(32), random_bytes(32));
    }

    #[test]
    fn sha256_matches_known_vector() {
        // SHA256("abc"), from FIPS 180-2.
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hkdf_sha256_matches_rfc_5869_test_case_1() {
        let ikm = [0x0b; 22];
        let salt = hex::decode("000102030405060708090a0b0c").unwrap();
        let info = hex::decode("f0f1f2f3f4f5f6f7f8f9").unwrap();

        let okm = hkdf_sha256(&ikm, Some(&salt), &info, 42).unwrap();

        assert_eq!(
            hex::encode(okm),
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
        );
    }

    #[test]
    fn hkdf_sha256_is_deterministic() {
        let a = hkdf_sha256(b"ikm", Some(b"salt"), b"info", 64).unwrap();
        let b = hkdf_sha256(b"ikm", Some(b"salt"), b"info", 64).unwrap();
        assert_eq!(a, b);
    }
}
