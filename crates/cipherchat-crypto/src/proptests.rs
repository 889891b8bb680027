use proptest::prelude::*;

use crate::engine::{CryptoEngine, CryptoError};
use crate::envelope::Envelope;
use crate::fixtures;
use crate::transcript::Transcript;
use crate::utils::parse_fingerprint;

proptest! {
    #[test]
    fn test_transcript_determinism(
        tag1 in any::<u32>(),
        data1 in any::<Vec<u8>>(),
        tag2 in any::<u32>(),
        data2 in any::<Vec<u8>>()
    ) {
        let mut t1 = Transcript::new("test");
        t1.append_bytes(tag1, &data1);
        t1.append_bytes(tag2, &data2);

        let mut t2 = Transcript::new("test");
        t2.append_bytes(tag1, &data1);
        t2.append_bytes(tag2, &data2);

        prop_assert_eq!(t1.finish().unwrap(), t2.finish().unwrap());
    }

    #[test]
    fn test_transcript_split_point_is_unambiguous(
        data in proptest::collection::vec(any::<u8>(), 2..64),
        split in 1usize..63
    ) {
        let split = split.min(data.len() - 1);
        let mut t1 = Transcript::new("test");
        t1.append_bytes(1, &data[..split]).append_bytes(2, &data[split..]);

        let mut t2 = Transcript::new("test");
        t2.append_bytes(1, &data[..split - 1]).append_bytes(2, &data[split - 1..]);

        prop_assert_ne!(t1.finish().unwrap(), t2.finish().unwrap());
    }

    #[test]
    fn test_parse_fingerprint_accepts_own_hex(raw in any::<[u8; 32]>()) {
        prop_assert_eq!(parse_fingerprint(&hex::encode(raw)), Some(raw));
        prop_assert_eq!(parse_fingerprint(&hex::encode_upper(raw)), Some(raw));
    }
}

proptest! {
    // RSA operations are slow; keep the case count small.
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn test_hybrid_round_trip_prop(plaintext in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let engine = CryptoEngine::new();
        let bob = fixtures::bob();

        let sealed = engine.hybrid_encrypt(&plaintext, bob.public_key()).unwrap();
        prop_assert_eq!(sealed.ciphertext.len(), (plaintext.len() / 16 + 1) * 16);

        let opened = engine
            .hybrid_decrypt(&sealed.ciphertext, &sealed.iv, &sealed.wrapped_key, bob)
            .unwrap();
        prop_assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_envelope_bit_flip_never_yields_plaintext(
        plaintext in proptest::collection::vec(any::<u8>(), 1..256),
        field in 0usize..4,
        position in any::<usize>(),
        bit in 0u8..8
    ) {
        let engine = CryptoEngine::new();
        let mut env = Envelope::seal(
            &engine,
            "alice",
            "bob",
            &plaintext,
            fixtures::bob().public_key(),
            fixtures::alice(),
            1_760_000_000,
        )
        .unwrap();

        match field {
            0 => {
                let i = position % env.ciphertext.len();
                env.ciphertext[i] ^= 1 << bit;
            }
            1 => {
                let i = position % env.iv.len();
                env.iv[i] ^= 1 << bit;
            }
            2 => {
                let i = position % env.wrapped_key.len();
                env.wrapped_key[i] ^= 1 << bit;
            }
            _ => env.timestamp ^= 1 << (position % 64),
        }

        let result = env.verify(&engine, fixtures::alice().public_key());
        prop_assert_eq!(result.unwrap_err(), CryptoError::SignatureInvalid);
    }
}
