use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    let out = h.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    arr
}

/// Public key fingerprint: fp = sha256(spki_der), lowercase hex for display.
pub fn fingerprint(spki_der: &[u8]) -> [u8; 32] {
    sha256(spki_der)
}

pub fn fingerprint_hex(spki_der: &[u8]) -> String {
    hex::encode(fingerprint(spki_der))
}
