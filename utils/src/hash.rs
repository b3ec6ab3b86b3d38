use md5::{Digest, Md5};

/// Hex md5 of an arbitrary byte string. Cache file names and dedup
/// sub-hashes are both keyed on this.
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
