use rand::RngCore;

/// Generates an opaque hex request id of `bytes` random bytes.
///
/// Ids only need to be unique among concurrently outstanding requests on
/// one transport; collisions across the process lifetime are harmless
/// because settled ids leave the registry immediately.
pub fn request_id(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_has_requested_length() {
        assert_eq!(request_id(2).len(), 4);
        assert_eq!(request_id(12).len(), 24);
    }

    #[test]
    fn ids_differ() {
        // 12 random bytes; a collision here means the generator is broken.
        assert_ne!(request_id(12), request_id(12));
    }
}
