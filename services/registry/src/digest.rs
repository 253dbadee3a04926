//! SHA-256 content digests in `sha256:<lowercase hex>` form.

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Algorithm prefix used for every digest this registry computes.
pub const ALGORITHM: &str = "sha256";

/// Compute the digest of an in-memory byte slice.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("{ALGORITHM}:{}", hex::encode(Sha256::digest(data)))
}

/// Compute the digest of everything remaining in `reader`.
pub async fn sha256_digest_reader<R>(reader: &mut R) -> std::io::Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{ALGORITHM}:{}", hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        assert_eq!(
            sha256_digest(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn reader_matches_slice() {
        let data = vec![7u8; 200 * 1024];
        let mut reader = &data[..];
        let streamed = sha256_digest_reader(&mut reader).await.unwrap();
        assert_eq!(streamed, sha256_digest(&data));
    }
}
