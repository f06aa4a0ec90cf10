//! SHA-256 content digests.
//!
//! Digests are always computed over a stream in fixed-size chunks, so objects
//! are never buffered in memory as a whole.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll, ready};

use camino::Utf8Path;
use sha2::{Digest as _, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite};

/// Algorithm prefix of every digest this registry accepts.
pub const SHA256_PREFIX: &str = "sha256:";

const DIGEST_CHUNK_SIZE: usize = 64 * 1024;

/// Errors from parsing or computing a digest.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    /// The string is not `sha256:` followed by 64 lowercase hex characters.
    #[error("invalid digest {0:?}")]
    Invalid(String),

    /// Reading the content failed before the digest was complete.
    #[error("digest computation failed")]
    ComputationFailed(#[source] io::Error),
}

/// A validated `sha256:<hex>` content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    hex: String,
}

impl Digest {
    /// Parse a digest string.
    pub fn parse(value: &str) -> Result<Self, DigestError> {
        let hex = value
            .strip_prefix(SHA256_PREFIX)
            .ok_or_else(|| DigestError::Invalid(value.to_owned()))?;

        let valid = hex.len() == 64
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(DigestError::Invalid(value.to_owned()));
        }

        Ok(Digest {
            hex: hex.to_owned(),
        })
    }

    /// Digest of an in-memory byte slice.
    pub fn of(data: &[u8]) -> Self {
        Self::from_hasher(Sha256::new_with_prefix(data))
    }

    fn from_hasher(hasher: Sha256) -> Self {
        Digest {
            hex: hex::encode(hasher.finalize()),
        }
    }

    /// The hex-encoded hash, without the algorithm prefix.
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SHA256_PREFIX}{}", self.hex)
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Digest::parse(s)
    }
}

/// Digest everything readable from `reader`, up to end-of-data.
pub async fn digest_reader<R>(reader: &mut R) -> Result<Digest, DigestError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; DIGEST_CHUNK_SIZE];

    loop {
        let n = reader
            .read(&mut buffer)
            .await
            .map_err(DigestError::ComputationFailed)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(Digest::from_hasher(hasher))
}

/// Digest a file on the local disk.
#[tracing::instrument(level = "trace")]
pub async fn digest_file(path: &Utf8Path) -> Result<Digest, DigestError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(DigestError::ComputationFailed)?;
    digest_reader(&mut file).await
}

/// Hashes every byte written through it to the inner writer.
#[derive(Debug)]
pub struct DigestWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W> DigestWriter<W> {
    /// Wrap a writer.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Number of bytes accepted by the inner writer so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Mutable access to the inner writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// The digest of everything written. Only meaningful once the stream is complete.
    pub fn finish(self) -> Digest {
        Digest::from_hasher(self.hasher)
    }
}

impl<W> AsyncWrite for DigestWriter<W>
where
    W: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let n = ready!(Pin::new(&mut this.inner).poll_write(cx, buf))?;
        this.hasher.update(&buf[..n]);
        this.written += n as u64;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt as _;

    use super::*;

    const EMPTY: &str = "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn parse_accepts_canonical_form() {
        let digest = Digest::parse(EMPTY).unwrap();
        assert_eq!(digest.to_string(), EMPTY);
        assert_eq!(digest, Digest::of(b""));
    }

    #[test]
    fn parse_rejects_malformed_digests() {
        for bad in [
            "",
            "sha256:",
            "sha512:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
            "sha256:E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855",
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b85",
            "sha256:../../../../etc/passwd",
        ] {
            assert!(
                matches!(Digest::parse(bad), Err(DigestError::Invalid(_))),
                "{bad:?} should not parse"
            );
        }
    }

    #[tokio::test]
    async fn reader_digest_spans_chunks() {
        let data = vec![7u8; DIGEST_CHUNK_SIZE * 2 + 13];
        let digest = digest_reader(&mut &data[..]).await.unwrap();
        assert_eq!(digest, Digest::of(&data));
    }

    #[tokio::test]
    async fn writer_digest_matches_content() {
        let mut writer = DigestWriter::new(Vec::new());
        writer.write_all(b"{\"schemaVersion\":").await.unwrap();
        writer.write_all(b"2}").await.unwrap();
        writer.flush().await.unwrap();

        assert_eq!(writer.bytes_written(), 19);
        assert_eq!(writer.get_mut().as_slice(), b"{\"schemaVersion\":2}");
        assert_eq!(writer.finish(), Digest::of(b"{\"schemaVersion\":2}"));
    }

    #[tokio::test]
    async fn missing_file_fails_computation() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap().join("missing");
        assert!(matches!(
            digest_file(&path).await,
            Err(DigestError::ComputationFailed(_))
        ));
    }
}
