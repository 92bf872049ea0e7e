//! SF-015: BLAKE3 digests for merged outputs.
//!
//! The merge step writes through a [`DigestWriter`], so the digest of the
//! merged output is known the moment the last part is copied.

use std::io::{self, Write};
use std::path::Path;

const PREFIX: &str = "blake3:";

fn render(hash: blake3::Hash) -> String {
    format!("{}{}", PREFIX, hash.to_hex())
}

/// Digest of an in-memory buffer, `"blake3:{hex}"`.
pub fn digest_bytes(data: &[u8]) -> String {
    render(blake3::hash(data))
}

/// Digest of a file on disk, streamed.
pub fn digest_file(path: &Path) -> io::Result<String> {
    let mut input = std::fs::File::open(path)?;
    let mut writer = DigestWriter::new(io::sink());
    io::copy(&mut input, &mut writer)?;
    Ok(writer.finish().1.digest)
}

/// Size and digest of everything written through a [`DigestWriter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Written {
    pub bytes: u64,
    pub digest: String,
}

/// Write adapter that hashes and counts the bytes the inner writer accepts.
pub struct DigestWriter<W> {
    inner: W,
    hasher: blake3::Hasher,
    bytes: u64,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
            bytes: 0,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn finish(self) -> (W, Written) {
        let written = Written {
            bytes: self.bytes,
            digest: render(self.hasher.finalize()),
        };
        (self.inner, written)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        // Only what the inner writer took; short writes are retried by callers.
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
