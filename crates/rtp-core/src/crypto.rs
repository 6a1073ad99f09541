//! Encryption plug-in seam
//!
//! The stack itself never encrypts; it calls whatever [`EncryptionPlugin`]
//! the session was opened with on the full RTP payload or RTCP compound
//! buffer. [`NullEncryption`] passes data through unchanged.

use crate::error::Error;
use crate::Result;

/// Symmetric transform applied to whole packets on the wire path.
///
/// Implementations write into `out` and return the number of bytes produced.
/// `out` is sized by the caller; an implementation that needs more space
/// returns [`Error::BufferTooSmall`].
pub trait EncryptionPlugin: Send + Sync {
    /// Encrypt `plain` into `out`, returning the ciphertext length
    fn encrypt(&self, plain: &[u8], out: &mut [u8]) -> Result<usize>;

    /// Decrypt `cipher` into `out`, returning the plaintext length
    fn decrypt(&self, cipher: &[u8], out: &mut [u8]) -> Result<usize>;
}

/// Pass-through plug-in used when no encryption is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEncryption;

impl EncryptionPlugin for NullEncryption {
    fn encrypt(&self, plain: &[u8], out: &mut [u8]) -> Result<usize> {
        if out.len() < plain.len() {
            return Err(Error::BufferTooSmall {
                required: plain.len(),
                available: out.len(),
            });
        }
        out[..plain.len()].copy_from_slice(plain);
        Ok(plain.len())
    }

    fn decrypt(&self, cipher: &[u8], out: &mut [u8]) -> Result<usize> {
        self.encrypt(cipher, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_encryption_passes_through() {
        let plugin = NullEncryption;
        let mut out = [0u8; 16];
        let n = plugin.encrypt(b"hello", &mut out).unwrap();
        assert_eq!(&out[..n], b"hello");
        let n = plugin.decrypt(&out[..n], &mut out.clone()).unwrap();
        assert_eq!(n, 5);
    }

    #[test]
    fn test_null_encryption_small_buffer() {
        let plugin = NullEncryption;
        let mut out = [0u8; 2];
        assert!(matches!(
            plugin.encrypt(b"hello", &mut out),
            Err(Error::BufferTooSmall { required: 5, available: 2 })
        ));
    }
}
