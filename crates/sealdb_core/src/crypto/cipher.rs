//! Per-page authenticated encryption.

use super::key::KeyMaterial;
use crate::error::{CoreError, CoreResult};
use crate::types::PageNumber;
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the authentication tag in bytes.
pub const TAG_SIZE: usize = 16;
/// Bytes a sealed frame adds on top of its plaintext.
pub const FRAME_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;
/// Size of the per-file random id used as HKDF salt and in the AAD.
pub const FILE_ID_SIZE: usize = 16;

const PAGE_KEY_INFO: &[u8] = b"sealdb-page-key-v1";
const PLAIN_TAG_DOMAIN: &[u8] = b"sealdb-plain-page-v1";

/// How a file's pages are protected. Fixed when the file is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    /// Pages are stored in the clear with an integrity tag.
    Plaintext,
    /// Pages are sealed with AES-256-GCM.
    Encrypted,
}

impl KeyMode {
    /// Returns true for [`KeyMode::Encrypted`].
    #[must_use]
    pub const fn is_encrypted(self) -> bool {
        matches!(self, Self::Encrypted)
    }
}

enum Sealer {
    Plaintext,
    Aes256Gcm(Box<Aes256Gcm>),
}

/// Seals and opens page frames for one file.
///
/// A frame is `nonce || body || tag`. In encrypted mode the body is
/// AES-256-GCM ciphertext and the nonce is random per seal. In plaintext
/// mode the nonce is zero, the body is the plaintext and the tag is a
/// truncated SHA-256 over the file id, page number and body.
pub struct PageCipher {
    sealer: Sealer,
    file_id: [u8; FILE_ID_SIZE],
}

impl PageCipher {
    /// Creates a cipher for the given key mode.
    ///
    /// `None` selects plaintext mode.
    ///
    /// # Errors
    ///
    /// Returns an error if key derivation fails.
    pub fn new(key: Option<&KeyMaterial>, file_id: [u8; FILE_ID_SIZE]) -> CoreResult<Self> {
        match key {
            Some(key) => Self::encrypted(key, file_id),
            None => Ok(Self::plaintext(file_id)),
        }
    }

    /// Creates a plaintext-mode cipher.
    #[must_use]
    pub fn plaintext(file_id: [u8; FILE_ID_SIZE]) -> Self {
        Self {
            sealer: Sealer::Plaintext,
            file_id,
        }
    }

    /// Creates an encrypted-mode cipher, deriving the page key from `key`
    /// salted with `file_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if HKDF expansion fails.
    pub fn encrypted(key: &KeyMaterial, file_id: [u8; FILE_ID_SIZE]) -> CoreResult<Self> {
        let hk = Hkdf::<Sha256>::new(Some(&file_id), key.as_bytes());
        let mut page_key = Zeroizing::new([0u8; 32]);
        hk.expand(PAGE_KEY_INFO, &mut *page_key)
            .map_err(|_| CoreError::invalid_operation("HKDF expand failed"))?;

        let cipher = Aes256Gcm::new(GenericArray::from_slice(&*page_key));
        Ok(Self {
            sealer: Sealer::Aes256Gcm(Box::new(cipher)),
            file_id,
        })
    }

    /// Returns the key mode of this cipher.
    #[must_use]
    pub fn key_mode(&self) -> KeyMode {
        match self.sealer {
            Sealer::Plaintext => KeyMode::Plaintext,
            Sealer::Aes256Gcm(_) => KeyMode::Encrypted,
        }
    }

    /// Returns the file id bound into every frame.
    #[must_use]
    pub fn file_id(&self) -> &[u8; FILE_ID_SIZE] {
        &self.file_id
    }

    /// Seals `plaintext` for `page`.
    ///
    /// The returned frame is `plaintext.len() + FRAME_OVERHEAD` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the AEAD rejects the input.
    pub fn seal(&self, page: PageNumber, plaintext: &[u8]) -> CoreResult<Vec<u8>> {
        let mut frame = Vec::with_capacity(plaintext.len() + FRAME_OVERHEAD);
        match &self.sealer {
            Sealer::Aes256Gcm(cipher) => {
                let mut nonce_bytes = [0u8; NONCE_SIZE];
                rand::thread_rng().fill_bytes(&mut nonce_bytes);
                let aad = self.aad(page);

                let sealed = cipher
                    .encrypt(
                        Nonce::from_slice(&nonce_bytes),
                        Payload {
                            msg: plaintext,
                            aad: &aad,
                        },
                    )
                    .map_err(|_| CoreError::invalid_operation("page encryption failed"))?;

                frame.extend_from_slice(&nonce_bytes);
                frame.extend(sealed);
            }
            Sealer::Plaintext => {
                frame.extend_from_slice(&[0u8; NONCE_SIZE]);
                frame.extend_from_slice(plaintext);
                frame.extend_from_slice(&self.plain_tag(page, plaintext));
            }
        }
        Ok(frame)
    }

    /// Verifies and opens a frame sealed for `page`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AuthenticationFailed`] if the frame is too short,
    /// was sealed under a different key, for a different page or file, or
    /// has been modified.
    pub fn open(&self, page: PageNumber, frame: &[u8]) -> CoreResult<Vec<u8>> {
        if frame.len() < FRAME_OVERHEAD {
            return Err(CoreError::AuthenticationFailed { page });
        }

        let (nonce_bytes, rest) = frame.split_at(NONCE_SIZE);
        match &self.sealer {
            Sealer::Aes256Gcm(cipher) => {
                let aad = self.aad(page);
                cipher
                    .decrypt(
                        Nonce::from_slice(nonce_bytes),
                        Payload {
                            msg: rest,
                            aad: &aad,
                        },
                    )
                    .map_err(|_| CoreError::AuthenticationFailed { page })
            }
            Sealer::Plaintext => {
                let (body, tag) = rest.split_at(rest.len() - TAG_SIZE);
                if nonce_bytes.iter().any(|b| *b != 0) || tag != self.plain_tag(page, body) {
                    return Err(CoreError::AuthenticationFailed { page });
                }
                Ok(body.to_vec())
            }
        }
    }

    fn aad(&self, page: PageNumber) -> [u8; 8 + FILE_ID_SIZE] {
        let mut aad = [0u8; 8 + FILE_ID_SIZE];
        aad[..8].copy_from_slice(&page.as_u64().to_le_bytes());
        aad[8..].copy_from_slice(&self.file_id);
        aad
    }

    fn plain_tag(&self, page: PageNumber, body: &[u8]) -> [u8; TAG_SIZE] {
        let digest = Sha256::new()
            .chain_update(PLAIN_TAG_DOMAIN)
            .chain_update(self.file_id)
            .chain_update(page.as_u64().to_le_bytes())
            .chain_update(body)
            .finalize();
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&digest[..TAG_SIZE]);
        tag
    }
}

impl std::fmt::Debug for PageCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCipher")
            .field("mode", &self.key_mode())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_SIZE;
    use proptest::prelude::*;

    const FILE_ID: [u8; FILE_ID_SIZE] = [7u8; FILE_ID_SIZE];

    fn encrypted() -> PageCipher {
        PageCipher::encrypted(&KeyMaterial::generate(), FILE_ID).unwrap()
    }

    #[test]
    fn encrypted_seal_open() {
        let cipher = encrypted();
        let page = PageNumber::new(3);
        let frame = cipher.seal(page, b"Hello, World!").unwrap();

        assert_eq!(frame.len(), 13 + FRAME_OVERHEAD);
        assert_ne!(&frame[NONCE_SIZE..NONCE_SIZE + 13], b"Hello, World!");
        assert_eq!(cipher.open(page, &frame).unwrap(), b"Hello, World!");
    }

    #[test]
    fn nonce_is_fresh_per_seal() {
        let cipher = encrypted();
        let page = PageNumber::new(1);
        let a = cipher.seal(page, b"same").unwrap();
        let b = cipher.seal(page, b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails() {
        let a = encrypted();
        let b = encrypted();
        let frame = a.seal(PageNumber::new(1), b"secret").unwrap();
        assert!(matches!(
            b.open(PageNumber::new(1), &frame),
            Err(CoreError::AuthenticationFailed { page }) if page == PageNumber::new(1)
        ));
    }

    #[test]
    fn same_key_same_salt_interoperates() {
        let key = KeyMaterial::from_bytes(&[9u8; KEY_SIZE]).unwrap();
        let a = PageCipher::encrypted(&key, FILE_ID).unwrap();
        let b = PageCipher::encrypted(&key, FILE_ID).unwrap();
        let frame = a.seal(PageNumber::new(5), b"shared").unwrap();
        assert_eq!(b.open(PageNumber::new(5), &frame).unwrap(), b"shared");
    }

    #[test]
    fn frame_bound_to_file_id() {
        let key = KeyMaterial::from_bytes(&[9u8; KEY_SIZE]).unwrap();
        let a = PageCipher::encrypted(&key, FILE_ID).unwrap();
        let b = PageCipher::encrypted(&key, [8u8; FILE_ID_SIZE]).unwrap();
        let frame = a.seal(PageNumber::new(5), b"bound").unwrap();
        assert!(b.open(PageNumber::new(5), &frame).is_err());
    }

    #[test]
    fn frame_bound_to_page_number() {
        let cipher = encrypted();
        let frame = cipher.seal(PageNumber::new(2), b"moved").unwrap();
        assert!(cipher.open(PageNumber::new(3), &frame).is_err());
    }

    #[test]
    fn truncated_frame_fails() {
        let cipher = encrypted();
        assert!(cipher.open(PageNumber::new(1), &[0u8; 10]).is_err());
        assert!(PageCipher::plaintext(FILE_ID)
            .open(PageNumber::new(1), &[0u8; 10])
            .is_err());
    }

    #[test]
    fn plaintext_body_is_readable_and_tagged() {
        let cipher = PageCipher::plaintext(FILE_ID);
        let page = PageNumber::new(4);
        let frame = cipher.seal(page, b"visible").unwrap();

        assert_eq!(&frame[..NONCE_SIZE], &[0u8; NONCE_SIZE]);
        assert_eq!(&frame[NONCE_SIZE..NONCE_SIZE + 7], b"visible");
        assert_eq!(cipher.open(page, &frame).unwrap(), b"visible");

        let mut tampered = frame.clone();
        tampered[NONCE_SIZE] ^= 0x01;
        assert!(cipher.open(page, &tampered).is_err());
    }

    #[test]
    fn plaintext_cannot_open_encrypted_frame() {
        let frame = encrypted().seal(PageNumber::new(1), b"secret").unwrap();
        assert!(PageCipher::plaintext(FILE_ID)
            .open(PageNumber::new(1), &frame)
            .is_err());
    }

    #[test]
    fn debug_hides_key() {
        let rendered = format!("{:?}", encrypted());
        assert!(rendered.contains("Encrypted"));
    }

    proptest! {
        #[test]
        fn any_single_bit_flip_is_detected(
            body in proptest::collection::vec(any::<u8>(), 1..256),
            flip in any::<prop::sample::Index>(),
            bit in 0u8..8,
            encrypt in any::<bool>(),
        ) {
            let cipher = if encrypt { encrypted() } else { PageCipher::plaintext(FILE_ID) };
            let page = PageNumber::new(11);
            let mut frame = cipher.seal(page, &body).unwrap();
            let idx = flip.index(frame.len());
            frame[idx] ^= 1 << bit;
            prop_assert!(cipher.open(page, &frame).is_err());
        }

        #[test]
        fn seal_open_preserves_body(
            body in proptest::collection::vec(any::<u8>(), 0..512),
            page in 0u64..1_000_000,
        ) {
            let cipher = encrypted();
            let frame = cipher.seal(PageNumber::new(page), &body).unwrap();
            prop_assert_eq!(cipher.open(PageNumber::new(page), &frame).unwrap(), body);
        }
    }
}
