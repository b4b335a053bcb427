//! Shielded notes and their sealed on-chain form.
//!
//! A note is the UTXO of the system: `(owner, value, memo, asset id,
//! sender)` plus blinding randomness. On chain it only ever appears sealed.
//! A sealed note carries two ciphertexts of the same plaintext: one openable
//! with the owner's incoming view key and one with the creator's outgoing
//! view key, which is what makes keyed trial-decryption work for both the
//! receiving and the sending wallet.
//!
//! The sealing here is an executable stand-in built from the primitives this
//! crate already carries (XChaCha20-Poly1305 keyed through the view-key
//! chain, SHA3-256 commitments), not a production note ciphersuite.

use chacha20poly1305::{Key, KeyInit, XChaCha20Poly1305, XNonce, aead::Aead};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use thiserror::Error;

use crate::keys::{IncomingViewKey, OutgoingViewKey, PublicAddress, SpendingKey};
use crate::assets::AssetId;
use crate::models::FixedHash;

pub const MEMO_SIZE: usize = 32;

const COMMITMENT_DOMAIN: &[u8] = b"nightfall.note.commitment";
const NULLIFIER_DOMAIN: &[u8] = b"nightfall.note.nullifier";
const OWNER_ENCRYPTION_DOMAIN: &[u8] = b"nightfall.note.encryption.owner";
const SENDER_ENCRYPTION_DOMAIN: &[u8] = b"nightfall.note.encryption.sender";

const NOTE_BYTES: usize = 32 + 32 + 8 + MEMO_SIZE + 32 + 32;

#[derive(Debug, Error)]
pub enum NoteError {
    #[error("note could not be sealed")]
    Seal,
    #[error("malformed note payload")]
    Malformed,
}

/// A fixed-size payment memo. Longer input is truncated, shorter input is
/// zero padded.
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Memo(#[serde(with = "hex::serde")] [u8; MEMO_SIZE]);

impl Memo {
    pub fn as_bytes(&self) -> &[u8; MEMO_SIZE] {
        &self.0
    }

    /// The memo text up to the first NUL byte.
    pub fn to_text(&self) -> String {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(MEMO_SIZE);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }
}

impl From<&str> for Memo {
    fn from(text: &str) -> Self {
        let mut bytes = [0u8; MEMO_SIZE];
        let take = text.len().min(MEMO_SIZE);
        bytes[..take].copy_from_slice(&text.as_bytes()[..take]);
        Self(bytes)
    }
}

impl std::fmt::Debug for Memo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Memo({:?})", self.to_text())
    }
}

/// A decrypted shielded UTXO.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Note {
    pub owner: PublicAddress,
    #[serde(with = "hex::serde")]
    pub randomness: [u8; 32],
    pub value: u64,
    pub memo: Memo,
    pub asset_id: AssetId,
    pub sender: PublicAddress,
}

impl Note {
    /// Creates a note with fresh blinding randomness.
    pub fn new(
        owner: PublicAddress,
        value: u64,
        memo: Memo,
        asset_id: AssetId,
        sender: PublicAddress,
    ) -> Self {
        let mut randomness = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut randomness);
        Self { owner, randomness, value, memo, asset_id, sender }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(NOTE_BYTES);
        bytes.extend_from_slice(self.owner.as_bytes());
        bytes.extend_from_slice(&self.randomness);
        bytes.extend_from_slice(&self.value.to_le_bytes());
        bytes.extend_from_slice(self.memo.as_bytes());
        bytes.extend_from_slice(self.asset_id.as_bytes());
        bytes.extend_from_slice(self.sender.as_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, NoteError> {
        if bytes.len() != NOTE_BYTES {
            return Err(NoteError::Malformed);
        }

        let owner = PublicAddress::from(read32(&bytes[0..32]));
        let randomness = read32(&bytes[32..64]);
        let value = u64::from_le_bytes(bytes[64..72].try_into().map_err(|_| NoteError::Malformed)?);
        let mut memo = [0u8; MEMO_SIZE];
        memo.copy_from_slice(&bytes[72..72 + MEMO_SIZE]);
        let asset_id = AssetId::from(FixedHash::new(read32(&bytes[104..136])));
        let sender = PublicAddress::from(read32(&bytes[136..168]));

        Ok(Self { owner, randomness, value, memo: Memo(memo), asset_id, sender })
    }

    /// The note's leaf value in the global commitment tree; also the hash the
    /// wallet keys its decrypted notes by.
    pub fn commitment(&self) -> FixedHash {
        let mut hasher = Sha3_256::new();
        hasher.update(COMMITMENT_DOMAIN);
        hasher.update(self.to_bytes());
        FixedHash::new(hasher.finalize().into())
    }

    /// The tag revealed when this note is spent. Only derivable with the
    /// spending key and the note's position in the commitment tree.
    pub fn nullifier(&self, spending_key: &SpendingKey, position: u64) -> FixedHash {
        let mut hasher = Sha3_256::new();
        hasher.update(NULLIFIER_DOMAIN);
        hasher.update(spending_key.as_bytes());
        hasher.update(self.commitment().as_bytes());
        hasher.update(position.to_le_bytes());
        FixedHash::new(hasher.finalize().into())
    }
}

fn read32(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(bytes);
    out
}

/// The sealed, on-chain form of a note.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct EncryptedNote {
    /// The commitment-tree leaf, public so the chain can build witnesses.
    pub commitment: FixedHash,
    #[serde(with = "hex::serde")]
    nonce: [u8; 24],
    #[serde(with = "hex::serde")]
    ciphertext: Vec<u8>,
    #[serde(with = "hex::serde")]
    sender_nonce: [u8; 24],
    #[serde(with = "hex::serde")]
    sender_ciphertext: Vec<u8>,
}

impl EncryptedNote {
    /// Seals a note for its owner, plus a sender copy openable with the
    /// creator's outgoing view key.
    pub fn seal(note: &Note, sender_key: &OutgoingViewKey) -> Result<Self, NoteError> {
        let plaintext = note.to_bytes();
        let mut rng = rand::thread_rng();

        let mut nonce = [0u8; 24];
        rng.fill_bytes(&mut nonce);
        let owner_cipher = XChaCha20Poly1305::new(&owner_encryption_key(&note.owner));
        let ciphertext = owner_cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| NoteError::Seal)?;

        let mut sender_nonce = [0u8; 24];
        rng.fill_bytes(&mut sender_nonce);
        let sender_cipher = XChaCha20Poly1305::new(&sender_encryption_key(sender_key));
        let sender_ciphertext = sender_cipher
            .encrypt(XNonce::from_slice(&sender_nonce), plaintext.as_slice())
            .map_err(|_| NoteError::Seal)?;

        Ok(Self {
            commitment: note.commitment(),
            nonce,
            ciphertext,
            sender_nonce,
            sender_ciphertext,
        })
    }

    /// Trial-decrypts with an incoming view key. `None` means the note is not
    /// addressed to that key.
    pub fn open(&self, incoming_view_key: &IncomingViewKey) -> Option<Note> {
        let address = incoming_view_key.public_address();
        let cipher = XChaCha20Poly1305::new(&owner_encryption_key(&address));
        let plaintext = cipher
            .decrypt(XNonce::from_slice(&self.nonce), self.ciphertext.as_slice())
            .ok()?;
        let note = Note::from_bytes(&plaintext).ok()?;
        (note.owner == address && note.commitment() == self.commitment).then_some(note)
    }

    /// Trial-decrypts the sender copy with an outgoing view key. `None` means
    /// the note was not created by that key's account.
    pub fn open_for_spender(&self, outgoing_view_key: &OutgoingViewKey) -> Option<Note> {
        let cipher = XChaCha20Poly1305::new(&sender_encryption_key(outgoing_view_key));
        let plaintext = cipher
            .decrypt(XNonce::from_slice(&self.sender_nonce), self.sender_ciphertext.as_slice())
            .ok()?;
        let note = Note::from_bytes(&plaintext).ok()?;
        (note.commitment() == self.commitment).then_some(note)
    }

    /// Bytes folded into the containing transaction's hash.
    pub(crate) fn hashable_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(self.commitment.as_bytes());
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        bytes.extend_from_slice(&self.sender_nonce);
        bytes.extend_from_slice(&self.sender_ciphertext);
        bytes
    }
}

fn owner_encryption_key(address: &PublicAddress) -> Key {
    let mut hasher = Sha3_256::new();
    hasher.update(OWNER_ENCRYPTION_DOMAIN);
    hasher.update(address.as_bytes());
    let bytes: [u8; 32] = hasher.finalize().into();
    Key::from(bytes)
}

fn sender_encryption_key(outgoing_view_key: &OutgoingViewKey) -> Key {
    let mut hasher = Sha3_256::new();
    hasher.update(SENDER_ENCRYPTION_DOMAIN);
    hasher.update(outgoing_view_key.as_bytes());
    let bytes: [u8; 32] = hasher.finalize().into();
    Key::from(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SpendingKey;

    fn sample_note(owner: &SpendingKey, sender: &SpendingKey) -> Note {
        Note::new(
            owner.public_address(),
            42,
            Memo::from("coffee"),
            AssetId::native(),
            sender.public_address(),
        )
    }

    #[test]
    fn note_bytes_round_trip() {
        let owner = SpendingKey::generate();
        let note = sample_note(&owner, &owner);
        assert_eq!(Note::from_bytes(&note.to_bytes()).unwrap(), note);
    }

    #[test]
    fn owner_can_open_sealed_note() {
        let owner = SpendingKey::generate();
        let sender = SpendingKey::generate();
        let note = sample_note(&owner, &sender);

        let sealed = EncryptedNote::seal(&note, &sender.outgoing_view_key()).unwrap();
        assert_eq!(sealed.open(&owner.incoming_view_key()), Some(note.clone()));
        assert_eq!(sealed.open_for_spender(&sender.outgoing_view_key()), Some(note));
    }

    #[test]
    fn trial_decryption_fails_for_other_keys() {
        let owner = SpendingKey::generate();
        let sender = SpendingKey::generate();
        let stranger = SpendingKey::generate();
        let sealed = EncryptedNote::seal(&sample_note(&owner, &sender), &sender.outgoing_view_key()).unwrap();

        assert_eq!(sealed.open(&stranger.incoming_view_key()), None);
        assert_eq!(sealed.open_for_spender(&stranger.outgoing_view_key()), None);
    }

    #[test]
    fn nullifier_depends_on_position_and_key() {
        let owner = SpendingKey::generate();
        let note = sample_note(&owner, &owner);

        assert_eq!(note.nullifier(&owner, 3), note.nullifier(&owner, 3));
        assert_ne!(note.nullifier(&owner, 3), note.nullifier(&owner, 4));
        assert_ne!(note.nullifier(&owner, 3), note.nullifier(&SpendingKey::generate(), 3));
    }

    #[test]
    fn identical_payloads_get_distinct_commitments() {
        let owner = SpendingKey::generate();
        let a = sample_note(&owner, &owner);
        let b = sample_note(&owner, &owner);
        assert_ne!(a.commitment(), b.commitment());
    }

    #[test]
    fn memo_truncates_and_pads() {
        assert_eq!(Memo::from("hi").to_text(), "hi");
        let long = "x".repeat(64);
        assert_eq!(Memo::from(long.as_str()).to_text().len(), MEMO_SIZE);
    }
}
