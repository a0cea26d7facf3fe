//! Datagram encryption: OCB2 built on the raw AES-128 block primitive.
//!
//! The wire format per datagram is `[nonce low byte][3-byte tag][ciphertext]`.
//! Each side owns an independent 128-bit nonce used as the IV; only the
//! low byte travels, and the receiver reconstructs the sender's intended
//! nonce from it plus local state, tolerating loss, reordering and
//! duplication. Nonce state commits only on verified decryption.
//!
//! The final-block checksum folds the remaining pad bytes into the
//! checksum instead of zero-padding the plaintext. That deviates from
//! textbook OCB2 and is load-bearing for wire compatibility; the
//! known-answer tests below pin it.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

pub const KEY_SIZE: usize = 16;
pub const BLOCK_SIZE: usize = 16;
/// Both sides compare only the first 3 tag bytes.
pub const TAG_SIZE: usize = 3;
/// Nonce low byte + truncated tag.
pub const HEADER_SIZE: usize = 4;

/// Window (exclusive) within which an out-of-order packet counts as
/// merely late rather than unexplainable.
const LATE_WINDOW: i32 = 30;

/// Local decrypt-side statistics, reported back to the peer in pings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CryptStats {
    pub good: u32,
    pub late: u32,
    pub lost: u32,
    pub resync: u32,
}

/// Symmetric crypto context for the datagram path.
pub struct CryptState {
    cipher: Aes128,
    encrypt_iv: [u8; BLOCK_SIZE],
    decrypt_iv: [u8; BLOCK_SIZE],
    /// nonce low byte -> last accepted nonce second byte, for replay
    /// rejection without attempting decryption.
    decrypt_history: [u8; 256],
    stats: CryptStats,
}

impl CryptState {
    #[must_use]
    pub fn new(
        key: [u8; KEY_SIZE],
        encrypt_nonce: [u8; BLOCK_SIZE],
        decrypt_nonce: [u8; BLOCK_SIZE],
    ) -> Self {
        Self {
            cipher: Aes128::new(GenericArray::from_slice(&key)),
            encrypt_iv: encrypt_nonce,
            decrypt_iv: decrypt_nonce,
            decrypt_history: [0; 256],
            stats: CryptStats::default(),
        }
    }

    /// Current encrypt-side nonce, sent to the peer on a resync request.
    #[must_use]
    pub fn encrypt_nonce(&self) -> [u8; BLOCK_SIZE] {
        self.encrypt_iv
    }

    /// Overwrite the decrypt-side nonce outright (peer-driven resync).
    pub fn set_decrypt_nonce(&mut self, nonce: [u8; BLOCK_SIZE]) {
        self.decrypt_iv = nonce;
        self.decrypt_history = [0; 256];
        self.stats.resync += 1;
    }

    #[must_use]
    pub fn stats(&self) -> CryptStats {
        self.stats
    }

    /// Encrypt one datagram payload.
    ///
    /// Advances the full encrypt nonce (low byte first, carrying) before
    /// encrypting, then prepends the nonce low byte and the 3-byte tag.
    pub fn encrypt(&mut self, plain: &[u8]) -> Vec<u8> {
        for byte in &mut self.encrypt_iv {
            *byte = byte.wrapping_add(1);
            if *byte != 0 {
                break;
            }
        }

        let nonce = self.encrypt_iv;
        let mut out = Vec::with_capacity(HEADER_SIZE + plain.len());
        out.push(nonce[0]);
        out.extend_from_slice(&[0; TAG_SIZE]);
        let tag = self.ocb_encrypt(plain, &nonce, &mut out);
        out[1..HEADER_SIZE].copy_from_slice(&tag[..TAG_SIZE]);
        out
    }

    /// Decrypt one datagram.
    ///
    /// Returns `None` on anything unexplainable: truncation, replay,
    /// out-of-window nonce, or tag mismatch. All nonce-state changes made
    /// for a failed attempt are rolled back, and a late packet never
    /// permanently rewinds the nonce even when it verifies.
    pub fn decrypt(&mut self, wire: &[u8]) -> Option<Vec<u8>> {
        if wire.len() < HEADER_SIZE {
            return None;
        }
        let ivbyte = wire[0];
        let saved_iv = self.decrypt_iv;
        let mut restore = false;

        if self.decrypt_iv[0].wrapping_add(1) == ivbyte {
            // In-order.
            if ivbyte > self.decrypt_iv[0] {
                self.decrypt_iv[0] = ivbyte;
            } else if ivbyte < self.decrypt_iv[0] {
                self.decrypt_iv[0] = ivbyte;
                carry_increment(&mut self.decrypt_iv);
            } else {
                return None;
            }
        } else {
            // Signed circular difference wrapped into [-128, 128).
            let mut diff = i32::from(ivbyte) - i32::from(self.decrypt_iv[0]);
            if diff > 128 {
                diff -= 256;
            } else if diff < -128 {
                diff += 256;
            }

            if ivbyte < self.decrypt_iv[0] && diff > -LATE_WINDOW && diff < 0 {
                // Late within the current cycle.
                self.stats.late += 1;
                self.stats.lost = self.stats.lost.saturating_sub(1);
                self.decrypt_iv[0] = ivbyte;
                restore = true;
            } else if ivbyte > self.decrypt_iv[0] && diff > -LATE_WINDOW && diff < 0 {
                // Late from the previous cycle; borrow out of the high bytes.
                self.stats.late += 1;
                self.stats.lost = self.stats.lost.saturating_sub(1);
                self.decrypt_iv[0] = ivbyte;
                borrow_decrement(&mut self.decrypt_iv);
                restore = true;
            } else if ivbyte > self.decrypt_iv[0] && diff > 0 {
                // Packets lost, order holds.
                self.stats.lost += (diff - 1) as u32;
                self.decrypt_iv[0] = ivbyte;
            } else if ivbyte < self.decrypt_iv[0] && diff > 0 {
                // Lost across a low-byte wraparound.
                self.stats.lost += (diff - 1) as u32;
                self.decrypt_iv[0] = ivbyte;
                carry_increment(&mut self.decrypt_iv);
            } else {
                return None;
            }

            if self.decrypt_history[usize::from(self.decrypt_iv[0])] == self.decrypt_iv[1] {
                self.decrypt_iv = saved_iv;
                return None;
            }
        }

        let nonce = self.decrypt_iv;
        let mut plain = Vec::with_capacity(wire.len() - HEADER_SIZE);
        let tag = self.ocb_decrypt(&wire[HEADER_SIZE..], &nonce, &mut plain);

        if tag[..TAG_SIZE] != wire[1..HEADER_SIZE] {
            self.decrypt_iv = saved_iv;
            return None;
        }

        self.decrypt_history[usize::from(self.decrypt_iv[0])] = self.decrypt_iv[1];
        if restore {
            self.decrypt_iv = saved_iv;
        }
        self.stats.good += 1;
        Some(plain)
    }

    fn aes_encrypt(&self, block: [u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
        let mut b = GenericArray::from(block);
        self.cipher.encrypt_block(&mut b);
        b.into()
    }

    fn aes_decrypt(&self, block: [u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
        let mut b = GenericArray::from(block);
        self.cipher.decrypt_block(&mut b);
        b.into()
    }

    /// OCB2 encryption over `plain`, appending ciphertext to `out` and
    /// returning the full (untruncated) tag.
    fn ocb_encrypt(
        &self,
        plain: &[u8],
        nonce: &[u8; BLOCK_SIZE],
        out: &mut Vec<u8>,
    ) -> [u8; BLOCK_SIZE] {
        let mut offset = self.aes_encrypt(*nonce);
        let mut checksum = [0u8; BLOCK_SIZE];

        let mut rem = plain;
        while rem.len() > BLOCK_SIZE {
            times2(&mut offset);
            let block: [u8; BLOCK_SIZE] = rem[..BLOCK_SIZE].try_into().unwrap();
            let mut tmp = self.aes_encrypt(xored(block, offset));
            xor_into(&mut tmp, &offset);
            out.extend_from_slice(&tmp);
            xor_into(&mut checksum, &block);
            rem = &rem[BLOCK_SIZE..];
        }

        // Final block (1..=16 bytes; exact multiples also land here).
        times2(&mut offset);
        let r = rem.len();
        let mut lenblock = [0u8; BLOCK_SIZE];
        lenblock[BLOCK_SIZE - 4..].copy_from_slice(&((r * 8) as u32).to_be_bytes());
        let pad = self.aes_encrypt(xored(lenblock, offset));
        for i in 0..r {
            out.push(rem[i] ^ pad[i]);
        }
        // Checksum folds plaintext for 0..r and the pad remainder for r..16.
        for i in 0..r {
            checksum[i] ^= rem[i];
        }
        for i in r..BLOCK_SIZE {
            checksum[i] ^= pad[i];
        }

        let times3 = {
            let mut t = offset;
            times2(&mut t);
            xor_into(&mut t, &offset);
            t
        };
        self.aes_encrypt(xored(checksum, times3))
    }

    /// OCB2 decryption, appending plaintext to `out` and returning the
    /// tag computed over the recovered plaintext.
    fn ocb_decrypt(
        &self,
        cipher: &[u8],
        nonce: &[u8; BLOCK_SIZE],
        out: &mut Vec<u8>,
    ) -> [u8; BLOCK_SIZE] {
        let mut offset = self.aes_encrypt(*nonce);
        let mut checksum = [0u8; BLOCK_SIZE];

        let mut rem = cipher;
        while rem.len() > BLOCK_SIZE {
            times2(&mut offset);
            let block: [u8; BLOCK_SIZE] = rem[..BLOCK_SIZE].try_into().unwrap();
            let mut tmp = self.aes_decrypt(xored(block, offset));
            xor_into(&mut tmp, &offset);
            out.extend_from_slice(&tmp);
            xor_into(&mut checksum, &tmp);
            rem = &rem[BLOCK_SIZE..];
        }

        times2(&mut offset);
        let r = rem.len();
        let mut lenblock = [0u8; BLOCK_SIZE];
        lenblock[BLOCK_SIZE - 4..].copy_from_slice(&((r * 8) as u32).to_be_bytes());
        let pad = self.aes_encrypt(xored(lenblock, offset));
        let base = out.len();
        for i in 0..r {
            out.push(rem[i] ^ pad[i]);
        }
        for i in 0..r {
            checksum[i] ^= out[base + i];
        }
        for i in r..BLOCK_SIZE {
            checksum[i] ^= pad[i];
        }

        let times3 = {
            let mut t = offset;
            times2(&mut t);
            xor_into(&mut t, &offset);
            t
        };
        self.aes_encrypt(xored(checksum, times3))
    }
}

/// GF(2^128) multiply-by-2 with the 0x87 reduction on carry-out.
fn times2(block: &mut [u8; BLOCK_SIZE]) {
    let carry = block[0] >> 7;
    for i in 0..BLOCK_SIZE - 1 {
        block[i] = (block[i] << 1) | (block[i + 1] >> 7);
    }
    block[BLOCK_SIZE - 1] = (block[BLOCK_SIZE - 1] << 1) ^ (carry * 0x87);
}

fn xor_into(dst: &mut [u8; BLOCK_SIZE], src: &[u8; BLOCK_SIZE]) {
    for i in 0..BLOCK_SIZE {
        dst[i] ^= src[i];
    }
}

fn xored(mut a: [u8; BLOCK_SIZE], b: [u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    xor_into(&mut a, &b);
    a
}

/// Increment bytes 1..16 as one carrying counter (low byte handled by
/// the caller).
fn carry_increment(iv: &mut [u8; BLOCK_SIZE]) {
    for byte in iv.iter_mut().skip(1) {
        *byte = byte.wrapping_add(1);
        if *byte != 0 {
            break;
        }
    }
}

/// Borrow out of bytes 1..16 (inverse of `carry_increment`).
fn borrow_decrement(iv: &mut [u8; BLOCK_SIZE]) {
    for byte in iv.iter_mut().skip(1) {
        let before = *byte;
        *byte = byte.wrapping_sub(1);
        if before != 0 {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; KEY_SIZE] {
        core::array::from_fn(|i| i as u8)
    }

    fn test_nonce() -> [u8; BLOCK_SIZE] {
        core::array::from_fn(|i| i as u8)
    }

    /// Client/server pair sharing one key with mirrored nonces.
    fn crypt_pair() -> (CryptState, CryptState) {
        let a = [0x11u8; BLOCK_SIZE];
        let b = [0x22u8; BLOCK_SIZE];
        (
            CryptState::new(test_key(), a, b),
            CryptState::new(test_key(), b, a),
        )
    }

    #[test]
    fn ocb_known_answer_empty_message() {
        // draft-krovetz-ocb-00 test vector; also exercises the r = 0
        // pad-into-checksum path.
        let cs = CryptState::new(test_key(), [0; 16], [0; 16]);
        let mut ct = Vec::new();
        let tag = cs.ocb_encrypt(&[], &test_nonce(), &mut ct);
        assert!(ct.is_empty());
        assert_eq!(tag.to_vec(), hex::decode("bf3108130773ad5ec70ec69e7875a7b0").unwrap());
    }

    #[test]
    fn ocb_known_answer_40_bytes() {
        let cs = CryptState::new(test_key(), [0; 16], [0; 16]);
        let plain: Vec<u8> = (0u8..40).collect();
        let mut ct = Vec::new();
        let tag = cs.ocb_encrypt(&plain, &test_nonce(), &mut ct);
        assert_eq!(
            ct,
            hex::decode(
                "f75d6bc8b4dc8d66b836a2b08b32a6369f1cd3c5228d79fd6c267f5f6aa7b231c7dfb9d59951ae9c"
            )
            .unwrap()
        );
        assert_eq!(tag.to_vec(), hex::decode("9db0cdf880f73e3e10d4eb3217766688").unwrap());

        let mut back = Vec::new();
        let dtag = cs.ocb_decrypt(&ct, &test_nonce(), &mut back);
        assert_eq!(back, plain);
        assert_eq!(dtag, tag);
    }

    #[test]
    fn ocb_known_answer_partial_block() {
        // A pure partial block pins the nonstandard checksum rule: a
        // textbook OCB2 implementation produces a different tag here.
        let cs = CryptState::new(test_key(), [0; 16], [0; 16]);
        let mut ct = Vec::new();
        let tag = cs.ocb_encrypt(b"hello", &test_nonce(), &mut ct);
        assert_eq!(ct, hex::decode("a0c4a050ff").unwrap());
        assert_eq!(tag.to_vec(), hex::decode("2aac2cb8346b55a583498e0b34395f62").unwrap());
    }

    #[test]
    fn ocb_known_answer_exact_block() {
        // 16-byte messages take the final-block path, not the full-block one.
        let cs = CryptState::new(test_key(), [0; 16], [0; 16]);
        let plain: Vec<u8> = (0u8..16).collect();
        let mut ct = Vec::new();
        let tag = cs.ocb_encrypt(&plain, &test_nonce(), &mut ct);
        assert_eq!(ct, hex::decode("52e48f5d19fe2d9869f0c4a4b3d2be57").unwrap());
        assert_eq!(tag.to_vec(), hex::decode("f7ee49ae7aa5b5e6645db6b3966136f9").unwrap());
    }

    #[test]
    fn wire_known_answer_first_packet() {
        let mut cs = CryptState::new(test_key(), [0; 16], [0; 16]);
        let wire = cs.encrypt(b"airband");
        assert_eq!(wire, hex::decode("0106a34fea3d4aabb2be1c").unwrap());
        assert_eq!(cs.encrypt_nonce()[0], 1);
    }

    #[test]
    fn pair_roundtrip_in_order() {
        // 600 packets cross the low-byte wrap twice, exercising the
        // in-order carry into the high nonce bytes.
        let (mut tx, mut rx) = crypt_pair();
        for i in 0u16..600 {
            let body = i.to_be_bytes();
            let wire = tx.encrypt(&body);
            assert_eq!(rx.decrypt(&wire).unwrap(), body);
        }
        assert_eq!(rx.stats().good, 600);
        assert_eq!(rx.stats().lost, 0);
        assert_eq!(rx.stats().late, 0);
    }

    #[test]
    fn replay_is_rejected_without_decrypting() {
        let (mut tx, mut rx) = crypt_pair();
        let w1 = tx.encrypt(b"one");
        let w2 = tx.encrypt(b"two");
        assert!(rx.decrypt(&w1).is_some());
        assert!(rx.decrypt(&w2).is_some());
        // Same (low byte, second byte) pair again.
        assert!(rx.decrypt(&w2).is_none());
        assert!(rx.decrypt(&w1).is_none());
    }

    #[test]
    fn late_packet_decrypts_without_rewinding_state() {
        let (mut tx, mut rx) = crypt_pair();
        let w1 = tx.encrypt(b"p1");
        let w2 = tx.encrypt(b"p2");
        let w3 = tx.encrypt(b"p3");
        let w4 = tx.encrypt(b"p4");

        assert_eq!(rx.decrypt(&w1).unwrap(), b"p1");
        assert_eq!(rx.decrypt(&w3).unwrap(), b"p3");
        // w2 arrives late; it must decrypt...
        assert_eq!(rx.decrypt(&w2).unwrap(), b"p2");
        assert_eq!(rx.stats().late, 1);
        // ...and the next strictly in-order packet still decrypts, which
        // proves the nonce was not permanently rewound.
        assert_eq!(rx.decrypt(&w4).unwrap(), b"p4");
        assert_eq!(rx.stats().good, 4);
    }

    #[test]
    fn lost_packets_advance_permanently() {
        let (mut tx, mut rx) = crypt_pair();
        let w1 = tx.encrypt(b"a");
        for _ in 0..3 {
            let _ = tx.encrypt(b"dropped");
        }
        let w5 = tx.encrypt(b"e");
        assert!(rx.decrypt(&w1).is_some());
        assert!(rx.decrypt(&w5).is_some());
        assert_eq!(rx.stats().lost, 3);
    }

    #[test]
    fn tampered_tag_rolls_back_nonce_state() {
        let (mut tx, mut rx) = crypt_pair();
        let w1 = tx.encrypt(b"good one");
        let mut tampered = w1.clone();
        tampered[2] ^= 0xFF;
        assert!(rx.decrypt(&tampered).is_none());
        // The untampered packet still decrypts: the failed attempt
        // committed nothing.
        assert_eq!(rx.decrypt(&w1).unwrap(), b"good one");
    }

    #[test]
    fn low_byte_wraparound_carries() {
        let (mut tx, mut rx) = crypt_pair();
        for _ in 0..230 {
            let w = tx.encrypt(b"tick");
            assert!(rx.decrypt(&w).is_some());
        }
        for _ in 0..19 {
            let _ = tx.encrypt(b"dropped");
        }
        // The gap spans the low byte's wrap past zero, so the receiver
        // must carry into byte 1 while advancing over it.
        let w = tx.encrypt(b"tock");
        assert_eq!(rx.decrypt(&w).unwrap(), b"tock");
        assert_eq!(rx.stats().lost, 19);
    }

    #[test]
    fn out_of_window_nonce_is_rejected() {
        let (mut tx, mut rx) = crypt_pair();
        let mut wires: Vec<Vec<u8>> = (0..80).map(|_| tx.encrypt(b"x")).collect();
        let newest = wires.pop().unwrap();
        assert!(rx.decrypt(&newest).is_some());
        // 40 behind the current low byte is outside the (-30, 0) window.
        assert!(rx.decrypt(&wires[39]).is_none());
    }

    #[test]
    fn peer_resync_overwrites_decrypt_nonce() {
        let (mut tx, mut rx) = crypt_pair();
        for _ in 0..10 {
            let _ = tx.encrypt(b"unseen");
        }
        // Simulate the resync control exchange: the peer ships its
        // current encrypt nonce and the receiver adopts it wholesale.
        rx.set_decrypt_nonce(tx.encrypt_nonce());
        let w = tx.encrypt(b"after resync");
        assert_eq!(rx.decrypt(&w).unwrap(), b"after resync");
    }

    #[test]
    fn truncated_datagram_is_dropped() {
        let (mut tx, mut rx) = crypt_pair();
        let w = tx.encrypt(b"short");
        assert!(rx.decrypt(&w[..3]).is_none());
    }
}
