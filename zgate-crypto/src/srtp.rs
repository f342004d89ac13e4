//! Default backend: AES counter mode with HMAC-SHA1 authentication
//!
//! Session keys are derived from the master key and salt with the AES-CM
//! pseudo-random function (RFC 3711, 4.3.1, key derivation rate 0). Packets
//! are encrypted after the RTP header and authenticated over
//! `header || ciphertext || ROC`.

use crate::backend::{AuthMode, CipherMode, CryptoBackend, CryptoError, KeyedTransform, SrtpPolicy};
use aes::cipher::{KeyIvInit, StreamCipher};
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use ring::hmac;
use std::sync::Arc;
use zeroize::Zeroizing;
use zgate_protocol::packet::{MediaHeader, RTP_HEADER_SIZE};
use zgate_protocol::Direction;

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type Aes192Ctr = ctr::Ctr128BE<aes::Aes192>;
type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// Session salt length (112 bits)
const SESSION_SALT_LEN: usize = 14;

/// Full HMAC-SHA1 output length
const SHA1_OUTPUT_LEN: usize = 20;

/// Key derivation labels
const LABEL_CIPHER_KEY: u8 = 0x00;
const LABEL_AUTH_KEY: u8 = 0x01;
const LABEL_SALT: u8 = 0x02;

/// Half of the 16-bit RTP sequence space
const SEQ_HALF: u16 = 0x8000;

/// XOR `data` with the AES-CTR keystream for `key` and `iv`
fn apply_keystream(key: &[u8], iv: &[u8; 16], data: &mut [u8]) -> Result<(), CryptoError> {
    match key.len() {
        16 => Aes128Ctr::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?
            .apply_keystream(data),
        24 => Aes192Ctr::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?
            .apply_keystream(data),
        32 => Aes256Ctr::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?
            .apply_keystream(data),
        n => return Err(CryptoError::InvalidKeyLength(n)),
    }
    Ok(())
}

/// AES-CM PRF with index 0: keystream under IV = (salt XOR label<<48) || 0x0000
fn derive_session_key(
    master_key: &[u8],
    master_salt: &[u8; SESSION_SALT_LEN],
    label: u8,
    len: usize,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mut iv = [0u8; 16];
    iv[..SESSION_SALT_LEN].copy_from_slice(master_salt);
    iv[7] ^= label;

    let mut out = Zeroizing::new(vec![0u8; len]);
    apply_keystream(master_key, &iv, &mut out)?;
    Ok(out)
}

/// Rollover counter tracking (RFC 3711, 3.3.1)
#[derive(Debug, Default)]
struct RocState {
    roc: u32,
    highest_seq: u16,
    initialized: bool,
}

impl RocState {
    /// Estimate the rollover counter for `seq` without committing it
    fn estimate(&self, seq: u16) -> u32 {
        if !self.initialized {
            return self.roc;
        }
        let s_l = self.highest_seq;
        if s_l < SEQ_HALF {
            if seq > s_l && seq - s_l > SEQ_HALF {
                self.roc.wrapping_sub(1)
            } else {
                self.roc
            }
        } else if s_l - SEQ_HALF > seq {
            self.roc.wrapping_add(1)
        } else {
            self.roc
        }
    }

    /// Record that `seq` was processed under rollover counter `roc`
    fn commit(&mut self, seq: u16, roc: u32) {
        if !self.initialized {
            self.initialized = true;
            self.highest_seq = seq;
            self.roc = roc;
        } else if roc == self.roc.wrapping_add(1) {
            self.roc = roc;
            self.highest_seq = seq;
        } else if roc == self.roc && seq > self.highest_seq {
            self.highest_seq = seq;
        }
    }
}

/// Keyed transform for one direction of one media stream
pub struct SrtpTransform {
    direction: Direction,
    policy: SrtpPolicy,
    cipher_key: Zeroizing<Vec<u8>>,
    auth_key: hmac::Key,
    session_salt: Zeroizing<[u8; SESSION_SALT_LEN]>,
    state: Mutex<RocState>,
}

impl SrtpTransform {
    /// Derive session keys and build a transform
    pub fn new(
        direction: Direction,
        master_key: &[u8],
        master_salt: &[u8],
        policy: &SrtpPolicy,
    ) -> Result<Self, CryptoError> {
        validate(policy)?;

        if master_key.len() < policy.enc_key_len {
            return Err(CryptoError::KeyMaterialTooShort {
                what: "cipher key",
                needed: policy.enc_key_len,
                available: master_key.len(),
            });
        }
        if master_salt.len() < policy.salt_len {
            return Err(CryptoError::KeyMaterialTooShort {
                what: "salt",
                needed: policy.salt_len,
                available: master_salt.len(),
            });
        }

        let master_key = &master_key[..policy.enc_key_len];

        // Shorter salts are right-aligned in the 112-bit salt field
        let mut padded_salt = Zeroizing::new([0u8; SESSION_SALT_LEN]);
        padded_salt[SESSION_SALT_LEN - policy.salt_len..]
            .copy_from_slice(&master_salt[..policy.salt_len]);

        let cipher_key =
            derive_session_key(master_key, &padded_salt, LABEL_CIPHER_KEY, policy.enc_key_len)?;
        let auth_key =
            derive_session_key(master_key, &padded_salt, LABEL_AUTH_KEY, policy.auth_key_len)?;
        let salt = derive_session_key(master_key, &padded_salt, LABEL_SALT, SESSION_SALT_LEN)?;

        let mut session_salt = Zeroizing::new([0u8; SESSION_SALT_LEN]);
        session_salt.copy_from_slice(&salt);

        Ok(SrtpTransform {
            direction,
            policy: *policy,
            cipher_key,
            auth_key: hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, &auth_key),
            session_salt,
            state: Mutex::new(RocState::default()),
        })
    }

    /// IV = (session_salt * 2^16) XOR (SSRC * 2^64) XOR (index * 2^16)
    fn packet_iv(&self, ssrc: u32, roc: u32, seq: u16) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[4..8].copy_from_slice(&ssrc.to_be_bytes());
        iv[8..12].copy_from_slice(&roc.to_be_bytes());
        iv[12..14].copy_from_slice(&seq.to_be_bytes());
        for (b, s) in iv.iter_mut().zip(self.session_salt.iter()) {
            *b ^= s;
        }
        iv
    }

    fn auth_tag(&self, authenticated: &[u8], roc: u32) -> Vec<u8> {
        let mut ctx = hmac::Context::with_key(&self.auth_key);
        ctx.update(authenticated);
        ctx.update(&roc.to_be_bytes());
        let tag = ctx.sign();
        tag.as_ref()[..self.policy.auth_tag_len].to_vec()
    }

    fn protect(&self, packet: &[u8]) -> Result<Bytes, CryptoError> {
        let header = MediaHeader::parse(packet)?;

        let roc = {
            let mut state = self.state.lock();
            let roc = state.estimate(header.seq);
            state.commit(header.seq, roc);
            roc
        };

        let mut out = BytesMut::with_capacity(packet.len() + self.policy.auth_tag_len);
        out.put_slice(packet);

        let iv = self.packet_iv(header.ssrc, roc, header.seq);
        apply_keystream(&self.cipher_key, &iv, &mut out[header.header_len..])?;

        let tag = self.auth_tag(&out, roc);
        out.put_slice(&tag);
        Ok(out.freeze())
    }

    fn unprotect(&self, packet: &[u8]) -> Result<Bytes, CryptoError> {
        let tag_len = self.policy.auth_tag_len;
        if packet.len() < RTP_HEADER_SIZE + tag_len {
            return Err(CryptoError::MalformedPacket(
                zgate_protocol::PacketError::InsufficientData {
                    expected: RTP_HEADER_SIZE + tag_len,
                    actual: packet.len(),
                },
            ));
        }

        let (authenticated, received_tag) = packet.split_at(packet.len() - tag_len);
        let header = MediaHeader::parse(authenticated)?;

        // one guard from estimate to commit
        let roc = {
            let mut state = self.state.lock();
            let roc = state.estimate(header.seq);
            let expected_tag = self.auth_tag(authenticated, roc);
            if !constant_time_eq(&expected_tag, received_tag) {
                return Err(CryptoError::AuthenticationFailed);
            }
            state.commit(header.seq, roc);
            roc
        };

        let mut out = BytesMut::from(authenticated);
        let iv = self.packet_iv(header.ssrc, roc, header.seq);
        apply_keystream(&self.cipher_key, &iv, &mut out[header.header_len..])?;
        Ok(out.freeze())
    }
}

impl KeyedTransform for SrtpTransform {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn policy(&self) -> &SrtpPolicy {
        &self.policy
    }

    fn apply(&self, packet: &[u8]) -> Result<Bytes, CryptoError> {
        match self.direction {
            Direction::Sender => self.protect(packet),
            Direction::Receiver => self.unprotect(packet),
        }
    }
}

fn validate(policy: &SrtpPolicy) -> Result<(), CryptoError> {
    match policy.cipher {
        CipherMode::AesCounter => {
            if !matches!(policy.enc_key_len, 16 | 24 | 32) {
                return Err(CryptoError::InvalidKeyLength(policy.enc_key_len));
            }
        }
    }
    match policy.auth {
        AuthMode::HmacSha1 => {
            if policy.auth_key_len == 0
                || policy.auth_tag_len == 0
                || policy.auth_tag_len > SHA1_OUTPUT_LEN
            {
                return Err(CryptoError::InvalidAuthParameters {
                    key_len: policy.auth_key_len,
                    tag_len: policy.auth_tag_len,
                });
            }
        }
    }
    if policy.salt_len == 0 || policy.salt_len > SESSION_SALT_LEN {
        return Err(CryptoError::InvalidSaltLength(policy.salt_len));
    }
    Ok(())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Default backend producing [`SrtpTransform`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct SrtpBackend;

impl SrtpBackend {
    pub fn new() -> Self {
        SrtpBackend
    }
}

impl CryptoBackend for SrtpBackend {
    fn name(&self) -> &str {
        "aes-cm/hmac-sha1"
    }

    fn create_transform(
        &self,
        direction: Direction,
        key: &[u8],
        salt: &[u8],
        policy: &SrtpPolicy,
    ) -> Result<Arc<dyn KeyedTransform>, CryptoError> {
        Ok(Arc::new(SrtpTransform::new(direction, key, salt, policy)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtp(seq: u16, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0x80, 0x00];
        buf.extend_from_slice(&seq.to_be_bytes());
        buf.extend_from_slice(&1000u32.to_be_bytes());
        buf.extend_from_slice(&0xABCD_0001u32.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    fn pair(policy: &SrtpPolicy) -> (SrtpTransform, SrtpTransform) {
        let key = vec![0x2B; policy.enc_key_len];
        let salt = vec![0x11; policy.salt_len];
        let tx = SrtpTransform::new(Direction::Sender, &key, &salt, policy).unwrap();
        let rx = SrtpTransform::new(Direction::Receiver, &key, &salt, policy).unwrap();
        (tx, rx)
    }

    #[test]
    fn test_protect_unprotect_roundtrip() {
        let policy = SrtpPolicy::aes_cm_hmac_sha1(16, 10, 14);
        let (tx, rx) = pair(&policy);

        let packet = rtp(1, b"voice frame payload");
        let protected = tx.apply(&packet).unwrap();

        assert_eq!(protected.len(), packet.len() + 10);
        assert_eq!(&protected[..RTP_HEADER_SIZE], &packet[..RTP_HEADER_SIZE]);
        assert_ne!(&protected[RTP_HEADER_SIZE..packet.len()], &packet[RTP_HEADER_SIZE..]);

        let plain = rx.apply(&protected).unwrap();
        assert_eq!(&plain[..], &packet[..]);
    }

    #[test]
    fn test_aes256_short_tag() {
        let policy = SrtpPolicy::aes_cm_hmac_sha1(32, 4, 14);
        let (tx, rx) = pair(&policy);

        for seq in 100..110u16 {
            let packet = rtp(seq, &[seq as u8; 40]);
            let protected = tx.apply(&packet).unwrap();
            assert_eq!(rx.apply(&protected).unwrap(), Bytes::from(packet));
        }
    }

    #[test]
    fn test_tampered_packet_rejected() {
        let policy = SrtpPolicy::aes_cm_hmac_sha1(16, 10, 14);
        let (tx, rx) = pair(&policy);

        let mut protected = tx.apply(&rtp(5, b"payload")).unwrap().to_vec();
        protected[RTP_HEADER_SIZE] ^= 0x80;

        assert_eq!(rx.apply(&protected), Err(CryptoError::AuthenticationFailed));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let policy = SrtpPolicy::aes_cm_hmac_sha1(16, 10, 14);
        let tx = SrtpTransform::new(Direction::Sender, &[1; 16], &[2; 14], &policy).unwrap();
        let rx = SrtpTransform::new(Direction::Receiver, &[3; 16], &[2; 14], &policy).unwrap();

        let protected = tx.apply(&rtp(1, b"hello")).unwrap();
        assert_eq!(rx.apply(&protected), Err(CryptoError::AuthenticationFailed));
    }

    #[test]
    fn test_rollover_across_sequence_wrap() {
        let policy = SrtpPolicy::aes_cm_hmac_sha1(16, 10, 14);
        let (tx, rx) = pair(&policy);

        for seq in [0xFFFD, 0xFFFE, 0xFFFF, 0, 1, 2] {
            let packet = rtp(seq, b"wrap");
            let protected = tx.apply(&packet).unwrap();
            assert_eq!(&rx.apply(&protected).unwrap()[..], &packet[..]);
        }
        assert_eq!(tx.state.lock().roc, 1);
        assert_eq!(rx.state.lock().roc, 1);
    }

    #[test]
    fn test_concurrent_receivers_across_wrap() {
        let policy = SrtpPolicy::aes_cm_hmac_sha1(16, 10, 14);
        let (tx, rx) = pair(&policy);
        let rx = std::sync::Arc::new(rx);

        let protected: Vec<(Vec<u8>, Bytes)> = (0..512u32)
            .map(|i| {
                let packet = rtp((0xFF00 + i) as u16, b"shared receiver");
                let out = tx.apply(&packet).unwrap();
                (packet, out)
            })
            .collect();
        let protected = std::sync::Arc::new(protected);

        let workers: Vec<_> = (0..2)
            .map(|lane| {
                let rx = std::sync::Arc::clone(&rx);
                let protected = std::sync::Arc::clone(&protected);
                std::thread::spawn(move || {
                    for (packet, out) in protected.iter().skip(lane).step_by(2) {
                        assert_eq!(&rx.apply(out).unwrap()[..], &packet[..]);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(rx.state.lock().roc, 1);
    }

    #[test]
    fn test_invalid_policies_rejected() {
        let bad_key = SrtpPolicy::aes_cm_hmac_sha1(20, 10, 14);
        assert_eq!(
            SrtpTransform::new(Direction::Sender, &[0; 20], &[0; 14], &bad_key).err(),
            Some(CryptoError::InvalidKeyLength(20))
        );

        let bad_tag = SrtpPolicy::aes_cm_hmac_sha1(16, 21, 14);
        assert!(matches!(
            SrtpTransform::new(Direction::Sender, &[0; 16], &[0; 14], &bad_tag),
            Err(CryptoError::InvalidAuthParameters { .. })
        ));

        let bad_salt = SrtpPolicy::aes_cm_hmac_sha1(16, 10, 0);
        assert_eq!(
            SrtpTransform::new(Direction::Sender, &[0; 16], &[], &bad_salt).err(),
            Some(CryptoError::InvalidSaltLength(0))
        );
    }

    #[test]
    fn test_short_key_material_rejected() {
        let policy = SrtpPolicy::aes_cm_hmac_sha1(16, 10, 14);
        assert!(matches!(
            SrtpTransform::new(Direction::Sender, &[0; 8], &[0; 14], &policy),
            Err(CryptoError::KeyMaterialTooShort { what: "cipher key", .. })
        ));
    }

    #[test]
    fn test_truncated_packets() {
        let policy = SrtpPolicy::aes_cm_hmac_sha1(16, 10, 14);
        let (tx, rx) = pair(&policy);

        assert!(matches!(tx.apply(&[0x80, 0]), Err(CryptoError::MalformedPacket(_))));
        assert!(matches!(rx.apply(&[0x80; 15]), Err(CryptoError::MalformedPacket(_))));
    }

    #[test]
    fn test_roc_estimate() {
        let mut state = RocState::default();
        state.commit(0xFFF0, 0);
        assert_eq!(state.estimate(0xFFF5), 0);
        assert_eq!(state.estimate(0x0003), 1);

        state.commit(0x0003, 1);
        assert_eq!(state.estimate(0xFFF8), 0); // late packet from the previous cycle
        assert_eq!(state.estimate(0x0010), 1);
    }
}
