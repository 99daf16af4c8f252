use log::{debug, warn};
use sha2::{Digest, Sha256};
use thiserror::Error;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::crypto::{update_prefixed, HASH_LEN};

/// Number of nonces tried between two checks of the stop signal and deadline
const POLL_INTERVAL: u64 = 1024;

/// Highest difficulty the sealer accepts (leading zero bits of a SHA-256 digest)
pub const MAX_DIFFICULTY: u32 = 255;

/// Errors that can occur while searching for a nonce
#[derive(Debug, Error)]
pub enum SealError {
    #[error("Sealing cancelled after {attempts} attempts")]
    Cancelled { attempts: u64 },

    #[error("Sealing timed out after {attempts} attempts")]
    TimedOut { attempts: u64 },

    #[error("Nonce space exhausted without meeting the target")]
    Exhausted,

    #[error("Invalid difficulty {0}: must be between 1 and 255")]
    InvalidDifficulty(u32),
}

/// Shared flag used to interrupt a running nonce search from another thread.
///
/// Once raised the signal stays raised; every later seal attempt through
/// the same sealer fails with [`SealError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a block's seal commits to, except the nonce itself
#[derive(Debug, Clone, Copy)]
pub struct SealContent<'a> {
    pub prev_hash: &'a [u8],
    pub tx_root: [u8; HASH_LEN],
    pub timestamp: i64,
    pub difficulty: u32,
}

impl SealContent<'_> {
    /// Computes `SHA-256(content || nonce)`
    pub fn digest(&self, nonce: u64) -> [u8; HASH_LEN] {
        let mut hasher = Sha256::new();
        update_prefixed(&mut hasher, self.prev_hash);
        hasher.update(self.tx_root);
        hasher.update(self.timestamp.to_be_bytes());
        hasher.update(self.difficulty.to_be_bytes());
        hasher.update(nonce.to_be_bytes());
        hasher.finalize().into()
    }
}

/// Result of a successful nonce search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seal {
    pub nonce: u64,
    pub hash: Vec<u8>,
    pub attempts: u64,
}

/// Proof-of-work sealer
#[derive(Debug, Clone)]
pub struct Sealer {
    /// Required number of leading zero bits in the digest
    difficulty: u32,

    /// Optional wall-clock budget for a single search
    timeout: Option<Duration>,

    /// External cancellation hook
    stop: StopSignal,
}

impl Sealer {
    pub fn new(difficulty: u32) -> Result<Self, SealError> {
        if difficulty == 0 || difficulty > MAX_DIFFICULTY {
            return Err(SealError::InvalidDifficulty(difficulty));
        }

        Ok(Sealer {
            difficulty,
            timeout: None,
            stop: StopSignal::new(),
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Searches nonces upward from zero until the digest meets the target
    /// recorded in `content`.
    ///
    /// Blocks the caller. The stop signal and the deadline are polled every
    /// [`POLL_INTERVAL`] attempts, including before the first one.
    pub fn seal(&self, content: &SealContent<'_>) -> Result<Seal, SealError> {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        let mut nonce: u64 = 0;

        loop {
            if nonce % POLL_INTERVAL == 0 {
                if self.stop.is_stopped() {
                    warn!("Sealing cancelled after {} attempts", nonce);
                    return Err(SealError::Cancelled { attempts: nonce });
                }

                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        warn!("Sealing timed out after {} attempts", nonce);
                        return Err(SealError::TimedOut { attempts: nonce });
                    }
                }
            }

            let digest = content.digest(nonce);
            if meets_target(&digest, content.difficulty) {
                debug!(
                    "Found nonce {} for difficulty {}: {}",
                    nonce,
                    content.difficulty,
                    hex::encode(digest)
                );
                return Ok(Seal {
                    nonce,
                    hash: digest.to_vec(),
                    attempts: nonce + 1,
                });
            }

            nonce = nonce.checked_add(1).ok_or(SealError::Exhausted)?;
        }
    }
}

/// Re-checks a stored seal without searching.
///
/// True when `hash` is the digest of `content` with `nonce` and that
/// digest meets the content's difficulty.
pub fn verify(content: &SealContent<'_>, nonce: u64, hash: &[u8]) -> bool {
    let digest = content.digest(nonce);
    digest.as_slice() == hash && meets_target(&digest, content.difficulty)
}

/// `digest < 2^(256 - difficulty)` as a big-endian integer, which is the
/// same as having at least `difficulty` leading zero bits.
pub fn meets_target(digest: &[u8], difficulty: u32) -> bool {
    leading_zero_bits(digest) >= difficulty
}

fn leading_zero_bits(digest: &[u8]) -> u32 {
    let mut bits = 0;
    for byte in digest {
        if *byte == 0 {
            bits += 8;
        } else {
            bits += byte.leading_zeros();
            break;
        }
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn content(prev_hash: &[u8]) -> SealContent<'_> {
        SealContent {
            prev_hash,
            tx_root: [7u8; HASH_LEN],
            timestamp: 1_700_000_000,
            difficulty: 8,
        }
    }

    #[test]
    fn test_leading_zero_bits() {
        assert_eq!(leading_zero_bits(&[0xff; 32]), 0);
        assert_eq!(leading_zero_bits(&[0x00, 0x01, 0xff]), 15);
        assert_eq!(leading_zero_bits(&[0x00, 0x00, 0x80]), 16);
        assert_eq!(leading_zero_bits(&[0u8; 32]), 256);
    }

    #[test]
    fn test_meets_target_boundary() {
        // 2^(256-12) has exactly 11 leading zero bits and is not below the target
        let mut at_target = [0u8; 32];
        at_target[1] = 0x10;
        assert!(!meets_target(&at_target, 12));

        let mut below_target = [0u8; 32];
        below_target[1] = 0x0f;
        below_target[31] = 0xff;
        assert!(meets_target(&below_target, 12));
    }

    #[test]
    fn test_seal_and_verify() {
        let sealer = Sealer::new(8).unwrap();
        let content = content(b"previous");

        let seal = sealer.seal(&content).unwrap();

        assert_eq!(seal.hash.len(), HASH_LEN);
        assert_eq!(seal.hash[0], 0);
        assert!(verify(&content, seal.nonce, &seal.hash));
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let sealer = Sealer::new(8).unwrap();
        let content = content(b"previous");
        let seal = sealer.seal(&content).unwrap();

        assert!(!verify(&content, seal.nonce + 1, &seal.hash));

        let mut tampered = content;
        tampered.tx_root[0] ^= 0x01;
        assert!(!verify(&tampered, seal.nonce, &seal.hash));

        let mut raised = content;
        raised.difficulty = 200;
        assert!(!verify(&raised, seal.nonce, &seal.hash));
    }

    #[test]
    fn test_stop_signal_cancels_search() {
        let stop = StopSignal::new();
        let sealer = Sealer::new(200).unwrap().with_stop_signal(stop.clone());
        stop.stop();

        let result = sealer.seal(&content(b"previous"));
        assert!(matches!(result, Err(SealError::Cancelled { attempts: 0 })));
    }

    #[test]
    fn test_timeout_interrupts_search() {
        let sealer = Sealer::new(200)
            .unwrap()
            .with_timeout(Some(Duration::from_millis(20)));

        let result = sealer.seal(&content(b"previous"));
        assert!(matches!(result, Err(SealError::TimedOut { .. })));
    }

    #[test]
    fn test_invalid_difficulty() {
        assert!(matches!(Sealer::new(0), Err(SealError::InvalidDifficulty(0))));
        assert!(matches!(Sealer::new(256), Err(SealError::InvalidDifficulty(256))));
    }

    proptest! {
        #[test]
        fn prop_sealed_content_verifies(prev in proptest::collection::vec(any::<u8>(), 0..64), timestamp: i64, flip in 0usize..HASH_LEN) {
            let sealer = Sealer::new(6).unwrap();
            let content = SealContent { prev_hash: &prev, tx_root: [3u8; HASH_LEN], timestamp, difficulty: 6 };
            let seal = sealer.seal(&content).unwrap();
            prop_assert!(verify(&content, seal.nonce, &seal.hash));

            let mut tampered = content;
            tampered.tx_root[flip] ^= 0x80;
            prop_assert!(!verify(&tampered, seal.nonce, &seal.hash));
        }
    }
}
