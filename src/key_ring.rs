use std::fmt;

use crate::crypto::SecureKey;

/// Which slot of the ring a key occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyEpoch {
    /// Used for every new encryption
    Current,
    /// Rotated-in key, accepted for decryption only
    Next,
}

impl fmt::Display for KeyEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyEpoch::Current => write!(f, "current"),
            KeyEpoch::Next => write!(f, "next"),
        }
    }
}

/// Immutable set of at most two keys, built once at startup and shared.
///
/// Rotation is done by restarting with the new key as `current` and the old
/// one as `next`: writes move to the new key immediately, reads keep
/// accepting envelopes made under the old key until they are rewritten.
#[derive(Clone, Default)]
pub struct KeyRing {
    current: Option<SecureKey>,
    next: Option<SecureKey>,
}

impl KeyRing {
    pub fn new(current: Option<SecureKey>, next: Option<SecureKey>) -> Self {
        Self { current, next }
    }

    /// Ring with a single current key
    pub fn with_current(current: SecureKey) -> Self {
        Self::new(Some(current), None)
    }

    /// Ring with no keys; encryption fails, only passthrough values decrypt
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn current_key(&self) -> Option<&SecureKey> {
        self.current.as_ref()
    }

    /// Keys to try when decrypting: current first, then next
    pub fn keys_in_trial_order(&self) -> Vec<(KeyEpoch, &SecureKey)> {
        let mut keys = Vec::with_capacity(2);
        if let Some(key) = &self.current {
            keys.push((KeyEpoch::Current, key));
        }
        if let Some(key) = &self.next {
            keys.push((KeyEpoch::Next, key));
        }
        keys
    }

    /// `epoch:fingerprint` pairs, safe to log
    pub fn describe(&self) -> Vec<String> {
        self.keys_in_trial_order()
            .into_iter()
            .map(|(epoch, key)| format!("{}:{}", epoch, key.fingerprint()))
            .collect()
    }
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing")
            .field("keys", &self.describe())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trial_order_current_then_next() {
        let current = SecureKey::generate();
        let next = SecureKey::generate();
        let ring = KeyRing::new(Some(current.clone()), Some(next.clone()));

        let order = ring.keys_in_trial_order();
        assert_eq!(order.len(), 2);
        assert_eq!(order[0].0, KeyEpoch::Current);
        assert_eq!(order[0].1.as_bytes(), current.as_bytes());
        assert_eq!(order[1].0, KeyEpoch::Next);
        assert_eq!(order[1].1.as_bytes(), next.as_bytes());
    }

    #[test]
    fn test_single_key_ring() {
        let ring = KeyRing::with_current(SecureKey::generate());
        assert!(ring.current_key().is_some());
        assert_eq!(ring.keys_in_trial_order().len(), 1);
    }

    #[test]
    fn test_empty_ring() {
        let ring = KeyRing::empty();
        assert!(ring.current_key().is_none());
        assert!(ring.keys_in_trial_order().is_empty());
    }

    #[test]
    fn test_next_only_ring_still_decrypts_with_next() {
        let ring = KeyRing::new(None, Some(SecureKey::generate()));
        assert!(ring.current_key().is_none());
        let order = ring.keys_in_trial_order();
        assert_eq!(order.len(), 1);
        assert_eq!(order[0].0, KeyEpoch::Next);
    }

    #[test]
    fn test_debug_shows_fingerprints_only() {
        let key = SecureKey::generate();
        let ring = KeyRing::with_current(key.clone());
        let printed = format!("{:?}", ring);
        assert!(printed.contains(&format!("current:{}", key.fingerprint())));
        assert!(!printed.contains(&hex::encode(key.as_bytes())));
    }
}
