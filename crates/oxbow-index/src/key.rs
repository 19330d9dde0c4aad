//! Fixed-width index keys and comparators.

use std::cmp::Ordering;

/// A fixed-width key storable in B+ tree node pages.
///
/// Keys serialize into exactly `ENCODED_LEN` bytes inside the slotted
/// entry arrays; the tree never interprets them beyond the comparator.
pub trait IndexKey: Copy + Default + Send + Sync + std::fmt::Debug + 'static {
    /// Serialized size in bytes.
    const ENCODED_LEN: usize;

    /// Serializes into `buf`, which must be at least `ENCODED_LEN` bytes.
    fn encode(&self, buf: &mut [u8]);

    /// Deserializes from `buf`, which must be at least `ENCODED_LEN` bytes.
    fn decode(buf: &[u8]) -> Self;
}

/// Opaque fixed-width key of `N` bytes (4, 8, 16, 32, or 64 in practice).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenericKey<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> GenericKey<N> {
    /// Builds a key from an integer, little-endian, zero-padded or
    /// truncated to `N` bytes.
    pub fn from_i64(value: i64) -> Self {
        let mut data = [0u8; N];
        let bytes = value.to_le_bytes();
        let len = N.min(8);
        data[..len].copy_from_slice(&bytes[..len]);
        Self { data }
    }

    /// Reads the key back as an integer (low `min(N, 8)` bytes,
    /// zero-extended).
    pub fn to_i64(&self) -> i64 {
        let mut bytes = [0u8; 8];
        let len = N.min(8);
        bytes[..len].copy_from_slice(&self.data[..len]);
        i64::from_le_bytes(bytes)
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.data
    }
}

impl<const N: usize> Default for GenericKey<N> {
    fn default() -> Self {
        Self { data: [0u8; N] }
    }
}

impl<const N: usize> std::fmt::Debug for GenericKey<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GenericKey<{}>({})", N, self.to_i64())
    }
}

impl<const N: usize> std::fmt::Display for GenericKey<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_i64())
    }
}

impl<const N: usize> IndexKey for GenericKey<N> {
    const ENCODED_LEN: usize = N;

    fn encode(&self, buf: &mut [u8]) {
        buf[..N].copy_from_slice(&self.data);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut data = [0u8; N];
        data.copy_from_slice(&buf[..N]);
        Self { data }
    }
}

/// Total order over keys.
pub trait KeyComparator<K>: Clone + Send + Sync + 'static {
    /// Compares two keys.
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Comparator for [`GenericKey`] interpreting the leading bytes as a
/// little-endian `i64`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericComparator;

impl<const N: usize> KeyComparator<GenericKey<N>> for GenericComparator {
    fn compare(&self, a: &GenericKey<N>, b: &GenericKey<N>) -> Ordering {
        a.to_i64().cmp(&b.to_i64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_key_from_to_i64() {
        let key = GenericKey::<8>::from_i64(42);
        assert_eq!(key.to_i64(), 42);

        let key = GenericKey::<8>::from_i64(-1);
        assert_eq!(key.to_i64(), -1);

        let key = GenericKey::<8>::from_i64(i64::MAX);
        assert_eq!(key.to_i64(), i64::MAX);
    }

    #[test]
    fn test_generic_key_wide() {
        let key = GenericKey::<16>::from_i64(1234);
        assert_eq!(key.to_i64(), 1234);
        assert_eq!(key.as_bytes()[8..], [0u8; 8]);

        let key = GenericKey::<64>::from_i64(99);
        assert_eq!(key.to_i64(), 99);
    }

    #[test]
    fn test_generic_key_narrow() {
        // 4-byte keys hold small non-negative integers faithfully
        let key = GenericKey::<4>::from_i64(100_000);
        assert_eq!(key.to_i64(), 100_000);
    }

    #[test]
    fn test_generic_key_default() {
        let key = GenericKey::<8>::default();
        assert_eq!(key.to_i64(), 0);
        assert_eq!(key.as_bytes(), &[0u8; 8]);
    }

    #[test]
    fn test_generic_key_encode_decode() {
        let key = GenericKey::<8>::from_i64(7777);
        let mut buf = [0u8; 8];
        key.encode(&mut buf);
        let decoded = GenericKey::<8>::decode(&buf);
        assert_eq!(decoded, key);
        assert_eq!(decoded.to_i64(), 7777);
    }

    #[test]
    fn test_generic_key_encoded_len() {
        assert_eq!(GenericKey::<4>::ENCODED_LEN, 4);
        assert_eq!(GenericKey::<8>::ENCODED_LEN, 8);
        assert_eq!(GenericKey::<16>::ENCODED_LEN, 16);
        assert_eq!(GenericKey::<32>::ENCODED_LEN, 32);
        assert_eq!(GenericKey::<64>::ENCODED_LEN, 64);
    }

    #[test]
    fn test_generic_comparator() {
        let cmp = GenericComparator;
        let a = GenericKey::<8>::from_i64(1);
        let b = GenericKey::<8>::from_i64(2);

        assert_eq!(cmp.compare(&a, &b), Ordering::Less);
        assert_eq!(cmp.compare(&b, &a), Ordering::Greater);
        assert_eq!(cmp.compare(&a, &a), Ordering::Equal);
    }

    #[test]
    fn test_generic_comparator_negative() {
        let cmp = GenericComparator;
        let a = GenericKey::<8>::from_i64(-10);
        let b = GenericKey::<8>::from_i64(3);
        assert_eq!(cmp.compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_generic_key_display() {
        let key = GenericKey::<8>::from_i64(321);
        assert_eq!(key.to_string(), "321");
        assert_eq!(format!("{:?}", key), "GenericKey<8>(321)");
    }
}
