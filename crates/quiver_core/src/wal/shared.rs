//! Shared, reference-counted form of a replicated WAL record.

use super::packed::PackedReader;
use super::record::WalRecord;
use crate::error::CoreResult;
use crate::types::Lsn;
use bytes::{BufMut, Bytes, BytesMut};

/// Immutable buffer holding one record with its LSNs and namespace name.
///
/// Layout: `upstream_lsn: i64 | origin_lsn: i64 | u32 len + namespace name |
/// u32 len + packed record`. Clones share the same allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedWalRecord {
    buf: Bytes,
}

/// Borrowed, decoded header of a [`SharedWalRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedWalRecordView<'a> {
    /// LSN in the upstream stream.
    pub upstream_lsn: Lsn,
    /// LSN in the originating namespace.
    pub origin_lsn: Lsn,
    /// Namespace the record belongs to.
    pub ns_name: &'a str,
    /// Packed record bytes.
    pub packed: &'a [u8],
}

impl SharedWalRecordView<'_> {
    /// Decodes the inner record.
    pub fn record(&self) -> CoreResult<WalRecord> {
        WalRecord::unpack(self.packed)
    }
}

impl SharedWalRecord {
    /// Builds the shared form of `record`.
    #[must_use]
    pub fn new(upstream_lsn: Lsn, origin_lsn: Lsn, ns_name: &str, record: &WalRecord) -> Self {
        let mut packed = Vec::new();
        record.pack_into(&mut packed);

        let mut buf = BytesMut::with_capacity(16 + 8 + ns_name.len() + packed.len());
        buf.put_i64_le(upstream_lsn.as_i64());
        buf.put_i64_le(origin_lsn.as_i64());
        buf.put_u32_le(ns_name.len() as u32);
        buf.put_slice(ns_name.as_bytes());
        buf.put_u32_le(packed.len() as u32);
        buf.put_slice(&packed);
        Self { buf: buf.freeze() }
    }

    /// Wraps bytes read back from a journal. Validated lazily by
    /// [`unpack`](Self::unpack).
    #[must_use]
    pub fn from_bytes(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Decodes the header fields.
    pub fn unpack(&self) -> CoreResult<SharedWalRecordView<'_>> {
        let mut r = PackedReader::new(&self.buf);
        let upstream_lsn = Lsn::from_raw(r.i64()?);
        let origin_lsn = Lsn::from_raw(r.i64()?);
        let ns_name = r.str()?;
        let packed = r.bytes()?;
        r.finish("shared")?;
        Ok(SharedWalRecordView {
            upstream_lsn,
            origin_lsn,
            ns_name,
            packed,
        })
    }

    /// Decodes the inner record.
    pub fn record(&self) -> CoreResult<WalRecord> {
        self.unpack()?.record()
    }

    /// The underlying bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &Bytes {
        &self.buf
    }

    /// Returns true when both handles point at the same allocation.
    #[must_use]
    pub fn shares_buffer_with(&self, other: &Self) -> bool {
        self.buf.as_ptr() == other.buf.as_ptr() && self.buf.len() == other.buf.len()
    }
}

impl WalRecord {
    /// Builds the shared form of this record for namespace `ns_name`.
    #[must_use]
    pub fn get_shared(&self, lsn: Lsn, upstream_lsn: Lsn, ns_name: &str) -> SharedWalRecord {
        SharedWalRecord::new(upstream_lsn, lsn, ns_name, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServerId;
    use crate::wal::ModifyMode;

    #[test]
    fn unpack_fields() {
        let rec = WalRecord::item_modify(b"{}".to_vec(), 1, ModifyMode::Update, false);
        let lsn = Lsn::new(ServerId::new(1), 10);
        let shared = rec.get_shared(lsn, Lsn::EMPTY, "items");

        let view = shared.unpack().unwrap();
        assert_eq!(view.origin_lsn, lsn);
        assert_eq!(view.upstream_lsn, Lsn::EMPTY);
        assert_eq!(view.ns_name, "items");
        assert_eq!(view.record().unwrap(), rec);
    }

    #[test]
    fn header_layout() {
        let shared = WalRecord::empty().get_shared(Lsn::from_raw(2), Lsn::from_raw(1), "n");
        let bytes = shared.as_bytes();
        assert_eq!(&bytes[..8], &1i64.to_le_bytes());
        assert_eq!(&bytes[8..16], &2i64.to_le_bytes());
        assert_eq!(&bytes[16..21], &[1, 0, 0, 0, b'n']);
        assert_eq!(&bytes[21..], &[0, 0, 0, 0]);
    }

    #[test]
    fn clones_share_buffer() {
        let a = WalRecord::namespace_drop().get_shared(Lsn::from_raw(1), Lsn::EMPTY, "x");
        let b = a.clone();
        assert!(a.shares_buffer_with(&b));

        let c = WalRecord::namespace_drop().get_shared(Lsn::from_raw(1), Lsn::EMPTY, "x");
        assert_eq!(a, c);
        assert!(!a.shares_buffer_with(&c));
    }

    #[test]
    fn corrupt_buffer() {
        let shared = SharedWalRecord::from_bytes(Bytes::from_static(&[1, 2, 3]));
        assert!(shared.unpack().is_err());
    }
}
