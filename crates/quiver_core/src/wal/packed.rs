//! Packed binary form of WAL records.
//!
//! Layout (little endian, no padding):
//!
//! ```text
//! Empty record:  zero bytes
//! Otherwise:     tag: u8 (bit 7 set when in a transaction)
//!                fields in declaration order
//!                  ItemId, tm_version: i32
//!                  mode:               u8
//!                  strings, bytes:     u32 length + bytes
//! ```

use super::record::{ModifyMode, WalPayload, WalRecord, WalRecordType};
use crate::error::{CoreError, CoreResult};
use crate::types::{ItemId, ServerId};

/// Tag bit marking a record written inside a transaction.
pub const IN_TRANSACTION_FLAG: u8 = 0x80;

fn put_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    // Lengths above u32::MAX cannot be produced by the namespace layer.
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(data);
}

impl WalRecord {
    /// Appends the packed form of this record to `buf`.
    pub fn pack_into(&self, buf: &mut Vec<u8>) {
        let tag = self.record_type().as_byte();
        if tag == WalRecordType::Empty.as_byte() {
            return;
        }
        buf.push(if self.in_transaction {
            tag | IN_TRANSACTION_FLAG
        } else {
            tag
        });

        match &self.payload {
            WalPayload::Empty
            | WalPayload::NamespaceDrop
            | WalPayload::InitTransaction
            | WalPayload::CommitTransaction
            | WalPayload::ResetLocalWal => {}

            WalPayload::ItemUpdate { id } => {
                buf.extend_from_slice(&id.as_i32().to_le_bytes());
            }

            WalPayload::ItemModify {
                cjson,
                tm_version,
                mode,
            } => {
                put_bytes(buf, cjson);
                buf.extend_from_slice(&tm_version.to_le_bytes());
                buf.push(mode.as_byte());
            }

            WalPayload::PutMeta { key, value } => {
                put_bytes(buf, key.as_bytes());
                put_bytes(buf, value.as_bytes());
            }

            WalPayload::RawItem { id, cjson } => {
                buf.extend_from_slice(&id.as_i32().to_le_bytes());
                put_bytes(buf, cjson);
            }

            WalPayload::TagsMatcher { data } => put_bytes(buf, data),

            WalPayload::ReplState { state: text }
            | WalPayload::IndexAdd { index: text }
            | WalPayload::IndexDrop { index: text }
            | WalPayload::IndexUpdate { index: text }
            | WalPayload::UpdateQuery { query: text }
            | WalPayload::NamespaceAdd { definition: text }
            | WalPayload::NamespaceRename { new_name: text }
            | WalPayload::ForceSync { definition: text }
            | WalPayload::SetSchema { schema: text }
            | WalPayload::WalSync { state: text } => put_bytes(buf, text.as_bytes()),
        }
    }

    /// Returns the packed form of this record.
    #[must_use]
    pub fn pack(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.pack_into(&mut buf);
        buf
    }

    /// Decodes a packed record.
    pub fn unpack(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.is_empty() {
            return Ok(Self::empty());
        }
        let tag = bytes[0];
        let in_transaction = tag & IN_TRANSACTION_FLAG != 0;
        let record_type = WalRecordType::from_byte(tag & !IN_TRANSACTION_FLAG).ok_or_else(|| {
            CoreError::wal_corruption(format!("unknown WAL record tag {tag:#04x}"))
        })?;

        let mut r = PackedReader::new(&bytes[1..]);
        let payload = match record_type {
            WalRecordType::Empty => WalPayload::Empty,
            WalRecordType::ReplState => WalPayload::ReplState {
                state: r.string()?,
            },
            WalRecordType::ItemUpdate => WalPayload::ItemUpdate {
                id: ItemId::new(r.i32()?),
            },
            WalRecordType::ItemModify => {
                let cjson = r.bytes()?.to_vec();
                let tm_version = r.i32()?;
                let mode_byte = r.u8()?;
                let mode = ModifyMode::from_byte(mode_byte).ok_or_else(|| {
                    CoreError::wal_corruption(format!("unknown modify mode {mode_byte}"))
                })?;
                WalPayload::ItemModify {
                    cjson,
                    tm_version,
                    mode,
                }
            }
            WalRecordType::IndexAdd => WalPayload::IndexAdd { index: r.string()? },
            WalRecordType::IndexDrop => WalPayload::IndexDrop { index: r.string()? },
            WalRecordType::IndexUpdate => WalPayload::IndexUpdate { index: r.string()? },
            WalRecordType::PutMeta => {
                let key = r.string()?;
                let value = r.string()?;
                WalPayload::PutMeta { key, value }
            }
            WalRecordType::UpdateQuery => WalPayload::UpdateQuery { query: r.string()? },
            WalRecordType::NamespaceAdd => WalPayload::NamespaceAdd {
                definition: r.string()?,
            },
            WalRecordType::NamespaceDrop => WalPayload::NamespaceDrop,
            WalRecordType::NamespaceRename => WalPayload::NamespaceRename {
                new_name: r.string()?,
            },
            WalRecordType::InitTransaction => WalPayload::InitTransaction,
            WalRecordType::CommitTransaction => WalPayload::CommitTransaction,
            WalRecordType::ForceSync => WalPayload::ForceSync {
                definition: r.string()?,
            },
            WalRecordType::SetSchema => WalPayload::SetSchema {
                schema: r.string()?,
            },
            WalRecordType::WalSync => WalPayload::WalSync {
                state: r.string()?,
            },
            WalRecordType::TagsMatcher => WalPayload::TagsMatcher {
                data: r.bytes()?.to_vec(),
            },
            WalRecordType::ResetLocalWal => WalPayload::ResetLocalWal,
            WalRecordType::RawItem => {
                let id = ItemId::new(r.i32()?);
                let cjson = r.bytes()?.to_vec();
                WalPayload::RawItem { id, cjson }
            }
        };

        r.finish(record_type)?;
        Ok(Self::from_parts(payload, in_transaction))
    }
}

/// Bounds-checked cursor over a packed record body.
pub(crate) struct PackedReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PackedReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn take(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                CoreError::wal_corruption(format!(
                    "unexpected end of record: need {n} bytes at offset {}, have {}",
                    self.pos,
                    self.data.len() - self.pos
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> CoreResult<[u8; N]> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub(crate) fn i16(&mut self) -> CoreResult<i16> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    pub(crate) fn i32(&mut self) -> CoreResult<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub(crate) fn u32(&mut self) -> CoreResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub(crate) fn i64(&mut self) -> CoreResult<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub(crate) fn bytes(&mut self) -> CoreResult<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    pub(crate) fn str(&mut self) -> CoreResult<&'a str> {
        let raw = self.bytes()?;
        std::str::from_utf8(raw)
            .map_err(|e| CoreError::wal_corruption(format!("invalid UTF-8 string: {e}")))
    }

    fn string(&mut self) -> CoreResult<String> {
        self.str().map(str::to_string)
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    pub(crate) fn finish(&self, what: impl std::fmt::Display) -> CoreResult<()> {
        if self.pos != self.data.len() {
            return Err(CoreError::wal_corruption(format!(
                "trailing bytes in {what} record: expected {} bytes, got {}",
                self.pos,
                self.data.len()
            )));
        }
        Ok(())
    }
}

/// A record in packed form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PackedWalRecord(Vec<u8>);

impl PackedWalRecord {
    /// Packs `record`.
    #[must_use]
    pub fn pack(record: &WalRecord) -> Self {
        Self(record.pack())
    }

    /// Wraps already packed bytes.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Decodes the record.
    pub fn unpack(&self) -> CoreResult<WalRecord> {
        WalRecord::unpack(&self.0)
    }

    /// Returns the packed bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Packed size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for a packed empty record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A packed record tagged with the server that produced it.
///
/// Serialized as the server id (`i16` LE) immediately followed by the packed
/// record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkedPackedWalRecord {
    /// Originating server.
    pub server: ServerId,
    /// Packed record.
    pub packed: PackedWalRecord,
}

impl MarkedPackedWalRecord {
    /// Packs `record` and marks it with `server`.
    #[must_use]
    pub fn pack(server: ServerId, record: &WalRecord) -> Self {
        Self {
            server,
            packed: PackedWalRecord::pack(record),
        }
    }

    /// Serializes server id and packed record.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.packed.len());
        out.extend_from_slice(&self.server.as_i16().to_le_bytes());
        out.extend_from_slice(self.packed.as_bytes());
        out
    }

    /// Parses the output of [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let mut r = PackedReader::new(bytes);
        let server = ServerId::new(r.i16()?);
        let packed = PackedWalRecord::from_bytes(r.rest().to_vec());
        Ok(Self { server, packed })
    }

    /// Decodes the inner record.
    pub fn unpack(&self) -> CoreResult<WalRecord> {
        self.packed.unpack()
    }
}
