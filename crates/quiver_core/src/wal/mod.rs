//! Write-ahead log record model.
//!
//! Every namespace mutation is described by a [`WalRecord`]. Records have
//! three encodings:
//!
//! - the packed form, stored in a namespace's local WAL ring
//! - the marked packed form, prefixed with the originating server id
//! - the shared form, a reference-counted buffer carrying LSNs and the
//!   namespace name, handed to replication consumers and the journal

mod dump;
mod journal;
mod packed;
mod record;
mod shared;

pub use journal::{read_journal, JournalContents, WalJournal};
pub use packed::{MarkedPackedWalRecord, PackedWalRecord, IN_TRANSACTION_FLAG};
pub use record::{ModifyMode, WalPayload, WalRecord, WalRecordType};
pub use shared::{SharedWalRecord, SharedWalRecordView};
