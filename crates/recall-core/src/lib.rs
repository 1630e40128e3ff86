//! Recovery of chat history from a messaging client's encrypted local store.
//!
//! The pieces, leaves first:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  ExportOrchestrator (export)                                 │
//! │  ├── PageCipher (cipher)        decrypt every container      │
//! │  ├── attachment / voice / avatar phases                      │
//! │  └── ProgressSink               0..100 over one channel      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  export_conversation            one talker, new account tree │
//! ├──────────────────────────────────────────────────────────────┤
//! │  MessageProvider (store)                                     │
//! │  └── ShardedMessageStore        directional paging           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  KeyCandidateScanner (keyscan) + ProcessMemoryReader (memory)│
//! │  account                        live client to account dir   │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod account;
pub mod cipher;
pub mod error;
pub mod export;
pub mod imagedat;
pub mod key;
pub mod keyscan;
pub mod memory;
pub mod paths;
pub mod settings;
pub mod store;

pub use cipher::{CipherParams, PageCipher};
pub use error::{RecallError, Result};
pub use export::{ExportOrchestrator, ExportRequest, ProgressEvent, VoiceTranscoder};
pub use key::KeyMaterial;
pub use keyscan::{find_key_candidates, recover_key, scan};
pub use memory::ProcessMemoryReader;
pub use settings::RecallSettings;
pub use store::{Direction, MessageFilter, MessageProvider, MessageRecord, ShardedMessageStore};
