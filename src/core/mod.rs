//! # Core Wire Components
//!
//! Low-level encoding shared by every part of the worker protocol.
//!
//! ## Components
//! - **Wire**: Fixed-width integers, booleans and padded byte strings
//! - **Framed**: Chunked stream decoder used for bulk uploads
//! - **Narinfo**: Store path metadata records
//!
//! ## Wire Format
//! ```text
//! u64:    [value LE(8)]
//! bool:   u64 0 or 1
//! string: [len LE(8)] [bytes(len)] [zero padding to a multiple of 8]
//! list:   [count LE(8)] [string]*
//! framed: ([len LE(8)] [bytes(len)])* [0 LE(8)]
//! ```
//!
//! ## Security
//! - Every string read carries a caller-supplied maximum length
//! - Frame lengths are capped before any allocation

pub mod framed;
pub mod narinfo;
pub mod wire;
