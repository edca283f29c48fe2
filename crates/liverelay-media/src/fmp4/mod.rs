//! Fragmented MP4 (fMP4) stream handling.
//!
//! Only top-level boxes are inspected: `ftyp`+`moov` become the
//! initialization segment and each `moof`+`mdat` pair becomes a fragment.

mod boxes;
mod splitter;

pub use boxes::{moof_sequence_number, BoxHeader, BoxType};
pub use splitter::{BoxSplitter, SplitEvent, DEFAULT_MAX_BOX_SIZE};
