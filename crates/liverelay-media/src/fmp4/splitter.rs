//! Incremental splitter turning an fMP4 byte stream into buffer input.

use bytes::{Bytes, BytesMut};

use super::boxes::{moof_sequence_number, BoxHeader, BoxType};
use crate::{Error, Result};

/// Default ceiling on a single box (64 MB).
pub const DEFAULT_MAX_BOX_SIZE: u64 = 64 * 1024 * 1024;

/// Unit of buffer input recovered from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitEvent {
    /// ftyp + moov.
    Init(Bytes),
    /// moof + mdat, with the `mfhd` sequence number when present.
    Fragment {
        sequence: Option<u32>,
        payload: Bytes,
    },
}

/// Splits top-level boxes as bytes arrive.
pub struct BoxSplitter {
    pending: BytesMut,
    init: BytesMut,
    open_fragment: Option<(Option<u32>, BytesMut)>,
    max_box_size: u64,
}

impl BoxSplitter {
    pub fn new(max_box_size: u64) -> Self {
        Self {
            pending: BytesMut::new(),
            init: BytesMut::new(),
            open_fragment: None,
            max_box_size,
        }
    }

    /// Feed bytes and collect every event they complete.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<SplitEvent>> {
        self.pending.extend_from_slice(data);
        let mut events = Vec::new();

        loop {
            let Some(header) = BoxHeader::parse(&self.pending)? else {
                break;
            };
            if header.size > self.max_box_size {
                return Err(Error::BoxTooLarge {
                    box_type: header.box_type.to_string(),
                    size: header.size,
                    max: self.max_box_size,
                });
            }
            if (self.pending.len() as u64) < header.size {
                break;
            }

            let data = self.pending.split_to(header.size as usize);
            if let Some(event) = self.handle_box(header.box_type, data) {
                events.push(event);
            }
        }

        Ok(events)
    }

    /// Bytes held while waiting for the rest of a box.
    pub fn buffered_len(&self) -> usize {
        self.pending.len() + self.init.len() + self.open_fragment.as_ref().map_or(0, |(_, b)| b.len())
    }

    /// Forget any partial state.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.init.clear();
        self.open_fragment = None;
    }

    fn handle_box(&mut self, box_type: BoxType, data: BytesMut) -> Option<SplitEvent> {
        match box_type {
            BoxType::FTYP => {
                self.init.clear();
                self.init.extend_from_slice(&data);
                self.open_fragment = None;
                None
            }
            BoxType::MOOV => {
                self.init.extend_from_slice(&data);
                self.open_fragment = None;
                Some(SplitEvent::Init(self.init.split().freeze()))
            }
            BoxType::MOOF => {
                if self.open_fragment.is_some() {
                    tracing::debug!("moof without mdat discarded");
                }
                let sequence = moof_sequence_number(&data);
                self.open_fragment = Some((sequence, data));
                None
            }
            BoxType::MDAT => match self.open_fragment.take() {
                Some((sequence, mut payload)) => {
                    payload.extend_from_slice(&data);
                    Some(SplitEvent::Fragment {
                        sequence,
                        payload: payload.freeze(),
                    })
                }
                None => {
                    tracing::debug!(size = data.len(), "mdat without moof skipped");
                    None
                }
            },
            other => {
                tracing::trace!(box_type = %other, size = data.len(), "Skipping box");
                None
            }
        }
    }
}

impl Default for BoxSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BOX_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(box_type: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(box_type);
        out.extend_from_slice(body);
        out
    }

    fn make_moof(sequence: u32) -> Vec<u8> {
        let mut mfhd_body = vec![0, 0, 0, 0];
        mfhd_body.extend_from_slice(&sequence.to_be_bytes());
        make_box(b"moof", &make_box(b"mfhd", &mfhd_body))
    }

    fn stream() -> Vec<u8> {
        let mut out = make_box(b"ftyp", b"isom\0\0\0\0");
        out.extend(make_box(b"moov", &[1; 32]));
        for seq in 1..=3u32 {
            out.extend(make_moof(seq));
            out.extend(make_box(b"mdat", &[seq as u8; 64]));
        }
        out
    }

    #[test]
    fn test_split_whole_stream() {
        let mut splitter = BoxSplitter::default();
        let events = splitter.push(&stream()).unwrap();

        assert_eq!(events.len(), 4);
        match &events[0] {
            SplitEvent::Init(init) => {
                assert_eq!(&init[4..8], b"ftyp");
                assert_eq!(init.len(), 16 + 40);
            }
            other => panic!("expected init, got {other:?}"),
        }
        for (i, event) in events[1..].iter().enumerate() {
            match event {
                SplitEvent::Fragment { sequence, payload } => {
                    assert_eq!(*sequence, Some(i as u32 + 1));
                    assert_eq!(&payload[4..8], b"moof");
                    assert_eq!(payload.len(), 24 + 72);
                }
                other => panic!("expected fragment, got {other:?}"),
            }
        }
        assert_eq!(splitter.buffered_len(), 0);
    }

    #[test]
    fn test_split_byte_by_byte() {
        let mut splitter = BoxSplitter::default();
        let mut events = Vec::new();
        for byte in stream() {
            events.extend(splitter.push(&[byte]).unwrap());
        }
        assert_eq!(events.len(), 4);
        assert!(matches!(events[3], SplitEvent::Fragment { sequence: Some(3), .. }));
    }

    #[test]
    fn test_moof_without_mfhd() {
        let mut splitter = BoxSplitter::default();
        let mut data = make_box(b"moof", &make_box(b"traf", &[0; 8]));
        data.extend(make_box(b"mdat", &[0; 8]));

        let events = splitter.push(&data).unwrap();
        assert!(matches!(events[0], SplitEvent::Fragment { sequence: None, .. }));
    }

    #[test]
    fn test_unrelated_boxes_are_skipped() {
        let mut splitter = BoxSplitter::default();
        let mut data = make_box(b"free", &[0; 4]);
        data.extend(make_box(b"mdat", &[0; 4]));
        data.extend(make_box(b"sidx", &[0; 12]));

        assert!(splitter.push(&data).unwrap().is_empty());
    }

    #[test]
    fn test_box_too_large() {
        let mut splitter = BoxSplitter::new(32);
        let err = splitter.push(&make_box(b"mdat", &[0; 64])).unwrap_err();
        assert!(matches!(err, Error::BoxTooLarge { size: 72, max: 32, .. }));
    }

    #[test]
    fn test_new_ftyp_restarts_init() {
        let mut splitter = BoxSplitter::default();
        let mut data = stream();
        data.extend(make_box(b"ftyp", b"iso6\0\0\0\0"));
        data.extend(make_box(b"moov", &[2; 8]));

        let events = splitter.push(&data).unwrap();
        let inits: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                SplitEvent::Init(b) => Some(b.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(inits.len(), 2);
        assert_eq!(&inits[1][8..12], b"iso6");
        assert_eq!(inits[1].len(), 16 + 16);
    }
}
