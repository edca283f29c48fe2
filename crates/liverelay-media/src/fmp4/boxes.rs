//! ISO-BMFF box header parsing.

use crate::{Error, Result};

/// Four-character box type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxType(pub [u8; 4]);

impl BoxType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const STYP: Self = Self(*b"styp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MOOF: Self = Self(*b"moof");
    pub const MFHD: Self = Self(*b"mfhd");
    pub const MDAT: Self = Self(*b"mdat");

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parsed box header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub box_type: BoxType,
    /// Total size including the header.
    pub size: u64,
    /// 8, or 16 with a 64-bit `largesize`.
    pub header_size: u8,
}

impl BoxHeader {
    /// Parse a header from the start of `data`.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    pub fn parse(data: &[u8]) -> Result<Option<Self>> {
        if data.len() < 8 {
            return Ok(None);
        }

        let size32 = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as u64;
        let box_type = BoxType([data[4], data[5], data[6], data[7]]);

        let (size, header_size) = match size32 {
            0 => {
                return Err(Error::unsupported(format!(
                    "box '{}' extends to end of stream",
                    box_type
                )))
            }
            1 => {
                if data.len() < 16 {
                    return Ok(None);
                }
                let mut ext = [0u8; 8];
                ext.copy_from_slice(&data[8..16]);
                (u64::from_be_bytes(ext), 16u8)
            }
            n => (n, 8u8),
        };

        if size < header_size as u64 {
            return Err(Error::invalid_box(format!(
                "box '{}' size {} smaller than its header",
                box_type, size
            )));
        }

        Ok(Some(Self {
            box_type,
            size,
            header_size,
        }))
    }
}

/// Read the `mfhd` sequence number from a complete `moof` box.
pub fn moof_sequence_number(moof: &[u8]) -> Option<u32> {
    let header = BoxHeader::parse(moof).ok()??;
    let mut offset = header.header_size as usize;
    let end = (header.size as usize).min(moof.len());

    while offset < end {
        let child = BoxHeader::parse(&moof[offset..end]).ok()??;
        if child.box_type == BoxType::MFHD {
            // version/flags (4) then sequence_number (4)
            let at = offset + child.header_size as usize + 4;
            let bytes = moof.get(at..at + 4)?;
            return Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
        }
        offset += child.size as usize;
    }

    None
}
