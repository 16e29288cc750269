use super::MemtableRecord;
use crate::encoding::{Decode, Encode, EncodingError};

impl Encode for MemtableRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            MemtableRecord::Put { key, row, version, seq, timestamp } => {
                0u8.encode_to(buf)?;
                key.encode_to(buf)?;
                row.encode_to(buf)?;
                version.encode_to(buf)?;
                seq.encode_to(buf)?;
                timestamp.encode_to(buf)
            }
            MemtableRecord::Delete { key, seq, timestamp } => {
                1u8.encode_to(buf)?;
                key.encode_to(buf)?;
                seq.encode_to(buf)?;
                timestamp.encode_to(buf)
            }
            MemtableRecord::RangeDelete { start, end, seq, timestamp } => {
                2u8.encode_to(buf)?;
                start.encode_to(buf)?;
                end.encode_to(buf)?;
                seq.encode_to(buf)?;
                timestamp.encode_to(buf)
            }
        }
    }
}

impl Decode for MemtableRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, mut off) = u8::decode_from(buf)?;
        match tag {
            0 => {
                let (key, n) = <Vec<u8>>::decode_from(&buf[off..])?;
                off += n;
                let (row, n) = <Vec<u8>>::decode_from(&buf[off..])?;
                off += n;
                let (version, n) = u32::decode_from(&buf[off..])?;
                off += n;
                let (seq, n) = u64::decode_from(&buf[off..])?;
                off += n;
                let (timestamp, n) = u64::decode_from(&buf[off..])?;
                off += n;
                Ok((MemtableRecord::Put { key, row, version, seq, timestamp }, off))
            }
            1 => {
                let (key, n) = <Vec<u8>>::decode_from(&buf[off..])?;
                off += n;
                let (seq, n) = u64::decode_from(&buf[off..])?;
                off += n;
                let (timestamp, n) = u64::decode_from(&buf[off..])?;
                off += n;
                Ok((MemtableRecord::Delete { key, seq, timestamp }, off))
            }
            2 => {
                let (start, n) = <Vec<u8>>::decode_from(&buf[off..])?;
                off += n;
                let (end, n) = <Vec<u8>>::decode_from(&buf[off..])?;
                off += n;
                let (seq, n) = u64::decode_from(&buf[off..])?;
                off += n;
                let (timestamp, n) = u64::decode_from(&buf[off..])?;
                off += n;
                Ok((MemtableRecord::RangeDelete { start, end, seq, timestamp }, off))
            }
            _ => Err(EncodingError::InvalidTag { tag: tag as u32, type_name: "MemtableRecord" }),
        }
    }
}
