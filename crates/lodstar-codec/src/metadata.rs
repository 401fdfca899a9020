//! Octree metadata stream.
//!
//! # Format
//!
//! All values are little-endian.
//!
//! - Header (12 bytes): magic `LSMD`, version (`u32`), record count (`u32`)
//! - One 132-byte record per octant:
//!   - `id: u64`
//!   - `center: 3 × f64`
//!   - `half_size: 3 × f64`
//!   - `depth: i32`, `own_count: i32`, `recursive_count: i32`
//!   - `children: 8 × u64`, [`NO_CHILD`] marking an empty slot

use std::io::{self, Write};

use crate::bytes::ByteReader;
use crate::error::{DecodeError, DecodeResult};

/// Magic bytes opening every metadata stream.
pub const METADATA_MAGIC: [u8; 4] = *b"LSMD";

/// Current metadata format version.
pub const METADATA_VERSION: u32 = 1;

/// Size of the stream header in bytes.
pub const HEADER_SIZE: usize = 12;

/// Size of one octant record in bytes.
pub const RECORD_SIZE: usize = 8 + 3 * 8 + 3 * 8 + 3 * 4 + 8 * 8;

/// Child id marking an empty child slot.
///
/// Path-derived ids only contain the digits `1..=8`, while `u64::MAX`
/// contains both `0` and `9`, so the sentinel never collides with a real id.
pub const NO_CHILD: u64 = u64::MAX;

/// One persisted octant.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRecord {
    /// Path-derived octant id.
    pub id: u64,
    /// Box center.
    pub center: [f64; 3],
    /// Box half-size per axis.
    pub half_size: [f64; 3],
    /// Depth, root is 0.
    pub depth: i32,
    /// Objects held by this octant.
    pub own_count: i32,
    /// Objects held by this octant and all its descendants.
    pub recursive_count: i32,
    /// Child ids by octant index, [`NO_CHILD`] where absent.
    pub children: [u64; 8],
}

impl MetadataRecord {
    /// Iterate over `(slot, child_id)` for present children.
    pub fn child_ids(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.children
            .iter()
            .enumerate()
            .filter(|(_, id)| **id != NO_CHILD)
            .map(|(slot, id)| (slot, *id))
    }

    fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.id.to_le_bytes())?;
        for v in self.center.iter().chain(&self.half_size) {
            writer.write_all(&v.to_le_bytes())?;
        }
        writer.write_all(&self.depth.to_le_bytes())?;
        writer.write_all(&self.own_count.to_le_bytes())?;
        writer.write_all(&self.recursive_count.to_le_bytes())?;
        for child in &self.children {
            writer.write_all(&child.to_le_bytes())?;
        }
        Ok(())
    }

    fn read(reader: &mut ByteReader<'_>) -> DecodeResult<Self> {
        let id = reader.u64()?;
        let center = reader.f64x3()?;
        let half_size = reader.f64x3()?;
        let depth = reader.i32()?;
        let own_count = reader.i32()?;
        let recursive_count = reader.i32()?;
        let mut children = [NO_CHILD; 8];
        for child in &mut children {
            *child = reader.u64()?;
        }
        Ok(Self {
            id,
            center,
            half_size,
            depth,
            own_count,
            recursive_count,
            children,
        })
    }
}

/// Write the header followed by every record.
///
/// The iterator length is written up front, so records can be produced
/// lazily by a tree walk.
pub fn write_metadata<W, I>(writer: &mut W, records: I) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = MetadataRecord>,
    I::IntoIter: ExactSizeIterator,
{
    let records = records.into_iter();
    let count = u32::try_from(records.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "too many octants for a metadata stream",
        )
    })?;

    writer.write_all(&METADATA_MAGIC)?;
    writer.write_all(&METADATA_VERSION.to_le_bytes())?;
    writer.write_all(&count.to_le_bytes())?;
    for record in records {
        record.write(writer)?;
    }
    Ok(())
}

/// Decode a complete metadata stream.
///
/// The record count in the header must match the buffer length exactly.
pub fn decode_metadata(data: &[u8]) -> DecodeResult<Vec<MetadataRecord>> {
    let mut reader = ByteReader::new(data);

    let magic = reader.take(4)?;
    if magic != METADATA_MAGIC {
        return Err(DecodeError::InvalidFormat {
            context: "metadata",
            detail: format!("bad magic {magic:02x?}"),
        });
    }

    let version = reader.u32()?;
    if version != METADATA_VERSION {
        return Err(DecodeError::UnsupportedVersion {
            context: "metadata",
            version: i32::try_from(version).unwrap_or(i32::MAX),
        });
    }

    let count = reader.u32()? as usize;
    let expected = count * RECORD_SIZE;
    let remaining = reader.remaining();
    if remaining < expected {
        return Err(DecodeError::BufferTooSmall {
            expected: HEADER_SIZE + expected,
            actual: data.len(),
        });
    }
    if remaining > expected {
        return Err(DecodeError::TrailingBytes {
            context: "metadata",
            count: remaining - expected,
        });
    }

    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        records.push(MetadataRecord::read(&mut reader)?);
    }
    Ok(records)
}
