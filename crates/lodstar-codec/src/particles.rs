//! Per-octant particle payloads.
//!
//! # Compact format
//!
//! All values are little-endian.
//!
//! - Header (12 bytes): marker `-1` (`i32`), version (`i32`), count (`i32`)
//! - Per record:
//!   - position `x, y, z` (`f64`)
//!   - `vx, vy, vz, mualpha, mudelta, radvel, appmag, absmag, color, size` (`f32`)
//!   - `hip` (`i32`), `id` (`i64`)
//!   - names: byte length (`u16`) + UTF-8, multiple names joined by `|`
//!
//! The older generic encoding is handled by [`crate::legacy`] and picked
//! automatically by [`decode_particles`].

use std::io::{self, Write};

use crate::ParticleRecord;
use crate::bytes::ByteReader;
use crate::error::{DecodeError, DecodeResult};
use crate::legacy;

/// Leading marker distinguishing versioned compact streams.
pub const COMPACT_MARKER: i32 = -1;

/// Current compact format version.
pub const COMPACT_VERSION: i32 = 2;

/// Separator between multiple names of one record.
pub const NAME_SEPARATOR: char = '|';

/// Encoding of a payload stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadEncoding {
    /// Fixed-field binary encoding; the only one written.
    Compact,
    /// Generic object serialization kept for reading old datasets.
    Legacy,
}

impl PayloadEncoding {
    /// Guess the encoding from the first bytes of a stream.
    #[must_use]
    pub fn detect(data: &[u8]) -> Self {
        match data.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'[') => Self::Legacy,
            _ => Self::Compact,
        }
    }
}

/// Write records with the compact encoding.
pub fn encode_particles<W: Write>(writer: &mut W, records: &[ParticleRecord]) -> io::Result<()> {
    let count = i32::try_from(records.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "too many particles in octant")
    })?;

    writer.write_all(&COMPACT_MARKER.to_le_bytes())?;
    writer.write_all(&COMPACT_VERSION.to_le_bytes())?;
    writer.write_all(&count.to_le_bytes())?;

    for record in records {
        for v in record.position {
            writer.write_all(&v.to_le_bytes())?;
        }
        let floats = record.velocity.into_iter().chain([
            record.mualpha,
            record.mudelta,
            record.radvel,
            record.appmag,
            record.absmag,
            record.color,
            record.size,
        ]);
        for v in floats {
            writer.write_all(&v.to_le_bytes())?;
        }
        writer.write_all(&record.hip.to_le_bytes())?;
        writer.write_all(&record.id.to_le_bytes())?;

        if record
            .names
            .iter()
            .any(|n| n.is_empty() || n.contains(NAME_SEPARATOR))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "particle {} has an empty name or one containing '{NAME_SEPARATOR}'",
                    record.id
                ),
            ));
        }
        let names = record.names.join(&NAME_SEPARATOR.to_string());
        let len = u16::try_from(names.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("names of particle {} are too long", record.id),
            )
        })?;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(names.as_bytes())?;
    }
    Ok(())
}

/// Decode a payload, detecting the encoding.
pub fn decode_particles(data: &[u8]) -> DecodeResult<Vec<ParticleRecord>> {
    match PayloadEncoding::detect(data) {
        PayloadEncoding::Compact => decode_compact(data),
        PayloadEncoding::Legacy => legacy::decode_legacy(data),
    }
}

/// Decode a compact payload.
pub fn decode_compact(data: &[u8]) -> DecodeResult<Vec<ParticleRecord>> {
    let mut reader = ByteReader::new(data);

    let marker = reader.i32()?;
    if marker != COMPACT_MARKER {
        return Err(DecodeError::InvalidFormat {
            context: "particles",
            detail: format!("missing version marker, found {marker}"),
        });
    }
    let version = reader.i32()?;
    if version != COMPACT_VERSION {
        return Err(DecodeError::UnsupportedVersion {
            context: "particles",
            version,
        });
    }
    let count = reader.i32()?;
    let count = usize::try_from(count).map_err(|_| DecodeError::InvalidFormat {
        context: "particles",
        detail: format!("negative record count {count}"),
    })?;

    // Each record takes at least 78 bytes; reject absurd counts before allocating.
    let min_size = count.saturating_mul(78);
    if reader.remaining() < min_size {
        return Err(DecodeError::BufferTooSmall {
            expected: data.len() - reader.remaining() + min_size,
            actual: data.len(),
        });
    }

    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        let position = reader.f64x3()?;
        let velocity = [reader.f32()?, reader.f32()?, reader.f32()?];
        let mualpha = reader.f32()?;
        let mudelta = reader.f32()?;
        let radvel = reader.f32()?;
        let appmag = reader.f32()?;
        let absmag = reader.f32()?;
        let color = reader.f32()?;
        let size = reader.f32()?;
        let hip = reader.i32()?;
        let id = reader.i64()?;

        let len = usize::from(reader.u16()?);
        let bytes = reader.take(len)?;
        let names = std::str::from_utf8(bytes).map_err(|e| DecodeError::InvalidFormat {
            context: "particle names",
            detail: e.to_string(),
        })?;
        let names = if names.is_empty() {
            Vec::new()
        } else {
            names.split(NAME_SEPARATOR).map(str::to_string).collect()
        };

        records.push(ParticleRecord {
            position,
            velocity,
            mualpha,
            mudelta,
            radvel,
            appmag,
            absmag,
            color,
            size,
            hip,
            id,
            names,
        });
    }

    if reader.remaining() > 0 {
        return Err(DecodeError::TrailingBytes {
            context: "particles",
            count: reader.remaining(),
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn star(id: i64, appmag: f32, names: &[&str]) -> ParticleRecord {
        ParticleRecord {
            position: [1.0e3, -2.5, 0.125],
            velocity: [0.1, 0.2, 0.3],
            mualpha: 1.5,
            mudelta: -0.5,
            radvel: 12.0,
            appmag,
            absmag: appmag - 5.0,
            color: 0.75,
            size: 2.0,
            hip: 42,
            id,
            names: names.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    #[test]
    fn test_compact_preserves_order_and_fields() {
        let records = vec![
            star(1, 3.0, &["Vega", "alf Lyr"]),
            star(2, 1.0, &[]),
            star(3, 7.5, &["HIP 42"]),
        ];
        let mut buf = Vec::new();
        encode_particles(&mut buf, &records).unwrap();

        assert_eq!(PayloadEncoding::detect(&buf), PayloadEncoding::Compact);
        let decoded = decode_particles(&buf).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_empty_payload() {
        let mut buf = Vec::new();
        encode_particles(&mut buf, &[]).unwrap();
        assert_eq!(buf.len(), 12);
        assert!(decode_particles(&buf).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_payload() {
        let mut buf = Vec::new();
        encode_particles(&mut buf, &[star(1, 2.0, &["Sirius"])]).unwrap();
        buf.truncate(buf.len() - 3);
        assert!(matches!(
            decode_particles(&buf),
            Err(DecodeError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_count_larger_than_buffer() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&COMPACT_MARKER.to_le_bytes());
        buf.extend_from_slice(&COMPACT_VERSION.to_le_bytes());
        buf.extend_from_slice(&i32::MAX.to_le_bytes());
        assert!(matches!(
            decode_particles(&buf),
            Err(DecodeError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_missing_marker() {
        let buf = [0u8; 12];
        assert!(matches!(
            decode_compact(&buf),
            Err(DecodeError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_names_that_cannot_round_trip_are_rejected() {
        for names in [&["A|B"][..], &[""], &["Vega", ""]] {
            let err = encode_particles(&mut Vec::new(), &[star(1, 2.0, names)]).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        }
    }

    proptest! {
        #[test]
        fn test_arbitrary_bytes_never_panic(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode_particles(&data);
            let _ = crate::decode_metadata(&data);
        }
    }

    #[test]
    fn test_invalid_utf8_names() {
        let mut buf = Vec::new();
        encode_particles(&mut buf, &[star(1, 2.0, &["ab"])]).unwrap();
        let len = buf.len();
        buf[len - 1] = 0xff;
        assert!(matches!(
            decode_compact(&buf),
            Err(DecodeError::InvalidFormat {
                context: "particle names",
                ..
            })
        ));
    }
}
