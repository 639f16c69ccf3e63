//! Binary and serde persistence
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic          4 bytes  "CKOO"
//! version        u8       1
//! count          u64
//! bucket_size    u64
//! total_buckets  u64
//! max_kicks      u64
//! buckets        total_buckets x { occupancy u16, bucket_size x fingerprint u16 }
//! ```
//!
//! The hasher is not part of the stream. A decoded filter digests keys with
//! a fresh `H`, so it only answers like the encoded one when both use the
//! same hash algorithm and seed.

use crate::bucket::{Buckets, MAX_BUCKET_SIZE, Occupancy};
use crate::error::DeserializeError;
use crate::filter::{CuckooFilter, Table};
use crate::fingerprint::Fingerprint;
use bytes::{Buf, BufMut, BytesMut};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::hash::Hasher;
use std::io::{self, Read, Write};
use tracing::debug;

const MAGIC: &[u8; 4] = b"CKOO";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = MAGIC.len() + 1 + 4 * size_of::<u64>();

/// Validated header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    count: usize,
    bucket_size: usize,
    total_buckets: usize,
    max_kicks: usize,
}

impl Header {
    fn of(table: &Table) -> Self {
        Self {
            count: table.count,
            bucket_size: table.buckets.bucket_size(),
            total_buckets: table.buckets.total_buckets(),
            max_kicks: table.max_kicks,
        }
    }

    fn validate(
        count: u64,
        bucket_size: u64,
        total_buckets: u64,
        max_kicks: u64,
    ) -> Result<Self, DeserializeError> {
        if bucket_size == 0 || bucket_size > MAX_BUCKET_SIZE as u64 {
            return Err(DeserializeError::InvalidBucketSize(bucket_size));
        }
        if !total_buckets.is_power_of_two() {
            return Err(DeserializeError::InvalidTotalBuckets(total_buckets));
        }
        let to_usize =
            |value: u64| usize::try_from(value).map_err(|_| DeserializeError::InvalidLength);
        Ok(Self {
            count: to_usize(count)?,
            bucket_size: to_usize(bucket_size)?,
            total_buckets: to_usize(total_buckets)?,
            max_kicks: to_usize(max_kicks)?,
        })
    }

    fn read(buf: &mut &[u8]) -> Result<Self, DeserializeError> {
        if buf.remaining() < HEADER_LEN {
            return Err(DeserializeError::InvalidLength);
        }
        if &buf[..MAGIC.len()] != MAGIC {
            return Err(DeserializeError::InvalidHeader);
        }
        buf.advance(MAGIC.len());
        let version = buf.get_u8();
        if version != FORMAT_VERSION {
            return Err(DeserializeError::UnsupportedVersion(version));
        }
        Self::validate(
            buf.get_u64_le(),
            buf.get_u64_le(),
            buf.get_u64_le(),
            buf.get_u64_le(),
        )
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_slice(MAGIC);
        buf.put_u8(FORMAT_VERSION);
        buf.put_u64_le(self.count as u64);
        buf.put_u64_le(self.bucket_size as u64);
        buf.put_u64_le(self.total_buckets as u64);
        buf.put_u64_le(self.max_kicks as u64);
    }

    /// Encoded size of the bucket array that follows the header
    fn body_len(&self) -> Option<usize> {
        let bucket_len = size_of::<Occupancy>() + self.bucket_size * size_of::<Fingerprint>();
        self.total_buckets.checked_mul(bucket_len)
    }

    /// Check bitmap width and assemble the table
    fn into_table(
        self,
        occupancy: Vec<Occupancy>,
        mut slots: Vec<Fingerprint>,
    ) -> Result<Table, DeserializeError> {
        for (bucket, (&bitmap, slots)) in occupancy
            .iter()
            .zip(slots.chunks_exact_mut(self.bucket_size))
            .enumerate()
        {
            if u32::from(bitmap) >> self.bucket_size != 0 {
                return Err(DeserializeError::InvalidOccupancy { bucket });
            }
            // Empty slots always hold zero in memory
            for (slot, fingerprint) in slots.iter_mut().enumerate() {
                if bitmap >> slot & 1 == 0 {
                    *fingerprint = 0;
                }
            }
        }
        let buckets = Buckets::from_parts(self.bucket_size, occupancy, slots);
        Ok(Table::new(buckets, self.count, self.max_kicks))
    }
}

fn decode(mut buf: &[u8]) -> Result<Table, DeserializeError> {
    let header = Header::read(&mut buf)?;
    if Some(buf.remaining()) != header.body_len() {
        return Err(DeserializeError::InvalidLength);
    }
    let mut occupancy = Vec::with_capacity(header.total_buckets);
    let mut slots = Vec::with_capacity(header.total_buckets * header.bucket_size);
    for _ in 0..header.total_buckets {
        occupancy.push(buf.get_u16_le());
        for _ in 0..header.bucket_size {
            slots.push(buf.get_u16_le());
        }
    }
    header.into_table(occupancy, slots)
}

impl<H: Hasher + Default> CuckooFilter<H> {
    /// Serialize the filter into its binary layout.
    ///
    /// The read lock is held for the whole encoding, so the bytes describe a
    /// single consistent snapshot.
    pub fn to_bytes(&self) -> Vec<u8> {
        let table = self.read_table();
        let header = Header::of(&table);
        let mut buf = BytesMut::with_capacity(HEADER_LEN + header.body_len().unwrap_or(0));
        header.write(&mut buf);
        for bucket in table.buckets.iter() {
            buf.put_u16_le(bucket.occupancy());
            for &fingerprint in bucket.slots() {
                buf.put_u16_le(fingerprint);
            }
        }
        buf.to_vec()
    }

    /// Rebuild a filter from [`to_bytes`](Self::to_bytes) output.
    ///
    /// The stored count is trusted as is; it is not checked against the
    /// number of occupied slots.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DeserializeError> {
        decode(bytes)
            .map(Self::from_table)
            .inspect_err(|error| debug!(%error, len = bytes.len(), "failed to decode filter"))
    }

    /// Write the binary layout to a stream
    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    /// Read one filter from a stream, consuming exactly its encoded length
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, DeserializeError> {
        let mut bytes = vec![0; HEADER_LEN];
        reader.read_exact(&mut bytes).map_err(eof_as_invalid_length)?;
        let header = Header::read(&mut &bytes[..])?;
        let body_len = header.body_len().ok_or(DeserializeError::InvalidLength)?;
        let read = reader.take(body_len as u64).read_to_end(&mut bytes)?;
        if read != body_len {
            return Err(DeserializeError::InvalidLength);
        }
        Self::from_bytes(&bytes)
    }
}

fn eof_as_invalid_length(error: io::Error) -> DeserializeError {
    match error.kind() {
        io::ErrorKind::UnexpectedEof => DeserializeError::InvalidLength,
        _ => DeserializeError::Io(error),
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    count: u64,
    bucket_size: u64,
    total_buckets: u64,
    max_kicks: u64,
    occupancy: &'a [Occupancy],
    slots: &'a [Fingerprint],
}

#[derive(Deserialize)]
struct Snapshot {
    count: u64,
    bucket_size: u64,
    total_buckets: u64,
    max_kicks: u64,
    occupancy: Vec<Occupancy>,
    slots: Vec<Fingerprint>,
}

impl Snapshot {
    fn into_table(self) -> Result<Table, DeserializeError> {
        let header = Header::validate(
            self.count,
            self.bucket_size,
            self.total_buckets,
            self.max_kicks,
        )?;
        if self.occupancy.len() != header.total_buckets
            || Some(self.slots.len()) != header.total_buckets.checked_mul(header.bucket_size)
        {
            return Err(DeserializeError::InvalidLength);
        }
        header.into_table(self.occupancy, self.slots)
    }
}

impl<H: Hasher + Default> Serialize for CuckooFilter<H> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let table = self.read_table();
        let header = Header::of(&table);
        SnapshotRef {
            count: header.count as u64,
            bucket_size: header.bucket_size as u64,
            total_buckets: header.total_buckets as u64,
            max_kicks: header.max_kicks as u64,
            occupancy: table.buckets.occupancy(),
            slots: table.buckets.slots(),
        }
        .serialize(serializer)
    }
}

impl<'de, H: Hasher + Default> Deserialize<'de> for CuckooFilter<H> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Snapshot::deserialize(deserializer)?
            .into_table()
            .map(Self::from_table)
            .map_err(D::Error::custom)
    }
}
