//! Message-set framing: the byte-level log segment format.
//!
//! Wire layout per entry: `offset: i64 | size: i32 | message`, where a
//! message is `crc: u32 | magic: i8 | attributes: i8 | key | value` and key
//! and value are length-prefixed byte arrays with -1 encoding null. The low
//! three attribute bits select a compression codec; a compressed message
//! carries a whole nested encoded message set as its value. The CRC-32
//! (IEEE) covers everything after the crc field.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use engine_core::{Error, Result};
use std::io::{Read, Write};

const MAGIC_V0: i8 = 0;
const COMPRESSION_CODEC_MASK: i8 = 0x07;

/// Compression codec carried in the message attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Snappy,
    Lz4,
}

impl Compression {
    fn from_attributes(attributes: i8) -> Result<Self> {
        match attributes & COMPRESSION_CODEC_MASK {
            0 => Ok(Self::None),
            1 => Ok(Self::Gzip),
            2 => Ok(Self::Snappy),
            3 => Ok(Self::Lz4),
            other => Err(Error::codec(format!("unknown compression codec {other}"))),
        }
    }

    fn attribute_bits(self) -> i8 {
        match self {
            Self::None => 0,
            Self::Gzip => 1,
            Self::Snappy => 2,
            Self::Lz4 => 3,
        }
    }
}

/// A single log message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub crc: u32,
    pub attributes: i8,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
}

impl Message {
    /// Build an uncompressed message with a valid CRC.
    pub fn new(key: Option<Bytes>, value: Option<Bytes>) -> Self {
        let mut msg = Self {
            crc: 0,
            attributes: 0,
            key,
            value,
        };
        msg.crc = msg.compute_crc();
        msg
    }

    /// Wrap a nested message set into a compression container.
    pub fn compressed(codec: Compression, nested: &MessageSet) -> Result<Self> {
        let encoded = nested.encode();
        let compressed = compress(codec, &encoded)?;
        let mut msg = Self {
            crc: 0,
            attributes: codec.attribute_bits(),
            key: None,
            value: Some(compressed),
        };
        msg.crc = msg.compute_crc();
        Ok(msg)
    }

    pub fn is_compressed(&self) -> bool {
        self.attributes & COMPRESSION_CODEC_MASK != 0
    }

    pub fn codec(&self) -> Result<Compression> {
        Compression::from_attributes(self.attributes)
    }

    /// The canonical byte range the CRC covers: everything after the crc
    /// field.
    fn checksum_payload(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len() - 4);
        buf.put_i8(MAGIC_V0);
        buf.put_i8(self.attributes);
        put_nullable_bytes(&mut buf, self.key.as_ref());
        put_nullable_bytes(&mut buf, self.value.as_ref());
        buf
    }

    pub fn compute_crc(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.checksum_payload());
        hasher.finalize()
    }

    pub fn validate_crc(&self) -> bool {
        self.crc == self.compute_crc()
    }

    /// Decode the nested message set out of a compression container.
    pub fn decompress(&self) -> Result<MessageSet> {
        let codec = self.codec()?;
        let value = self
            .value
            .as_ref()
            .ok_or_else(|| Error::codec("compressed message has no value"))?;
        let decompressed = decompress(codec, value)?;
        MessageSet::decode(Bytes::from(decompressed))
    }

    pub fn encoded_len(&self) -> usize {
        4 + 1 + 1
            + 4 + self.key.as_ref().map_or(0, |k| k.len())
            + 4 + self.value.as_ref().map_or(0, |v| v.len())
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.crc);
        buf.put(self.checksum_payload());
    }

    fn decode(mut buf: Bytes) -> Result<Self> {
        if buf.remaining() < 6 {
            return Err(Error::codec("message shorter than fixed header"));
        }
        let crc = buf.get_u32();
        let magic = buf.get_i8();
        if magic != MAGIC_V0 {
            return Err(Error::codec(format!("unsupported magic byte {magic}")));
        }
        let attributes = buf.get_i8();
        let key = get_nullable_bytes(&mut buf)?;
        let value = get_nullable_bytes(&mut buf)?;
        Ok(Self {
            crc,
            attributes,
            key,
            value,
        })
    }
}

fn put_nullable_bytes(buf: &mut BytesMut, bytes: Option<&Bytes>) {
    match bytes {
        Some(b) => {
            buf.put_i32(b.len() as i32);
            buf.put_slice(b);
        }
        None => buf.put_i32(-1),
    }
}

fn get_nullable_bytes(buf: &mut Bytes) -> Result<Option<Bytes>> {
    if buf.remaining() < 4 {
        return Err(Error::codec("truncated length prefix"));
    }
    let len = buf.get_i32();
    if len < 0 {
        return Ok(None);
    }
    if buf.remaining() < len as usize {
        return Err(Error::codec("byte array exceeds message bounds"));
    }
    Ok(Some(buf.copy_to_bytes(len as usize)))
}

/// One `offset | size | message` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSetEntry {
    pub offset: i64,
    pub message: Message,
}

/// Marker for a trailing entry truncated by the fetch size.
///
/// The offset is present when the entry's offset field itself was readable
/// before the cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialMessage {
    pub offset: Option<i64>,
}

/// An ordered sequence of message frames as returned in a fetch response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageSet {
    pub entries: Vec<MessageSetEntry>,
    pub partial: Option<PartialMessage>,
}

impl MessageSet {
    pub fn new(entries: Vec<MessageSetEntry>) -> Self {
        Self {
            entries,
            partial: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for entry in &self.entries {
            buf.put_i64(entry.offset);
            buf.put_i32(entry.message.encoded_len() as i32);
            entry.message.encode(&mut buf);
        }
        buf.freeze()
    }

    /// Decode an encoded message set, tolerating a truncated tail.
    ///
    /// The broker cuts the returned log slice at the fetch size, so the last
    /// frame may be incomplete; it becomes `partial` rather than an error.
    /// Truncation *inside* a sized message body is corruption and fails.
    pub fn decode(mut buf: Bytes) -> Result<Self> {
        let mut entries = Vec::new();
        let mut partial = None;
        while buf.has_remaining() {
            if buf.remaining() < 12 {
                let offset = (buf.remaining() >= 8).then(|| buf.get_i64());
                partial = Some(PartialMessage { offset });
                break;
            }
            let offset = buf.get_i64();
            let size = buf.get_i32();
            if size < 0 {
                return Err(Error::codec(format!("negative message size {size}")));
            }
            if buf.remaining() < size as usize {
                partial = Some(PartialMessage {
                    offset: Some(offset),
                });
                break;
            }
            let message = Message::decode(buf.copy_to_bytes(size as usize))?;
            entries.push(MessageSetEntry { offset, message });
        }
        Ok(Self { entries, partial })
    }
}

fn compress(codec: Compression, data: &[u8]) -> Result<Bytes> {
    let out = match codec {
        Compression::None => data.to_vec(),
        Compression::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(data)
                .map_err(|e| Error::codec(format!("gzip compress: {e}")))?;
            encoder
                .finish()
                .map_err(|e| Error::codec(format!("gzip compress: {e}")))?
        }
        Compression::Snappy => snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| Error::codec(format!("snappy compress: {e}")))?,
        Compression::Lz4 => {
            let mut encoder = lz4::EncoderBuilder::new()
                .build(Vec::new())
                .map_err(|e| Error::codec(format!("lz4 compress: {e}")))?;
            encoder
                .write_all(data)
                .map_err(|e| Error::codec(format!("lz4 compress: {e}")))?;
            let (out, result) = encoder.finish();
            result.map_err(|e| Error::codec(format!("lz4 compress: {e}")))?;
            out
        }
    };
    Ok(Bytes::from(out))
}

fn decompress(codec: Compression, data: &[u8]) -> Result<Vec<u8>> {
    match codec {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut out = Vec::new();
            flate2::read::GzDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| Error::codec(format!("gzip decompress: {e}")))?;
            Ok(out)
        }
        Compression::Snappy => snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| Error::codec(format!("snappy decompress: {e}"))),
        Compression::Lz4 => {
            let mut out = Vec::new();
            lz4::Decoder::new(std::io::Cursor::new(data))
                .map_err(|e| Error::codec(format!("lz4 decompress: {e}")))?
                .read_to_end(&mut out)
                .map_err(|e| Error::codec(format!("lz4 decompress: {e}")))?;
            Ok(out)
        }
    }
}
