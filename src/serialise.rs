//! Key/value representation and the serialisation strategies applied to it.
//!
//! Record keys and values move through the engine as `Datum` values. The
//! host announces the input record types ahead of the first record; the
//! matching `DatumDecoder` then turns raw frames into typed data. Between
//! the map and reduce halves of a job the engine may also carry data in a
//! worker-private envelope, produced and consumed by an `OpaqueCodec`.

use std::fmt;
use std::io::{Cursor, Read};

use bson;
use bson::Bson;
use bson::spec::BinarySubtype;
use byteorder::{BigEndian, ByteOrder};

use errors::*;
use stream::InStream;

const LONG_TYPE_NAME: &str = "org.apache.hadoop.io.LongWritable";
const TEXT_TYPE_NAME: &str = "org.apache.hadoop.io.Text";

/// A single key or value flowing through a task.
#[derive(Clone, Debug, PartialEq)]
pub enum Datum {
    Raw(Vec<u8>),
    Long(i64),
    Text(String),
}

impl Datum {
    pub fn as_long(&self) -> Option<i64> {
        match *self {
            Datum::Long(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match *self {
            Datum::Text(ref value) => Some(value),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> Option<&[u8]> {
        match *self {
            Datum::Raw(ref bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Best-effort text rendering, used for display and for auto-serialised
    /// output.
    pub fn as_text(&self) -> String {
        match *self {
            Datum::Raw(ref bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Datum::Long(value) => value.to_string(),
            Datum::Text(ref value) => value.clone(),
        }
    }

    /// Text coercion as bytes. Raw data passes through untouched so that
    /// non-UTF-8 payloads survive the trip.
    pub fn to_text_bytes(&self) -> Vec<u8> {
        match *self {
            Datum::Raw(ref bytes) => bytes.clone(),
            Datum::Long(value) => value.to_string().into_bytes(),
            Datum::Text(ref value) => value.clone().into_bytes(),
        }
    }

    /// The frame-level byte form: raw bytes as-is, text as UTF-8, 64-bit
    /// integers in their fixed 8-byte big-endian writable form.
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        match *self {
            Datum::Raw(ref bytes) => bytes.clone(),
            Datum::Text(ref value) => value.clone().into_bytes(),
            Datum::Long(value) => {
                let mut bytes = vec![0u8; 8];
                BigEndian::write_i64(&mut bytes, value);
                bytes
            }
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_text())
    }
}

/// How incoming key or value frames are turned into `Datum`s. Held per task
/// so a decoder choice can never leak into another task.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DatumDecoder {
    /// Length-prefixed bytes, untyped. The initial strategy.
    Raw,
    /// A one-value frame holding an 8-byte big-endian integer.
    LongWritable,
    /// A length-prefixed UTF-8 string.
    Text,
    /// Length-prefixed bytes holding a worker-private envelope.
    Opaque,
}

impl DatumDecoder {
    /// Maps a host type name onto a decoder. Unrecognized names return
    /// `None` and leave the caller's current strategy in force.
    pub fn for_type_name(name: &str) -> Option<DatumDecoder> {
        match name {
            LONG_TYPE_NAME => Some(DatumDecoder::LongWritable),
            TEXT_TYPE_NAME => Some(DatumDecoder::Text),
            _ => None,
        }
    }

    pub fn decode<R: Read>(
        &self,
        stream: &mut InStream<R>,
        codec: &OpaqueCodec,
    ) -> Result<Datum> {
        match *self {
            DatumDecoder::Raw => Ok(Datum::Raw(stream.read_bytes()?)),
            DatumDecoder::LongWritable => {
                let frame = stream.read_vint()?;
                if frame != 8 {
                    bail!(ErrorKind::Protocol(
                        format!("64-bit integer record framed as {} bytes", frame),
                    ));
                }
                Ok(Datum::Long(stream.read_long()?))
            }
            DatumDecoder::Text => Ok(Datum::Text(stream.read_string()?)),
            DatumDecoder::Opaque => {
                let raw = stream.read_bytes()?;
                codec.decode(&raw)
            }
        }
    }
}

/// Worker-private serialisation used to pass typed data between the map and
/// reduce halves of a job without a host-side record format in between.
/// Implementations must round-trip every `Datum` variant; the byte layout is
/// otherwise their own business.
pub trait OpaqueCodec {
    fn encode(&self, datum: &Datum) -> Result<Vec<u8>>;
    fn decode(&self, raw: &[u8]) -> Result<Datum>;
}

/// The default envelope: a single BSON document `{t: <tag>, d: <payload>}`
/// where tag 0 carries binary, 1 a 64-bit integer and 2 a string.
pub struct BsonCodec;

impl OpaqueCodec for BsonCodec {
    fn encode(&self, datum: &Datum) -> Result<Vec<u8>> {
        let mut doc = bson::Document::new();
        match *datum {
            Datum::Raw(ref bytes) => {
                doc.insert("t", 0i32);
                doc.insert("d", Bson::Binary(BinarySubtype::Generic, bytes.clone()));
            }
            Datum::Long(value) => {
                doc.insert("t", 1i32);
                doc.insert("d", value);
            }
            Datum::Text(ref value) => {
                doc.insert("t", 2i32);
                doc.insert("d", value.as_str());
            }
        }
        let mut buf = Vec::new();
        bson::encode_document(&mut buf, &doc).chain_err(
            || "unable to encode opaque envelope",
        )?;
        Ok(buf)
    }

    fn decode(&self, raw: &[u8]) -> Result<Datum> {
        let mut cursor = Cursor::new(raw);
        let doc = bson::decode_document(&mut cursor).chain_err(
            || "unable to decode opaque envelope",
        )?;
        let tag = match doc.get("t") {
            Some(&Bson::I32(tag)) => tag,
            _ => bail!(ErrorKind::Protocol("opaque envelope missing tag".to_owned())),
        };
        match (tag, doc.get("d")) {
            (0, Some(&Bson::Binary(_, ref bytes))) => Ok(Datum::Raw(bytes.clone())),
            (1, Some(&Bson::I64(value))) => Ok(Datum::Long(value)),
            (2, Some(&Bson::String(ref value))) => Ok(Datum::Text(value.clone())),
            _ => Err(
                ErrorKind::Protocol(format!("malformed opaque envelope with tag {}", tag)).into(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use stream::OutStream;
    use super::*;

    #[test]
    fn default_codec_round_trips_every_variant() {
        let codec = BsonCodec;
        for datum in &[
            Datum::Raw(vec![0, 159, 146, 150]),
            Datum::Long(-7),
            Datum::Text("séance".to_owned()),
        ] {
            let encoded = codec.encode(datum).unwrap();
            assert_eq!(*datum, codec.decode(&encoded).unwrap());
        }
    }

    #[test]
    fn codec_rejects_garbage() {
        assert!(BsonCodec.decode(&[1, 2, 3]).is_err());
    }

    #[test]
    fn type_names_select_decoders() {
        assert_eq!(
            Some(DatumDecoder::LongWritable),
            DatumDecoder::for_type_name("org.apache.hadoop.io.LongWritable")
        );
        assert_eq!(
            Some(DatumDecoder::Text),
            DatumDecoder::for_type_name("org.apache.hadoop.io.Text")
        );
        assert_eq!(None, DatumDecoder::for_type_name("com.example.Custom"));
    }

    #[test]
    fn long_decoder_reads_framed_writable() {
        let mut out = OutStream::new(Vec::new());
        out.write_vint(8).unwrap();
        out.write_long(1234567890123).unwrap();
        let mut input = InStream::new(Cursor::new(out.into_inner()));
        let datum = DatumDecoder::LongWritable
            .decode(&mut input, &BsonCodec)
            .unwrap();
        assert_eq!(Datum::Long(1234567890123), datum);
    }

    #[test]
    fn long_decoder_rejects_bad_frame_length() {
        let mut out = OutStream::new(Vec::new());
        out.write_vint(4).unwrap();
        out.write_long(0).unwrap();
        let mut input = InStream::new(Cursor::new(out.into_inner()));
        assert!(
            DatumDecoder::LongWritable
                .decode(&mut input, &BsonCodec)
                .is_err()
        );
    }

    #[test]
    fn text_coercion() {
        assert_eq!(b"42".to_vec(), Datum::Long(42).to_text_bytes());
        assert_eq!(b"hi".to_vec(), Datum::Text("hi".to_owned()).to_text_bytes());
        assert_eq!(vec![0xff], Datum::Raw(vec![0xff]).to_text_bytes());
    }

    #[test]
    fn wire_bytes_for_longs_are_big_endian() {
        assert_eq!(
            vec![0, 0, 0, 0, 0, 0, 1, 0],
            Datum::Long(256).to_wire_bytes()
        );
    }
}
