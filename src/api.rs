//! The pluggable component surface of a task.
//!
//! Applications implement `Factory` plus whichever component traits their
//! job needs, then hand the factory to `run_task`. Every component other
//! than the mapper is optional; returning `None` from a `create_*` method
//! tells the engine to fall back to the host-side default for that role.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::Read;

use context::TaskContext;
use errors::*;
use protocol::ReduceValues;
use serialise::Datum;
use stream::InStream;

/// A subset (described by offset and length) of an input file.
#[derive(Clone, Debug, PartialEq)]
pub struct FileSplit {
    pub filename: String,
    pub offset: i64,
    pub length: i64,
}

impl FileSplit {
    pub fn from_stream<R: Read>(stream: &mut InStream<R>) -> Result<FileSplit> {
        // The total serialised length precedes the fields; nothing here
        // needs it.
        stream.read_vint()?;
        let filename = stream.read_string()?;
        let offset = stream.read_long()?;
        let length = stream.read_long()?;
        Ok(FileSplit {
            filename: filename,
            offset: offset,
            length: length,
        })
    }
}

/// The subset of the job input assigned to this map task. Carried opaquely
/// when the application asked for the raw bytes instead of the file form.
#[derive(Clone, Debug, PartialEq)]
pub enum InputSplit {
    File(FileSplit),
    Opaque(Vec<u8>),
}

impl InputSplit {
    pub fn as_file(&self) -> Option<&FileSplit> {
        match *self {
            InputSplit::File(ref split) => Some(split),
            InputSplit::Opaque(_) => None,
        }
    }
}

/// A handle to a host-side counter, obtained from
/// `TaskContext::get_counter` and updated through
/// `TaskContext::increment_counter`. The value never travels back to the
/// worker.
#[derive(Clone, Debug, PartialEq)]
pub struct Counter {
    id: i32,
}

impl Counter {
    pub(crate) fn new(id: i32) -> Counter {
        Counter { id: id }
    }

    pub fn id(&self) -> i32 {
        self.id
    }
}

/// Maps one input record to any number of output records.
pub trait Mapper {
    /// Called once per input record with the current key and value set on
    /// the context. Output goes out through `TaskContext::emit`.
    fn map(&mut self, context: &mut TaskContext) -> Result<()>;

    /// Called once at task teardown.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Reduces the values sharing one key to any number of output records.
pub trait Reducer {
    /// Called exactly once per key. `values` is forward-only and single
    /// pass: it streams values off the wire as they are pulled, and once a
    /// value has been consumed it is gone.
    fn reduce(&mut self, context: &mut TaskContext, values: &mut ReduceValues) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Chooses the reduce partition for an output key.
pub trait Partitioner {
    /// `key` is the key in its outgoing byte form; the result must lie in
    /// `[0, num_reduces)`.
    fn partition(&mut self, key: &[u8], num_reduces: i32) -> Result<i32>;
}

/// Supplies input records when the task reads its own split instead of
/// having records piped down by the host.
pub trait RecordReader {
    /// The next record, or `None` once the split is exhausted.
    fn next(&mut self) -> Result<Option<(Datum, Datum)>>;

    /// Fraction of the split consumed so far, in `[0.0, 1.0]`.
    fn progress(&mut self) -> f32 {
        0.0
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes final output records directly, bypassing the host's writer.
pub trait RecordWriter {
    fn write(&mut self, key: &Datum, value: &Datum) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Creates the application's components on demand. Only the mapper is
/// mandatory; the engine asks for each of the others at most once per task.
pub trait Factory {
    fn create_mapper(&mut self, context: &TaskContext) -> Result<Box<Mapper>>;

    fn create_reducer(&mut self, _context: &TaskContext) -> Result<Option<Box<Reducer>>> {
        Ok(None)
    }

    /// Combiners share the reducer contract. This engine never drives one
    /// itself; the capability exists for hosts that combine before the
    /// shuffle.
    fn create_combiner(&mut self, _context: &TaskContext) -> Result<Option<Box<Reducer>>> {
        Ok(None)
    }

    fn create_partitioner(&mut self, _context: &TaskContext) -> Result<Option<Box<Partitioner>>> {
        Ok(None)
    }

    fn create_record_reader(&mut self, _context: &TaskContext) -> Result<Option<Box<RecordReader>>> {
        Ok(None)
    }

    fn create_record_writer(&mut self, _context: &TaskContext) -> Result<Option<Box<RecordWriter>>> {
        Ok(None)
    }
}

/// A `Partitioner` for any key, spreading keys over partitions by hash.
pub struct HashPartitioner;

impl HashPartitioner {
    fn calculate_hash(&self, key: &[u8]) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }
}

impl Partitioner for HashPartitioner {
    fn partition(&mut self, key: &[u8], num_reduces: i32) -> Result<i32> {
        if num_reduces < 1 {
            return Ok(0);
        }
        let hash = self.calculate_hash(key);
        Ok((hash % num_reduces as u64) as i32)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use stream::OutStream;
    use super::*;

    #[test]
    fn file_split_decoding() {
        let mut out = OutStream::new(Vec::new());
        out.write_vint(29).unwrap();
        out.write_string("/data/part-00000").unwrap();
        out.write_long(1024).unwrap();
        out.write_long(4096).unwrap();
        let mut input = InStream::new(Cursor::new(out.into_inner()));

        let split = FileSplit::from_stream(&mut input).unwrap();

        assert_eq!("/data/part-00000", split.filename);
        assert_eq!(1024, split.offset);
        assert_eq!(4096, split.length);
    }

    #[test]
    fn hash_partitioner_stays_in_range() {
        let mut partitioner = HashPartitioner;
        for key in &[&b"apple"[..], b"banana", b"cherry", b""] {
            let partition = partitioner.partition(key, 4).unwrap();
            assert!(partition >= 0 && partition < 4);
        }
    }

    #[test]
    fn hash_partitioner_is_deterministic() {
        let mut partitioner = HashPartitioner;
        let first = partitioner.partition(b"stable", 16).unwrap();
        let second = partitioner.partition(b"stable", 16).unwrap();
        assert_eq!(first, second);
    }
}
