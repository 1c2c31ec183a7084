//! Task-lifetime state and the output path for user components.

use std::sync::Arc;

use api::{Counter, InputSplit, Mapper, Partitioner, RecordReader, RecordWriter, Reducer};
use conf::JobConf;
use errors::*;
use serialise::{Datum, OpaqueCodec};
use uplink::UplinkEncoder;

const JOB_OUTPUT_DIR_KEY: &str = "mapreduce.output.fileoutputformat.outputdir";
const TASK_OUTPUT_DIR_KEY: &str = "mapreduce.task.output.dir";
const TASK_PARTITION_KEY: &str = "mapreduce.task.partition";
const OUTPUT_BASENAME_KEY: &str = "mapreduce.output.basename";

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TaskPhase {
    Idle,
    Map,
    Reduce,
}

/// The single mutable state object for one task attempt. Owns the job
/// configuration, the current record, the active user components and the
/// uplink; user components receive a mutable borrow of it on every call.
pub struct TaskContext {
    conf: Option<JobConf>,
    key: Option<Datum>,
    value: Option<Datum>,
    input_split: Option<InputSplit>,
    mapper: Option<Box<Mapper>>,
    reducer: Option<Box<Reducer>>,
    partitioner: Option<Box<Partitioner>>,
    record_reader: Option<Box<RecordReader>>,
    record_writer: Option<Box<RecordWriter>>,
    num_reduces: i32,
    phase: TaskPhase,
    private_encoding: bool,
    auto_serialize: bool,
    codec: Arc<OpaqueCodec>,
    next_counter_id: i32,
    uplink: UplinkEncoder,
}

impl TaskContext {
    pub fn new(
        uplink: UplinkEncoder,
        private_encoding: bool,
        auto_serialize: bool,
        codec: Arc<OpaqueCodec>,
    ) -> TaskContext {
        TaskContext {
            conf: None,
            key: None,
            value: None,
            input_split: None,
            mapper: None,
            reducer: None,
            partitioner: None,
            record_reader: None,
            record_writer: None,
            num_reduces: 0,
            phase: TaskPhase::Idle,
            private_encoding: private_encoding,
            auto_serialize: auto_serialize,
            codec: codec,
            next_counter_id: 0,
            uplink: uplink,
        }
    }

    /// The job configuration. An error until the host has sent it.
    pub fn job_conf(&self) -> Result<&JobConf> {
        self.conf.as_ref().ok_or_else(|| {
            ErrorKind::Config("job configuration not set".to_owned()).into()
        })
    }

    /// The current input key. An error outside record processing.
    pub fn key(&self) -> Result<&Datum> {
        self.key.as_ref().ok_or_else(|| {
            ErrorKind::Protocol("no current key".to_owned()).into()
        })
    }

    /// The current input value. An error outside record processing.
    pub fn value(&self) -> Result<&Datum> {
        self.value.as_ref().ok_or_else(|| {
            ErrorKind::Protocol("no current value".to_owned()).into()
        })
    }

    pub fn input_split(&self) -> Option<&InputSplit> {
        self.input_split.as_ref()
    }

    pub fn num_reduces(&self) -> i32 {
        self.num_reduces
    }

    pub fn phase(&self) -> TaskPhase {
        self.phase
    }

    /// Emits one output record.
    ///
    /// Routing precedence: an active record writer consumes the record
    /// directly; otherwise the record is byte-encoded (opaquely while
    /// mapping with private encoding on, else text-coerced when
    /// auto-serialise is on) and sent upstream, partitioned when a
    /// partitioner is active.
    pub fn emit(&mut self, key: Datum, value: Datum) -> Result<()> {
        if let Some(ref mut writer) = self.record_writer {
            return writer.write(&key, &value).chain_err(
                || "error writing record to record writer",
            );
        }
        let (key_bytes, value_bytes) = if self.phase == TaskPhase::Map && self.private_encoding {
            (self.codec.encode(&key)?, self.codec.encode(&value)?)
        } else if self.auto_serialize {
            (key.to_text_bytes(), value.to_text_bytes())
        } else {
            (key.to_wire_bytes(), value.to_wire_bytes())
        };
        let partition = match self.partitioner {
            Some(ref mut partitioner) => Some(
                partitioner
                    .partition(&key_bytes, self.num_reduces)
                    .chain_err(|| "error partitioning output record")?,
            ),
            None => None,
        };
        match partition {
            Some(partition) => {
                self.uplink.partitioned_output(
                    partition,
                    &key_bytes,
                    &value_bytes,
                )
            }
            None => self.uplink.output(&key_bytes, &value_bytes),
        }
    }

    /// Reports a status message to the host.
    pub fn set_status(&mut self, message: &str) -> Result<()> {
        self.uplink.status(message).chain_err(
            || "error sending status",
        )
    }

    /// Reports task progress, as a fraction in `[0.0, 1.0]`.
    pub fn progress(&mut self, fraction: f32) -> Result<()> {
        self.uplink.progress(fraction).chain_err(
            || "error sending progress",
        )
    }

    /// Registers a counter with the host and returns its handle.
    pub fn get_counter(&mut self, group: &str, name: &str) -> Result<Counter> {
        let id = self.next_counter_id;
        self.next_counter_id += 1;
        self.uplink.register_counter(id, group, name).chain_err(
            || "error registering counter",
        )?;
        Ok(Counter::new(id))
    }

    pub fn increment_counter(&mut self, counter: &Counter, amount: i64) -> Result<()> {
        self.uplink
            .increment_counter(counter.id(), amount)
            .chain_err(|| "error incrementing counter")
    }

    /// The job-wide output directory.
    pub fn output_dir(&self) -> Result<String> {
        let conf = self.job_conf()?;
        let dir = conf.get(JOB_OUTPUT_DIR_KEY).ok_or_else(|| {
            Error::from(ErrorKind::Config(
                format!("missing configuration key {}", JOB_OUTPUT_DIR_KEY),
            ))
        })?;
        Ok(dir.to_owned())
    }

    /// The scratch directory this task attempt should write under.
    pub fn work_path(&self) -> Result<String> {
        let conf = self.job_conf()?;
        let dir = conf.get(TASK_OUTPUT_DIR_KEY).ok_or_else(|| {
            Error::from(ErrorKind::Config(
                format!("missing configuration key {}", TASK_OUTPUT_DIR_KEY),
            ))
        })?;
        Ok(dir.to_owned())
    }

    pub fn task_partition(&self) -> Result<i64> {
        self.job_conf()?.get_int(TASK_PARTITION_KEY)
    }

    /// The conventional output file name for this task attempt, e.g.
    /// `<work>/part-m-00002<extension>`.
    pub fn default_work_file(&self, extension: &str) -> Result<String> {
        let task_type = match self.phase {
            TaskPhase::Map => "m",
            TaskPhase::Reduce => "r",
            TaskPhase::Idle => {
                bail!(ErrorKind::Config("no task is active".to_owned()));
            }
        };
        let partition = self.task_partition()?;
        let base = self.job_conf()?
            .get(OUTPUT_BASENAME_KEY)
            .unwrap_or("part")
            .to_owned();
        Ok(format!(
            "{}/{}-{}-{:05}{}",
            self.work_path()?,
            base,
            task_type,
            partition,
            extension
        ))
    }

    // ---- engine-facing state transitions ----

    pub(crate) fn set_job_conf(&mut self, conf: JobConf) {
        self.conf = Some(conf);
    }

    pub(crate) fn set_input_split(&mut self, split: InputSplit) {
        self.input_split = Some(split);
    }

    pub(crate) fn set_current(&mut self, key: Datum, value: Datum) {
        self.key = Some(key);
        self.value = Some(value);
    }

    pub(crate) fn set_current_key(&mut self, key: Datum) {
        self.key = Some(key);
    }

    pub(crate) fn set_num_reduces(&mut self, num_reduces: i32) {
        self.num_reduces = num_reduces;
    }

    pub(crate) fn set_private_encoding(&mut self, enabled: bool) {
        self.private_encoding = enabled;
    }

    pub(crate) fn private_encoding(&self) -> bool {
        self.private_encoding
    }

    pub(crate) fn set_partitioner(&mut self, partitioner: Option<Box<Partitioner>>) {
        self.partitioner = partitioner;
    }

    pub(crate) fn set_record_reader(&mut self, reader: Box<RecordReader>) {
        self.record_reader = Some(reader);
    }

    pub(crate) fn set_record_writer(&mut self, writer: Option<Box<RecordWriter>>) {
        self.record_writer = writer;
    }

    pub(crate) fn activate_mapper(&mut self, mapper: Box<Mapper>) -> Result<()> {
        if self.mapper.is_some() || self.reducer.is_some() {
            bail!(ErrorKind::Protocol("a task is already active".to_owned()));
        }
        self.mapper = Some(mapper);
        self.phase = TaskPhase::Map;
        Ok(())
    }

    pub(crate) fn activate_reducer(&mut self, reducer: Box<Reducer>) -> Result<()> {
        if self.mapper.is_some() || self.reducer.is_some() {
            bail!(ErrorKind::Protocol("a task is already active".to_owned()));
        }
        self.reducer = Some(reducer);
        self.phase = TaskPhase::Reduce;
        Ok(())
    }

    pub(crate) fn take_mapper(&mut self) -> Result<Box<Mapper>> {
        self.mapper.take().ok_or_else(|| {
            ErrorKind::Protocol("no active mapper".to_owned()).into()
        })
    }

    pub(crate) fn restore_mapper(&mut self, mapper: Box<Mapper>) {
        self.mapper = Some(mapper);
    }

    pub(crate) fn take_reducer(&mut self) -> Result<Box<Reducer>> {
        self.reducer.take().ok_or_else(|| {
            ErrorKind::Protocol("no active reducer".to_owned()).into()
        })
    }

    pub(crate) fn restore_reducer(&mut self, reducer: Box<Reducer>) {
        self.reducer = Some(reducer);
    }

    pub(crate) fn mapper_active(&self) -> bool {
        self.mapper.is_some()
    }

    pub(crate) fn task_active(&self) -> bool {
        self.mapper.is_some() || self.reducer.is_some() || self.phase != TaskPhase::Idle
    }

    pub(crate) fn uplink_mut(&mut self) -> &mut UplinkEncoder {
        &mut self.uplink
    }

    /// Tears down the active components in a fixed order, then signals DONE.
    ///
    /// DONE goes out even when a component fails to close, so the host
    /// always observes task completion; the first teardown error is
    /// returned afterwards rather than swallowed, which fails the worker
    /// process without starving the host of its completion signal.
    pub(crate) fn close(&mut self) -> Result<()> {
        let mut teardown_err: Option<Error> = None;
        if let Some(mut mapper) = self.mapper.take() {
            record_teardown_error(&mut teardown_err, "mapper", mapper.close());
        }
        if let Some(mut reader) = self.record_reader.take() {
            record_teardown_error(&mut teardown_err, "record reader", reader.close());
        }
        if let Some(mut writer) = self.record_writer.take() {
            record_teardown_error(&mut teardown_err, "record writer", writer.close());
        }
        if let Some(mut reducer) = self.reducer.take() {
            record_teardown_error(&mut teardown_err, "reducer", reducer.close());
        }
        self.phase = TaskPhase::Idle;
        self.uplink.done()?;
        match teardown_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn record_teardown_error(slot: &mut Option<Error>, component: &str, outcome: Result<()>) {
    if let Err(err) = outcome {
        error!("error closing {}: {}", component, err);
        if slot.is_none() {
            *slot = Some(err);
        }
    }
}
