//! The downlink command decoder and task dispatch loop.
//!
//! One `ProtocolHandler` drives one task attempt: it authenticates the
//! channel, decodes each incoming command, mutates the `TaskContext` and
//! invokes the user components. Two record-iteration styles exist and never
//! overlap: the host can push records down one command at a time, or the
//! worker pulls them from its own record reader during map setup.

use std::io::Read;
use std::sync::Arc;

use base64;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use api::{Factory, FileSplit, InputSplit, Mapper, RecordReader};
use conf::JobConf;
use context::TaskContext;
use errors::*;
use serialise::{BsonCodec, Datum, DatumDecoder, OpaqueCodec};
use stream::InStream;
use uplink::UplinkEncoder;

pub const PROTOCOL_VERSION: i32 = 0;

pub const START: i32 = 0;
pub const SET_JOB_CONF: i32 = 1;
pub const SET_INPUT_TYPES: i32 = 2;
pub const RUN_MAP: i32 = 3;
pub const MAP_ITEM: i32 = 4;
pub const RUN_REDUCE: i32 = 5;
pub const REDUCE_KEY: i32 = 6;
pub const REDUCE_VALUE: i32 = 7;
pub const CLOSE: i32 = 8;
pub const ABORT: i32 = 9;
pub const AUTHENTICATION_REQ: i32 = 10;

/// Configuration key the host sets when its own record writer handles the
/// final output of a map-only job.
const HOST_RECORD_WRITER_KEY: &str = "mapreduce.pipes.isjavarecordwriter";

pub type DownlinkStream = InStream<Box<Read>>;

fn cmd_name(cmd: i32) -> &'static str {
    match cmd {
        START => "START",
        SET_JOB_CONF => "SET_JOB_CONF",
        SET_INPUT_TYPES => "SET_INPUT_TYPES",
        RUN_MAP => "RUN_MAP",
        MAP_ITEM => "MAP_ITEM",
        RUN_REDUCE => "RUN_REDUCE",
        REDUCE_KEY => "REDUCE_KEY",
        REDUCE_VALUE => "REDUCE_VALUE",
        CLOSE => "CLOSE",
        ABORT => "ABORT",
        AUTHENTICATION_REQ => "AUTHENTICATION_REQ",
        _ => "UNKNOWN",
    }
}

/// Computes the base64-encoded HMAC-SHA1 digest of `message` under
/// `secret`, the form exchanged during the authentication handshake.
pub fn create_digest(secret: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret).map_err(|_| {
        Error::from(ErrorKind::Authentication(
            "secret cannot be used as a digest key".to_owned(),
        ))
    })?;
    mac.update(message);
    let code = mac.finalize().into_bytes();
    Ok(base64::encode(code.as_slice()).into_bytes())
}

/// Engine behaviour toggles, fixed for the lifetime of the task.
pub struct RunOptions {
    /// Leave map input keys as raw bytes regardless of announced types.
    pub raw_keys: bool,
    /// Leave map input values as raw bytes regardless of announced types.
    pub raw_values: bool,
    /// Carry the input split as raw bytes instead of decoding a file split.
    pub raw_split: bool,
    /// Wrap map output in the worker-private envelope so typed data
    /// survives the trip to the reduce half of the job.
    pub private_encoding: bool,
    /// Coerce untyped output to text before sending it upstream.
    pub auto_serialize: bool,
    /// Override the worker-private envelope codec.
    pub opaque_codec: Option<Arc<OpaqueCodec>>,
}

impl Default for RunOptions {
    fn default() -> RunOptions {
        RunOptions {
            raw_keys: false,
            raw_values: false,
            raw_split: false,
            private_encoding: true,
            auto_serialize: true,
            opaque_codec: None,
        }
    }
}

enum Step {
    Continue,
    Finished,
}

/// A forward-only view of one key's run of values, pulled lazily off the
/// downlink while the reducer consumes them. The command that ends the run
/// is captured as the terminator rather than consumed.
pub struct ReduceValues<'a> {
    stream: &'a mut DownlinkStream,
    decoder: DatumDecoder,
    codec: Arc<OpaqueCodec>,
    first_pending: bool,
    terminator: Option<i32>,
}

impl<'a> ReduceValues<'a> {
    fn new(
        stream: &'a mut DownlinkStream,
        decoder: DatumDecoder,
        codec: Arc<OpaqueCodec>,
    ) -> ReduceValues<'a> {
        ReduceValues {
            stream: stream,
            decoder: decoder,
            codec: codec,
            first_pending: true,
            terminator: None,
        }
    }

    /// The next value in the run, or `None` once the run is over.
    pub fn next(&mut self) -> Result<Option<Datum>> {
        if self.terminator.is_some() {
            return Ok(None);
        }
        if self.first_pending {
            self.first_pending = false;
            let value = self.decoder.decode(self.stream, &*self.codec)?;
            debug!("REDUCE_VALUE: {:?}", value);
            return Ok(Some(value));
        }
        let cmd = self.stream.read_vint()?;
        if cmd == REDUCE_VALUE {
            let value = self.decoder.decode(self.stream, &*self.codec)?;
            debug!("REDUCE_VALUE: {:?}", value);
            Ok(Some(value))
        } else {
            self.terminator = Some(cmd);
            Ok(None)
        }
    }

    /// Drains whatever the reducer left unconsumed and yields the command
    /// that ended the run.
    fn finish(mut self) -> Result<i32> {
        while self.next()?.is_some() {}
        self.terminator.ok_or_else(|| {
            ErrorKind::Protocol("value run ended without a terminating command".to_owned()).into()
        })
    }
}

/// Decodes downlink commands and drives the task to completion.
///
/// The channel starts unauthenticated; the only acceptable first command is
/// the authentication request, and the transition happens exactly once.
pub struct ProtocolHandler {
    stream: DownlinkStream,
    ctx: TaskContext,
    factory: Box<Factory>,
    secret: Option<Vec<u8>>,
    authenticated: bool,
    raw_keys: bool,
    raw_values: bool,
    raw_split: bool,
    key_decoder: DatumDecoder,
    value_decoder: DatumDecoder,
    codec: Arc<OpaqueCodec>,
}

impl ProtocolHandler {
    pub fn new(
        downlink: DownlinkStream,
        uplink: UplinkEncoder,
        factory: Box<Factory>,
        secret: Option<Vec<u8>>,
        options: RunOptions,
    ) -> ProtocolHandler {
        let codec = options
            .opaque_codec
            .unwrap_or_else(|| Arc::new(BsonCodec));
        let ctx = TaskContext::new(
            uplink,
            options.private_encoding,
            options.auto_serialize,
            Arc::clone(&codec),
        );
        ProtocolHandler {
            stream: downlink,
            ctx: ctx,
            factory: factory,
            secret: secret,
            authenticated: false,
            raw_keys: options.raw_keys,
            raw_values: options.raw_values,
            raw_split: options.raw_split,
            key_decoder: DatumDecoder::Raw,
            value_decoder: DatumDecoder::Raw,
            codec: codec,
        }
    }

    /// Reads and dispatches commands until the task completes.
    pub fn run(&mut self) -> Result<()> {
        loop {
            match self.dispatch()? {
                Step::Continue => {}
                Step::Finished => return Ok(()),
            }
        }
    }

    fn dispatch(&mut self) -> Result<Step> {
        let cmd = match self.stream.try_read_vint()? {
            Some(cmd) => cmd,
            None => {
                if self.ctx.task_active() {
                    bail!(ErrorKind::Protocol(
                        "command stream ended inside an active task".to_owned(),
                    ));
                }
                debug!("downlink exhausted");
                return Ok(Step::Finished);
            }
        };
        if !self.authenticated && cmd != AUTHENTICATION_REQ {
            bail!(ErrorKind::Protocol(format!(
                "{} ({}) received before authentication",
                cmd_name(cmd),
                cmd
            )));
        }
        match cmd {
            AUTHENTICATION_REQ => {
                let digest = self.stream.read_bytes()?;
                let challenge = self.stream.read_bytes()?;
                debug!("AUTHENTICATION_REQ: {} + {} bytes", digest.len(), challenge.len());
                self.authenticate(&digest, &challenge)?;
                Ok(Step::Continue)
            }
            START => {
                let version = self.stream.read_vint()?;
                debug!("START: {}", version);
                if version != PROTOCOL_VERSION {
                    bail!(ErrorKind::Protocol(
                        format!("unsupported protocol version {}", version),
                    ));
                }
                Ok(Step::Continue)
            }
            SET_JOB_CONF => {
                let count = self.stream.read_vint()?;
                if count < 0 {
                    bail!(ErrorKind::Protocol(
                        format!("negative configuration item count {}", count),
                    ));
                }
                let mut flat = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    flat.push(self.stream.read_string()?);
                }
                let conf = JobConf::new(flat)?;
                debug!("SET_JOB_CONF: {} properties", conf.len());
                self.ctx.set_job_conf(conf);
                Ok(Step::Continue)
            }
            SET_INPUT_TYPES => {
                let key_type = self.stream.read_string()?;
                let value_type = self.stream.read_string()?;
                debug!("SET_INPUT_TYPES: {}, {}", key_type, value_type);
                if !self.raw_keys {
                    if let Some(decoder) = DatumDecoder::for_type_name(&key_type) {
                        self.key_decoder = decoder;
                    }
                }
                if !self.raw_values {
                    if let Some(decoder) = DatumDecoder::for_type_name(&value_type) {
                        self.value_decoder = decoder;
                    }
                }
                Ok(Step::Continue)
            }
            RUN_MAP => self.handle_run_map(),
            MAP_ITEM => {
                let key = self.key_decoder.decode(&mut self.stream, &*self.codec)?;
                let value = self.value_decoder.decode(&mut self.stream, &*self.codec)?;
                debug!("MAP_ITEM: {:?}, {:?}", key, value);
                self.ctx.set_current(key, value);
                self.invoke_mapper()?;
                Ok(Step::Continue)
            }
            RUN_REDUCE => self.handle_run_reduce(),
            REDUCE_KEY | REDUCE_VALUE => {
                bail!(ErrorKind::Protocol(format!(
                    "{} received outside a reduce task",
                    cmd_name(cmd)
                )));
            }
            CLOSE => {
                debug!("CLOSE");
                if self.ctx.mapper_active() {
                    self.ctx.close().chain_err(|| "error finalising map task")?;
                    Ok(Step::Finished)
                } else {
                    Ok(Step::Continue)
                }
            }
            ABORT => {
                debug!("ABORT");
                Err(ErrorKind::Aborted.into())
            }
            other => {
                bail!(ErrorKind::Protocol(format!("unknown command {}", other)));
            }
        }
    }

    fn authenticate(&mut self, digest: &[u8], challenge: &[u8]) -> Result<()> {
        if self.authenticated {
            bail!(ErrorKind::Protocol(
                "authentication requested twice".to_owned(),
            ));
        }
        if let Some(ref secret) = self.secret {
            let expected = create_digest(secret, challenge)?;
            if expected != digest {
                bail!(ErrorKind::Authentication(
                    "host presented an invalid digest".to_owned(),
                ));
            }
            let response = create_digest(secret, digest)?;
            self.ctx.uplink_mut().authenticate(&response)?;
        }
        self.authenticated = true;
        Ok(())
    }

    fn handle_run_map(&mut self) -> Result<Step> {
        let split = if self.raw_split {
            InputSplit::Opaque(self.stream.read_bytes()?)
        } else {
            InputSplit::File(FileSplit::from_stream(&mut self.stream)?)
        };
        let num_reduces = self.stream.read_vint()?;
        let piped_input = self.stream.read_vint()? != 0;
        debug!("RUN_MAP: {:?}, {}, {}", split, num_reduces, piped_input);

        self.ctx.set_input_split(split);
        let mapper = self.factory.create_mapper(&self.ctx).chain_err(
            || "unable to create mapper",
        )?;
        self.ctx.activate_mapper(mapper)?;

        if num_reduces < 1 {
            // Map-only job: output is final, so the worker-private envelope
            // must not leak into it.
            self.ctx.set_private_encoding(false);
            let piped_output = self.ctx.job_conf()?.get_bool(HOST_RECORD_WRITER_KEY)?;
            self.setup_record_writer(piped_output)?;
        }
        self.ctx.set_num_reduces(num_reduces);
        if num_reduces >= 1 {
            let partitioner = self.factory.create_partitioner(&self.ctx).chain_err(
                || "unable to create partitioner",
            )?;
            self.ctx.set_partitioner(partitioner);
        }

        let reader = self.factory.create_record_reader(&self.ctx).chain_err(
            || "unable to create record reader",
        )?;
        if reader.is_some() && piped_input {
            bail!(ErrorKind::Config(
                "record reader defined when input is host-piped".to_owned(),
            ));
        }
        if reader.is_none() && !piped_input {
            bail!(ErrorKind::Config("record reader not defined".to_owned()));
        }

        if let Some(mut reader) = reader {
            let mut mapper = self.ctx.take_mapper()?;
            let outcome = self.drive_reader(&mut *reader, &mut *mapper);
            self.ctx.restore_mapper(mapper);
            self.ctx.set_record_reader(reader);
            outcome?;
            self.ctx.close().chain_err(|| "error finalising map task")?;
            return Ok(Step::Finished);
        }
        Ok(Step::Continue)
    }

    /// The engine's only self-driven iteration: pull records from the
    /// reader until it is exhausted. No further commands are read once it
    /// finishes, not even CLOSE.
    fn drive_reader(&mut self, reader: &mut RecordReader, mapper: &mut Mapper) -> Result<()> {
        let mut records: u64 = 0;
        while let Some((key, value)) = reader.next().chain_err(
            || "error reading input record",
        )?
        {
            self.ctx.set_current(key, value);
            mapper.map(&mut self.ctx).chain_err(
                || "error running map operation",
            )?;
            records += 1;
        }
        debug!("record reader exhausted after {} records", records);
        Ok(())
    }

    fn invoke_mapper(&mut self) -> Result<()> {
        let mut mapper = self.ctx.take_mapper()?;
        let outcome = mapper.map(&mut self.ctx).chain_err(
            || "error running map operation",
        );
        self.ctx.restore_mapper(mapper);
        outcome
    }

    fn handle_run_reduce(&mut self) -> Result<Step> {
        let partition = self.stream.read_vint()?;
        let piped_output = self.stream.read_vint()? != 0;
        debug!("RUN_REDUCE: {}, {}", partition, piped_output);

        let reducer = self.factory
            .create_reducer(&self.ctx)
            .chain_err(|| "unable to create reducer")?
            .ok_or_else(|| {
                Error::from(ErrorKind::Config("reducer not defined".to_owned()))
            })?;
        self.ctx.activate_reducer(reducer)?;
        self.setup_record_writer(piped_output)?;
        if self.ctx.private_encoding() {
            // The map half wrapped keys and values in the worker-private
            // envelope; unwrap with the matching decoder.
            self.key_decoder = DatumDecoder::Opaque;
            self.value_decoder = DatumDecoder::Opaque;
        }

        let mut have_key = false;
        loop {
            let cmd = self.stream.read_vint()?;
            match cmd {
                REDUCE_KEY => {
                    let key = self.key_decoder.decode(&mut self.stream, &*self.codec)?;
                    debug!("REDUCE_KEY: {:?}", key);
                    self.ctx.set_current_key(key);
                    have_key = true;
                }
                REDUCE_VALUE => {
                    if !have_key {
                        bail!(ErrorKind::Protocol(
                            "REDUCE_VALUE received before any REDUCE_KEY".to_owned(),
                        ));
                    }
                    let terminator = self.reduce_group()?;
                    match terminator {
                        REDUCE_KEY => {
                            let key =
                                self.key_decoder.decode(&mut self.stream, &*self.codec)?;
                            debug!("REDUCE_KEY: {:?}", key);
                            self.ctx.set_current_key(key);
                        }
                        CLOSE => {
                            debug!("CLOSE");
                            self.ctx.close().chain_err(
                                || "error finalising reduce task",
                            )?;
                            return Ok(Step::Finished);
                        }
                        ABORT => {
                            debug!("ABORT");
                            return Err(ErrorKind::Aborted.into());
                        }
                        other => {
                            bail!(ErrorKind::Protocol(format!(
                                "{} ({}) received inside a reduce task",
                                cmd_name(other),
                                other
                            )));
                        }
                    }
                }
                CLOSE => {
                    debug!("CLOSE");
                    self.ctx.close().chain_err(|| "error finalising reduce task")?;
                    return Ok(Step::Finished);
                }
                ABORT => {
                    debug!("ABORT");
                    return Err(ErrorKind::Aborted.into());
                }
                other => {
                    bail!(ErrorKind::Protocol(format!(
                        "{} ({}) received inside a reduce task",
                        cmd_name(other),
                        other
                    )));
                }
            }
        }
    }

    /// Runs the reducer over one key's value run. The values stream off the
    /// wire as the reducer pulls them; whatever it leaves behind is drained
    /// so the loop lands on the run's terminating command.
    fn reduce_group(&mut self) -> Result<i32> {
        let mut reducer = self.ctx.take_reducer()?;
        let mut values = ReduceValues::new(
            &mut self.stream,
            self.value_decoder,
            Arc::clone(&self.codec),
        );
        let outcome = reducer.reduce(&mut self.ctx, &mut values).chain_err(
            || "error running reduce operation",
        );
        match outcome {
            Ok(()) => {
                let terminator = values.finish();
                self.ctx.restore_reducer(reducer);
                terminator
            }
            Err(err) => {
                self.ctx.restore_reducer(reducer);
                Err(err)
            }
        }
    }

    fn setup_record_writer(&mut self, piped_output: bool) -> Result<()> {
        let writer = self.factory.create_record_writer(&self.ctx).chain_err(
            || "unable to create record writer",
        )?;
        if writer.is_some() && piped_output {
            bail!(ErrorKind::Config(
                "record writer defined when output is host-piped".to_owned(),
            ));
        }
        if writer.is_none() && !piped_output {
            bail!(ErrorKind::Config("record writer not defined".to_owned()));
        }
        self.ctx.set_record_writer(writer);
        Ok(())
    }
}
