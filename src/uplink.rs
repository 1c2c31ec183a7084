//! Encoding of worker-to-host commands.

use std::io::Write;

use errors::*;
use stream::OutStream;

pub const OUTPUT: i32 = 50;
pub const PARTITIONED_OUTPUT: i32 = 51;
pub const STATUS: i32 = 52;
pub const PROGRESS: i32 = 53;
pub const DONE: i32 = 54;
pub const REGISTER_COUNTER: i32 = 55;
pub const INCREMENT_COUNTER: i32 = 56;
pub const AUTHENTICATION_RESP: i32 = 57;

/// Serialises outgoing commands onto the uplink. Every command is flushed
/// as soon as it is written, so status and progress reach the host's
/// liveness watchdog without sitting in a buffer behind bulk output.
pub struct UplinkEncoder {
    stream: OutStream<Box<Write>>,
}

impl UplinkEncoder {
    pub fn new(sink: Box<Write>) -> UplinkEncoder {
        UplinkEncoder { stream: OutStream::new(sink) }
    }

    pub fn authenticate(&mut self, response_digest: &[u8]) -> Result<()> {
        debug!("up: AUTHENTICATION_RESP");
        self.stream.write_vint(AUTHENTICATION_RESP)?;
        self.stream.write_bytes(response_digest)?;
        self.stream.flush()
    }

    pub fn output(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        debug!("up: OUTPUT {} + {} bytes", key.len(), value.len());
        self.stream.write_vint(OUTPUT)?;
        self.stream.write_bytes(key)?;
        self.stream.write_bytes(value)?;
        self.stream.flush()
    }

    pub fn partitioned_output(&mut self, partition: i32, key: &[u8], value: &[u8]) -> Result<()> {
        debug!(
            "up: PARTITIONED_OUTPUT {} {} + {} bytes",
            partition,
            key.len(),
            value.len()
        );
        self.stream.write_vint(PARTITIONED_OUTPUT)?;
        self.stream.write_vint(partition)?;
        self.stream.write_bytes(key)?;
        self.stream.write_bytes(value)?;
        self.stream.flush()
    }

    pub fn status(&mut self, message: &str) -> Result<()> {
        debug!("up: STATUS {}", message);
        self.stream.write_vint(STATUS)?;
        self.stream.write_string(message)?;
        self.stream.flush()
    }

    pub fn progress(&mut self, fraction: f32) -> Result<()> {
        debug!("up: PROGRESS {}", fraction);
        self.stream.write_vint(PROGRESS)?;
        self.stream.write_float(fraction)?;
        self.stream.flush()
    }

    pub fn done(&mut self) -> Result<()> {
        debug!("up: DONE");
        self.stream.write_vint(DONE)?;
        self.stream.flush()
    }

    pub fn register_counter(&mut self, id: i32, group: &str, name: &str) -> Result<()> {
        debug!("up: REGISTER_COUNTER {} {}.{}", id, group, name);
        self.stream.write_vint(REGISTER_COUNTER)?;
        self.stream.write_vint(id)?;
        self.stream.write_string(group)?;
        self.stream.write_string(name)?;
        self.stream.flush()
    }

    pub fn increment_counter(&mut self, id: i32, amount: i64) -> Result<()> {
        debug!("up: INCREMENT_COUNTER {} by {}", id, amount);
        self.stream.write_vint(INCREMENT_COUNTER)?;
        self.stream.write_vint(id)?;
        self.stream.write_vlong(amount)?;
        self.stream.flush()
    }
}
