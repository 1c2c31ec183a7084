//! The application entry point for running one task attempt.

use api::Factory;
use connection::{load_secret, Connection};
use errors::*;
use protocol::{ProtocolHandler, RunOptions};
use stream::InStream;
use uplink::UplinkEncoder;

/// Runs one task attempt against the host named by the environment.
///
/// The factory supplies the application's components; `options` tunes how
/// records are decoded and encoded. The call returns once the host closes
/// the task, and returns an error for protocol violations, authentication
/// failures, an abort, or a failing user component.
pub fn run_task(factory: Box<Factory>, options: RunOptions) -> Result<()> {
    let connection = Connection::open().chain_err(
        || "unable to establish the command channel",
    )?;
    let secret = load_secret().chain_err(|| "unable to load the shared secret")?;
    let (downlink, uplink) = connection.into_streams();
    let mut handler = ProtocolHandler::new(
        InStream::new(downlink),
        UplinkEncoder::new(uplink),
        factory,
        secret,
        options,
    );
    handler.run()
}
