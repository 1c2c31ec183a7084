//! Establishing the duplex command channel to the host.
//!
//! The host launches each task with the channel location in the
//! environment: either a TCP port on the local host, or the path of a
//! command file (with the uplink written to a sibling file). There is no
//! retry at this layer; if the host is not listening, the task dies and
//! the host reschedules it.

use std::env;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::net::TcpStream;

use errors::*;

pub const COMMAND_PORT_KEY: &str = "mapreduce.pipes.command.port";
pub const COMMAND_FILE_KEY: &str = "mapreduce.pipes.commandfile";
pub const SECRET_LOCATION_KEY: &str = "hadoop.pipes.shared.secret.location";

/// An established duplex channel. Dropping the streams closes the
/// underlying socket or files.
pub struct Connection {
    downlink: Box<Read>,
    uplink: Box<Write>,
}

impl Connection {
    /// Connects using whichever channel location the environment supplies.
    pub fn open() -> Result<Connection> {
        if let Ok(port) = env::var(COMMAND_PORT_KEY) {
            return Connection::open_network(&port);
        }
        if let Ok(path) = env::var(COMMAND_FILE_KEY) {
            return Connection::open_files(&path);
        }
        Err(
            ErrorKind::Config(
                "neither a command port nor a command file is configured".to_owned(),
            ).into(),
        )
    }

    fn open_network(port: &str) -> Result<Connection> {
        let port: u16 = port.trim().parse().chain_err(
            || format!("invalid command port {:?}", port),
        )?;
        let socket = TcpStream::connect(("127.0.0.1", port)).chain_err(
            || format!("unable to connect to command port {}", port),
        )?;
        let reader = socket.try_clone().chain_err(
            || "unable to clone the command socket",
        )?;
        info!("connected to command port {}", port);
        Ok(Connection {
            downlink: Box::new(BufReader::new(reader)),
            uplink: Box::new(BufWriter::new(socket)),
        })
    }

    fn open_files(path: &str) -> Result<Connection> {
        let out_path = format!("{}.out", path);
        let input = File::open(path).chain_err(
            || format!("unable to open command file {}", path),
        )?;
        let output = File::create(&out_path).chain_err(
            || format!("unable to create command output file {}", out_path),
        )?;
        info!("using command file {} with output {}", path, out_path);
        Ok(Connection {
            downlink: Box::new(BufReader::new(input)),
            uplink: Box::new(BufWriter::new(output)),
        })
    }

    pub fn into_streams(self) -> (Box<Read>, Box<Write>) {
        (self.downlink, self.uplink)
    }
}

/// Reads the shared authentication secret named by the environment, if
/// any. `None` means the channel is trusted and verification is skipped.
pub fn load_secret() -> Result<Option<Vec<u8>>> {
    let path = match env::var(SECRET_LOCATION_KEY) {
        Ok(path) => path,
        Err(_) => return Ok(None),
    };
    let mut secret = Vec::new();
    File::open(&path)
        .chain_err(|| format!("unable to open secret file {}", path))?
        .read_to_end(&mut secret)
        .chain_err(|| format!("unable to read secret file {}", path))?;
    Ok(Some(secret))
}
