#![recursion_limit = "1024"]

extern crate base64;
extern crate bson;
extern crate byteorder;
extern crate env_logger;
#[macro_use]
extern crate error_chain;
extern crate hmac;
#[macro_use]
extern crate log;
extern crate sha1;

pub mod errors {
    error_chain! {
        foreign_links {
            Io(::std::io::Error);
        }

        errors {
            Protocol(msg: String) {
                description("protocol violation")
                display("protocol violation: {}", msg)
            }
            Authentication(msg: String) {
                description("authentication failure")
                display("authentication failure: {}", msg)
            }
            Config(msg: String) {
                description("invalid configuration")
                display("invalid configuration: {}", msg)
            }
            Aborted {
                description("task aborted by host")
                display("task aborted by host")
            }
        }
    }
}

pub mod api;
pub mod conf;
pub mod connection;
pub mod context;
pub mod logging;
pub mod protocol;
pub mod runner;
pub mod serialise;
pub mod stream;
pub mod uplink;

pub use logging::init_logger;
pub use protocol::{ProtocolHandler, RunOptions};
pub use runner::run_task;
