use env_logger::LogBuilder;
use error_chain::ChainedError;
use errors::*;
use log::LogRecord;
use std::env;

const DEFAULT_LOG_CONFIG: &str = "info";

pub fn init_logger() -> Result<()> {
    let builder = &mut LogBuilder::new();
    builder.format(|record: &LogRecord| {
        format!("{} [{}] {}", record.level(), record.target(), record.args())
    });
    let builder = {
        match env::var("RUST_LOG") {
            Ok(log_config) => builder.parse(&log_config),
            Err(_) => builder.parse(DEFAULT_LOG_CONFIG),
        }
    };

    builder.init().chain_err(|| "Failed to build env_logger")?;
    Ok(())
}

pub fn output_error<E: ChainedError>(err: &E) {
    error!("{}", err);

    for e in err.iter().skip(1) {
        error!("caused by: {}", e);
    }

    if let Some(backtrace) = err.backtrace() {
        error!("backtrace: {:?}", backtrace);
    }
}
