use gate_node::config::Config;
use gate_node::node::{self, NodeError};
use telemetry::LogConfig;

fn main() {
    let exit_code = match run() {
        Ok(()) => 0,
        Err(e @ NodeError::Startup(_)) => {
            eprintln!("gate-node: {e}");
            1
        }
        Err(e @ NodeError::Runtime(_)) => {
            eprintln!("gate-node: {e}");
            2
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<(), NodeError> {
    let config = Config::from_env().map_err(NodeError::Startup)?;
    let _log_guard = telemetry::init_logging(LogConfig::new(config.gate_id.clone()));
    node::run(config)
}
