use crate::config::Config;
use log::LevelFilter;
use simplelog::{self, ConfigBuilder};

/// HTTP and TLS crates underneath every provider call. Module paths are matched
/// by prefix, so `reqwest` also covers `reqwest_middleware` and `reqwest_retry`.
const TRANSPORT_MODULES: &[&str] = &["reqwest", "hyper", "hyper_util", "h2", "rustls", "mio"];

pub struct Logger {}

impl Logger {
    /// Install the terminal logger for the CLI.
    ///
    /// Everything goes to stderr: `status` and `call` print JSON on stdout and
    /// that output has to stay parseable. Transport records only show at TRACE,
    /// where a failing token exchange can be followed down to the socket.
    /// Fails if a global logger is already installed.
    pub fn init_logger(config: &Config) -> Result<(), log::SetLoggerError> {
        let level = config.log_level_filter;

        simplelog::TermLogger::init(
            level,
            Self::build_log_config(Self::hides_transport(level)),
            simplelog::TerminalMode::Stderr,
            simplelog::ColorChoice::Auto,
        )
    }

    fn hides_transport(level: LevelFilter) -> bool {
        level < LevelFilter::Trace
    }

    fn build_log_config(hide_transport: bool) -> simplelog::Config {
        let mut builder = ConfigBuilder::new();
        builder.set_time_format_rfc3339();

        if hide_transport {
            for module in TRANSPORT_MODULES {
                builder.add_filter_ignore_str(module);
            }
        }

        builder.build()
    }
}
