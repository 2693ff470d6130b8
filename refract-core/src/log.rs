pub use log::{trace, debug, info, warn, error, LevelFilter};

/// Install the global logger. `RUST_LOG` overrides `level` per module.
pub fn initialize(level: LevelFilter) -> Result<(), ::log::SetLoggerError> {
    builder(level).try_init()
}

/// Like [`initialize`], but a logger that is already installed is not an error.
///
/// Test binaries call this from every test, only the first call wins.
pub fn try_initialize(level: LevelFilter) {
    let _ = builder(level).is_test(true).try_init();
}

fn builder(level: LevelFilter) -> env_logger::Builder {
    let mut builder = env_logger::builder();
    builder
        .filter_level(level)
        .filter_module("rspirv_reflect", LevelFilter::Warn)
        .filter_module("shaderc", LevelFilter::Warn)
        .parse_default_env();
    builder
}
