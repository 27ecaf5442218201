use log::{LevelFilter, SetLoggerError};
use log4rs::{
    Config,
    append::console::{ConsoleAppender, Target},
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
};

#[derive(thiserror::Error, Debug)]
pub enum LogError {
    #[error("invalid logger configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Logger(#[from] SetLoggerError),
}

/// Sends log records at `level` and above to stderr, and logs panics before they unwind.
pub fn init_log(level: LevelFilter) -> Result<(), LogError> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("[{h({l})} - {f}:{L}] {m}{n}")))
        .build();
    let appender = Appender::builder().build("stderr", Box::new(stderr));

    let config = Config::builder()
        .appender(appender)
        .build(Root::builder().appender("stderr").build(level))
        .map_err(|err| LogError::Config(err.to_string()))?;
    log4rs::init_config(config)?;
    update_panic_hook();

    Ok(())
}

fn update_panic_hook() {
    let hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        log::error!("PANIC => {info}");
        hook(info);
    }));
}
