fn env_truthy(var: &str) -> Option<bool> {
    std::env::var(var).map(|v| v != "0" && !v.is_empty()).ok()
}

pub mod logging {
    use clap::ValueEnum;
    use parking_lot::Mutex;
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use tracing::level_filters::LevelFilter;
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_subscriber::EnvFilter;

    pub const ENV_LOG_FILTER: &str = "RTC_RELAY_LOG_FILTER";
    pub const ENV_TRACE_DEPS: &str = "RTC_RELAY_TRACE_DEPS";

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl LogLevel {
        pub fn as_str(self) -> &'static str {
            match self {
                LogLevel::Error => "error",
                LogLevel::Warn => "warn",
                LogLevel::Info => "info",
                LogLevel::Debug => "debug",
                LogLevel::Trace => "trace",
            }
        }

        pub fn to_filter(self) -> LevelFilter {
            match self {
                LogLevel::Error => LevelFilter::ERROR,
                LogLevel::Warn => LevelFilter::WARN,
                LogLevel::Info => LevelFilter::INFO,
                LogLevel::Debug => LevelFilter::DEBUG,
                LogLevel::Trace => LevelFilter::TRACE,
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("failed to open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("failed to configure logger: {0}")]
        Configure(String),
    }

    /// Holds the writer guard of the installed subscriber; `Some` once
    /// logging is up.
    static GUARD: Mutex<Option<WorkerGuard>> = Mutex::new(None);

    /// Installs the global subscriber. Later and concurrent calls are no-ops.
    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        let mut guard = GUARD.lock();
        if guard.is_some() {
            return Ok(());
        }
        *guard = Some(inner_init(config)?);
        Ok(())
    }

    fn inner_init(config: &LogConfig) -> Result<WorkerGuard, InitError> {
        let level_filter = config.level.to_filter();

        let (env_filter, throttled_deps) = build_env_filter(level_filter);

        let (writer, worker_guard) = match &config.file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| InitError::Io {
                        path: path.clone(),
                        source,
                    })?;
                tracing_appender::non_blocking(file)
            }
            None => tracing_appender::non_blocking(std::io::stderr()),
        };

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_level(true)
            .with_target(config.level >= LogLevel::Debug)
            .with_thread_ids(config.level >= LogLevel::Trace)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|err| InitError::Configure(err.to_string()))?;

        if throttled_deps {
            eprintln!(
                "[rtc-relay] suppressing dependency trace noise; set {ENV_TRACE_DEPS}=1 or {ENV_LOG_FILTER} to override"
            );
        }
        Ok(worker_guard)
    }

    fn build_env_filter(level: LevelFilter) -> (EnvFilter, bool) {
        if let Ok(filter) = std::env::var(ENV_LOG_FILTER) {
            return (EnvFilter::new(filter), false);
        }
        let (filter, throttled) = default_filter_for(level, allow_dependency_traces());
        (EnvFilter::new(filter), throttled)
    }

    const TRACE_DEP_TARGETS: &[&str] = &[
        "webrtc",
        "webrtc_ice",
        "webrtc_dtls",
        "webrtc_sctp",
        "webrtc_data",
        "webrtc_mdns",
        "hyper",
        "reqwest",
        "rustls",
        "mio",
        "h2",
    ];

    fn default_filter_for(level: LevelFilter, allow_deps: bool) -> (String, bool) {
        let base = match level {
            LevelFilter::TRACE => "info,rtc_relay=trace",
            LevelFilter::DEBUG => "info,rtc_relay=debug",
            LevelFilter::INFO => "info",
            LevelFilter::WARN => "warn",
            LevelFilter::ERROR => "error",
            LevelFilter::OFF => "off",
        };
        if level == LevelFilter::TRACE && !allow_deps {
            (throttle_dependency_traces(base), true)
        } else {
            (base.to_owned(), false)
        }
    }

    fn allow_dependency_traces() -> bool {
        super::env_truthy(ENV_TRACE_DEPS).unwrap_or(false)
    }

    fn throttle_dependency_traces(base: &str) -> String {
        let mut filter = base.to_owned();
        for target in TRACE_DEP_TARGETS {
            filter.push(',');
            filter.push_str(target);
            filter.push_str("=info");
        }
        filter
    }

    /// Classic offset/hex/ascii dump, used when printing binary payloads.
    pub fn hexdump(bytes: &[u8]) -> String {
        const WIDTH: usize = 16;
        let mut out = String::new();
        for (i, chunk) in bytes.chunks(WIDTH).enumerate() {
            use std::fmt::Write as _;
            let offset = i * WIDTH;
            let _ = write!(out, "{offset:08x}  ");
            for (j, byte) in chunk.iter().enumerate() {
                if j == WIDTH / 2 {
                    out.push(' ');
                }
                let _ = write!(out, "{byte:02x} ");
            }
            for _ in chunk.len()..WIDTH {
                out.push_str("   ");
            }
            out.push(' ');
            for &byte in chunk {
                let ch = if (0x20..=0x7e).contains(&byte) {
                    byte as char
                } else {
                    '.'
                };
                out.push(ch);
            }
            out.push('\n');
        }
        out
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn trace_level_throttles_dependencies_unless_allowed() {
            let (filter, throttled) = default_filter_for(LevelFilter::TRACE, false);
            assert!(throttled);
            assert!(filter.starts_with("info,rtc_relay=trace"));
            assert!(filter.contains("webrtc_ice=info"));
            assert!(filter.contains("reqwest=info"));

            let (filter, throttled) = default_filter_for(LevelFilter::TRACE, true);
            assert!(!throttled);
            assert_eq!(filter, "info,rtc_relay=trace");
        }

        #[test]
        fn quieter_levels_pass_through() {
            assert_eq!(default_filter_for(LevelFilter::WARN, false).0, "warn");
            assert_eq!(
                default_filter_for(LevelFilter::DEBUG, false).0,
                "info,rtc_relay=debug"
            );
        }

        #[test]
        fn hexdump_renders_offset_hex_and_ascii() {
            let dump = hexdump(b"hi\x00");
            assert!(dump.starts_with("00000000  68 69 00 "));
            assert!(dump.trim_end().ends_with("hi."));
        }

        #[test]
        fn concurrent_init_installs_one_subscriber() {
            let path = std::env::temp_dir()
                .join(format!("rtc-relay-init-{}.log", std::process::id()));
            let config = LogConfig {
                level: LogLevel::Warn,
                file: Some(path.clone()),
            };
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let config = config.clone();
                    std::thread::spawn(move || init(&config))
                })
                .collect();
            for handle in handles {
                handle.join().expect("init thread").expect("init");
            }
            assert!(path.exists());
            assert!(init(&LogConfig::default()).is_ok());
            let _ = std::fs::remove_file(&path);
        }

        #[test]
        fn log_level_ordering_matches_verbosity() {
            assert!(LogLevel::Trace > LogLevel::Debug);
            assert_eq!(LogLevel::default(), LogLevel::Warn);
            assert_eq!(LogLevel::Info.as_str(), "info");
        }
    }
}
