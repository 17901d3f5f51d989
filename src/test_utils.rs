use slog::Drain;

/// Logger whose output is captured by the test harness.
pub(crate) fn test_logger() -> slog::Logger {
    let decorator = slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
