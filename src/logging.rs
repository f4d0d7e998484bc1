use colored::*;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;

/// Console formatter for the watchdog's status output.
///
/// Each line is colored by severity and prefixed with the component that
/// emitted it (the last segment of the event target, e.g. `[watchdog]`).
/// Timestamps and levels are left out; the log file carries those.
pub struct StatusFormatter;

/// Last `::` segment of a tracing target.
pub fn component_name(target: &str) -> &str {
    target.rsplit("::").next().unwrap_or(target)
}

impl<S, N> FormatEvent<S, N> for StatusFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        // Buffer the fields so the whole line takes one color.
        let mut buffer = String::new();
        let mut buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer.by_ref(), event)?;

        let line = format!(
            "[{}] {}",
            component_name(event.metadata().target()),
            buffer
        );
        let colored_output = match *event.metadata().level() {
            Level::INFO => line.white(),
            Level::WARN => line.yellow(),
            Level::ERROR => line.red(),
            Level::DEBUG => line.blue(),
            Level::TRACE => line.purple(),
        };

        writeln!(writer, "{}", colored_output)
    }
}
