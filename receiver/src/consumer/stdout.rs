//! Stdout consumer for debugging
//!
//! Prints spans and log records to stdout in a human-readable format.
//! Useful for development and for checking what producers actually send.

use async_trait::async_trait;
use laituri_core::proto::{
    AnyValue, ExportLogsServiceRequest, ExportTraceServiceRequest, LogRecord, Span, any_value,
};
use laituri_core::{PluginError, TelemetryConsumer};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stdout consumer - prints telemetry for debugging
pub struct StdoutConsumer {
    /// Multi-line boxed output instead of one line per record
    pretty: bool,
    /// Records written so far
    printed_count: AtomicU64,
}

impl StdoutConsumer {
    /// One line per record
    pub fn new() -> Self {
        Self {
            pretty: false,
            printed_count: AtomicU64::new(0),
        }
    }

    /// Boxed multi-line output
    pub fn pretty() -> Self {
        Self {
            pretty: true,
            printed_count: AtomicU64::new(0),
        }
    }

    /// Spans and log records written so far
    pub fn printed_count(&self) -> u64 {
        self.printed_count.load(Ordering::Relaxed)
    }

    fn write_span(&self, out: &mut impl Write, span: &Span) -> std::io::Result<()> {
        let duration_ns = span
            .end_time_unix_nano
            .saturating_sub(span.start_time_unix_nano);
        let status = span.status.as_ref().map_or(0, |s| s.code);

        if self.pretty {
            writeln!(out, "┌─ Span ──────────────────────────────────────────────")?;
            writeln!(out, "│ Name:      {}", span.name)?;
            writeln!(out, "│ Trace:     {}", hex::encode(&span.trace_id))?;
            writeln!(out, "│ Span:      {}", hex::encode(&span.span_id))?;
            if !span.parent_span_id.is_empty() {
                writeln!(out, "│ Parent:    {}", hex::encode(&span.parent_span_id))?;
            }
            writeln!(out, "│ Kind:      {}", span.kind)?;
            writeln!(out, "│ Duration:  {} ns", duration_ns)?;
            writeln!(out, "│ Status:    {}", status)?;
            for attr in &span.attributes {
                writeln!(out, "│   {} = {}", attr.key, render(attr.value.as_ref()))?;
            }
            writeln!(out, "└─────────────────────────────────────────────────────")
        } else {
            writeln!(
                out,
                "[span] {}/{} {} ({} ns, status {})",
                hex::encode(&span.trace_id),
                hex::encode(&span.span_id),
                span.name,
                duration_ns,
                status
            )
        }
    }

    fn write_log(&self, out: &mut impl Write, record: &LogRecord) -> std::io::Result<()> {
        let body = render(record.body.as_ref());

        if self.pretty {
            writeln!(out, "┌─ Log ───────────────────────────────────────────────")?;
            writeln!(out, "│ Time:      {} ns", record.time_unix_nano)?;
            writeln!(
                out,
                "│ Severity:  {} ({})",
                record.severity_text, record.severity_number
            )?;
            writeln!(out, "│ Body:      {}", body)?;
            if !record.trace_id.is_empty() {
                writeln!(out, "│ Trace:     {}", hex::encode(&record.trace_id))?;
            }
            if !record.span_id.is_empty() {
                writeln!(out, "│ Span:      {}", hex::encode(&record.span_id))?;
            }
            for attr in &record.attributes {
                writeln!(out, "│   {} = {}", attr.key, render(attr.value.as_ref()))?;
            }
            writeln!(out, "└─────────────────────────────────────────────────────")
        } else {
            writeln!(
                out,
                "[log] {} {} ({} attributes)",
                if record.severity_text.is_empty() {
                    "-"
                } else {
                    record.severity_text.as_str()
                },
                body,
                record.attributes.len()
            )
        }
    }
}

impl Default for StdoutConsumer {
    fn default() -> Self {
        Self::new()
    }
}

fn render(value: Option<&AnyValue>) -> String {
    match value.and_then(|v| v.value.as_ref()) {
        Some(any_value::Value::StringValue(s)) => s.clone(),
        Some(any_value::Value::BoolValue(b)) => b.to_string(),
        Some(any_value::Value::IntValue(i)) => i.to_string(),
        Some(any_value::Value::DoubleValue(d)) => d.to_string(),
        Some(other) => format!("{other:?}"),
        None => String::new(),
    }
}

#[async_trait]
impl TelemetryConsumer for StdoutConsumer {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn consume_traces(&self, traces: &ExportTraceServiceRequest) -> Result<(), PluginError> {
        let mut stdout = std::io::stdout().lock();
        let mut printed = 0u64;

        let spans = traces
            .resource_spans
            .iter()
            .flat_map(|rs| &rs.scope_spans)
            .flat_map(|ss| &ss.spans);
        for span in spans {
            if let Err(e) = self.write_span(&mut stdout, span) {
                self.printed_count.fetch_add(printed, Ordering::Relaxed);
                return Err(PluginError::Consume(format!("stdout write failed: {e}")));
            }
            printed += 1;
        }

        self.printed_count.fetch_add(printed, Ordering::Relaxed);
        Ok(())
    }

    async fn consume_logs(&self, logs: &ExportLogsServiceRequest) -> Result<(), PluginError> {
        let mut stdout = std::io::stdout().lock();
        let mut printed = 0u64;

        let records = logs
            .resource_logs
            .iter()
            .flat_map(|rl| &rl.scope_logs)
            .flat_map(|sl| &sl.log_records);
        for record in records {
            if let Err(e) = self.write_log(&mut stdout, record) {
                self.printed_count.fetch_add(printed, Ordering::Relaxed);
                return Err(PluginError::Consume(format!("stdout write failed: {e}")));
            }
            printed += 1;
        }

        self.printed_count.fetch_add(printed, Ordering::Relaxed);
        Ok(())
    }
}
