use std::io::{self, Write};

use serde::Serialize;

use crate::app::{AcquisitionReport, ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &AcquisitionReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Human-readable progress on stderr and a coloured summary on stdout.
pub struct TextOutput {
    color: bool,
}

impl TextOutput {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    pub fn print_report(&self, report: &AcquisitionReport) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        if report.models.is_empty() {
            writeln!(
                stdout,
                "{}",
                self.paint("33", "No model provides every requested experiment and variable.")
            )?;
            return Ok(());
        }
        writeln!(
            stdout,
            "{} {}",
            self.paint("1", "Models:"),
            report.models.join(", ")
        )?;
        for batch in &report.batches {
            writeln!(
                stdout,
                "{}",
                self.paint("1;36", &format!("{}/{}", batch.model, batch.experiment))
            )?;
            for variable in &batch.variables {
                let failed = variable.failed + variable.process_failed;
                let status = if failed > 0 {
                    self.paint("31", &format!("{failed} failed"))
                } else {
                    self.paint("32", "ok")
                };
                writeln!(
                    stdout,
                    "  {:<8} fetched {:>3}  skipped {:>3}  processed {:>3}  artifacts {:>3}  {status}",
                    variable.variable,
                    variable.fetched,
                    variable.skipped,
                    variable.processed,
                    variable.artifacts.len(),
                )?;
            }
            if !batch.merged.is_empty() {
                writeln!(stdout, "  merged   {} yearly table(s)", batch.merged.len())?;
            }
        }
        let totals = report.totals();
        writeln!(
            stdout,
            "{} fetched {}, skipped {}, failed {}, output in {}",
            self.paint("1", "Total:"),
            totals.fetched,
            totals.skipped,
            totals.failed + totals.process_failed,
            report.output_root
        )?;
        Ok(())
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.color {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        let message = match event.elapsed {
            Some(elapsed) => format!("[{:>6.1}s] {}", elapsed.as_secs_f64(), event.message),
            None => event.message,
        };
        eprintln!("{}", self.paint("2", &message));
    }
}
