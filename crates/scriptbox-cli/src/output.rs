//! Colored terminal output shared by the commands.
//!
//! Uses `termcolor`. Respects the `NO_COLOR` environment variable and the
//! `--color` flag.

use scriptbox_engine::security::SecurityReport;
use scriptbox_engine::{Diagnostic, ScriptError, Severity};
use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Resolve `ColorChoice` from the CLI flag and environment.
///
/// Priority: `NO_COLOR` env > `--color` flag > auto-detect TTY.
pub fn resolve_color_choice(flag: Option<&str>) -> ColorChoice {
    if std::env::var_os("NO_COLOR").is_some() {
        return ColorChoice::Never;
    }
    match flag {
        Some("always") => ColorChoice::Always,
        Some("never") => ColorChoice::Never,
        _ => ColorChoice::Auto,
    }
}

/// Styled output writer for the terminal.
pub struct StyledOutput {
    stdout: StandardStream,
    stderr: StandardStream,
}

impl StyledOutput {
    /// Create a styled output with the given color choice.
    pub fn new(choice: ColorChoice) -> Self {
        Self {
            stdout: StandardStream::stdout(choice),
            stderr: StandardStream::stderr(choice),
        }
    }

    /// Write text with a color and style.
    pub fn write_styled(&mut self, text: &str, color: Option<Color>, bold: bool) {
        let mut spec = ColorSpec::new();
        spec.set_fg(color).set_bold(bold);
        let _ = self.stdout.set_color(&spec);
        let _ = write!(self.stdout, "{}", text);
        let _ = self.stdout.reset();
    }

    /// Green bold text.
    pub fn success(&mut self, text: &str) {
        self.write_styled(text, Some(Color::Green), true);
    }

    /// Red bold text.
    pub fn error(&mut self, text: &str) {
        self.write_styled(text, Some(Color::Red), true);
    }

    /// Yellow bold text.
    pub fn warning(&mut self, text: &str) {
        self.write_styled(text, Some(Color::Yellow), true);
    }

    /// Cyan text.
    pub fn info(&mut self, text: &str) {
        self.write_styled(text, Some(Color::Cyan), false);
    }

    /// Dim text.
    pub fn dim(&mut self, text: &str) {
        self.write_styled(text, Some(Color::White), false);
    }

    /// Bold text.
    pub fn bold(&mut self, text: &str) {
        self.write_styled(text, None, true);
    }

    /// Plain text.
    pub fn plain(&mut self, text: &str) {
        let _ = write!(self.stdout, "{}", text);
    }

    /// Newline.
    pub fn newline(&mut self) {
        let _ = writeln!(self.stdout);
    }

    /// Flush stdout.
    pub fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    /// Error message on stderr.
    pub fn stderr_error(&mut self, text: &str) {
        let mut spec = ColorSpec::new();
        spec.set_fg(Some(Color::Red)).set_bold(true);
        let _ = self.stderr.set_color(&spec);
        let _ = write!(self.stderr, "error");
        let _ = self.stderr.reset();
        let _ = writeln!(self.stderr, ": {}", text);
    }

    // ── Engine results ──────────────────────────────────────────────

    /// One compiler diagnostic, colored by severity.
    pub fn diagnostic(&mut self, diagnostic: &Diagnostic) {
        if let Some(file) = &diagnostic.file {
            self.dim(&format!("{}:{}:{}: ", file, diagnostic.line, diagnostic.column));
        }
        let label = format!("{}[{}]", diagnostic.severity, diagnostic.code);
        match diagnostic.severity {
            Severity::Error => self.error(&label),
            Severity::Warning => self.warning(&label),
            Severity::Info | Severity::Hidden => self.info(&label),
        }
        self.plain(&format!(": {}", diagnostic.message));
        self.newline();
    }

    /// Every violation in a security report.
    pub fn security_report(&mut self, report: &SecurityReport) {
        self.error("security");
        self.plain(&format!(
            ": module '{}' rejected ({} violation(s), policy {})",
            report.module,
            report.violations.len(),
            report.policy_hash
        ));
        self.newline();
        for violation in &report.violations {
            self.plain("  ");
            self.warning(&violation.kind.to_string());
            self.plain(&format!(" '{}' ", violation.target));
            self.dim(&format!("({})", violation.rule));
            self.newline();
        }
    }

    /// Details for errors that carry diagnostics or a report; a plain line
    /// otherwise.
    pub fn script_error(&mut self, error: &ScriptError) {
        match error {
            ScriptError::CompileFailure(diagnostics) => {
                for diagnostic in diagnostics {
                    self.diagnostic(diagnostic);
                }
            }
            ScriptError::SecurityViolation(report) => self.security_report(report),
            other => self.stderr_error(&other.to_string()),
        }
        self.flush();
    }
}
