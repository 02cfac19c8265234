use std::sync::{Mutex, MutexGuard};

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Info,
}

/// A user-facing problem found while inlining, such as a recursive
/// inline call. Compilation continues after it is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    /// Textual call-site location, `file:line` when known.
    pub location: String,
    pub message: String,
}

impl Diagnostic {
    pub fn error(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn warning(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn info(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Info,
            location: location.into(),
            message: message.into(),
        }
    }
}

/// Sink for user-facing diagnostics
pub trait DiagnosticHandler: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);

    fn error(&self, location: &str, message: &str) {
        self.report(Diagnostic::error(location, message));
    }

    fn warning(&self, location: &str, message: &str) {
        self.report(Diagnostic::warning(location, message));
    }

    fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    fn error_count(&self) -> usize;
    fn get_diagnostics(&self) -> Vec<Diagnostic>;
}

fn lock(diagnostics: &Mutex<Vec<Diagnostic>>) -> MutexGuard<'_, Vec<Diagnostic>> {
    diagnostics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn count_errors(diagnostics: &Mutex<Vec<Diagnostic>>) -> usize {
    lock(diagnostics)
        .iter()
        .filter(|d| d.level == DiagnosticLevel::Error)
        .count()
}

/// Prints diagnostics to stderr as they arrive
pub struct ConsoleDiagnosticHandler {
    diagnostics: Mutex<Vec<Diagnostic>>,
    pretty: bool,
}

impl ConsoleDiagnosticHandler {
    pub fn new(pretty: bool) -> Self {
        Self {
            diagnostics: Mutex::new(Vec::new()),
            pretty,
        }
    }
}

impl DiagnosticHandler for ConsoleDiagnosticHandler {
    fn report(&self, diagnostic: Diagnostic) {
        let level_str = match diagnostic.level {
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warning => "warning",
            DiagnosticLevel::Info => "info",
        };

        if self.pretty {
            eprintln!(
                "\x1b[1m{}\x1b[0m at {}: {}",
                level_str, diagnostic.location, diagnostic.message
            );
        } else {
            eprintln!(
                "{} at {}: {}",
                level_str, diagnostic.location, diagnostic.message
            );
        }

        lock(&self.diagnostics).push(diagnostic);
    }

    fn error_count(&self) -> usize {
        count_errors(&self.diagnostics)
    }

    fn get_diagnostics(&self) -> Vec<Diagnostic> {
        lock(&self.diagnostics).clone()
    }
}

/// Collects diagnostics without printing
#[derive(Default)]
pub struct CollectingDiagnosticHandler {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl CollectingDiagnosticHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiagnosticHandler for CollectingDiagnosticHandler {
    fn report(&self, diagnostic: Diagnostic) {
        lock(&self.diagnostics).push(diagnostic);
    }

    fn error_count(&self) -> usize {
        count_errors(&self.diagnostics)
    }

    fn get_diagnostics(&self) -> Vec<Diagnostic> {
        lock(&self.diagnostics).clone()
    }
}
