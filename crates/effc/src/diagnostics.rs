//! User-facing diagnostics and the internal-compiler-error escape hatch
//! (§7): a plain enum plus a `Display`/render step, rather than reaching
//! for `thiserror`/`anyhow`.

use std::fmt;

/// A position in a source file, 1-indexed to match editor conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

/// A half-open byte/character range used to underline a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub path: String,
    pub start: Position,
    pub end: Position,
}

impl Span {
    #[must_use]
    pub fn normalized_path(&self) -> String {
        self.path.replace('\\', "/")
    }
}

/// Severity of a user-facing diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// A single user-level diagnostic: a plain message with a source range, or
/// a structured overload-resolution failure.
#[derive(Debug, Clone)]
pub enum Diagnostic {
    /// A plain message at a source position.
    Plain { severity: Severity, span: Span, message: String },
    /// Multiple overloads matched a call and none could be preferred.
    AmbiguousOverload { span: Span, candidates: Vec<String> },
    /// No overload matched; each attempt is reported with its own error.
    FailedOverload { span: Span, attempts: Vec<(String, String)> },
}

impl Diagnostic {
    #[must_use]
    fn span(&self) -> &Span {
        match self {
            Self::Plain { span, .. } | Self::AmbiguousOverload { span, .. } | Self::FailedOverload { span, .. } => span,
        }
    }

    #[must_use]
    fn severity(&self) -> Severity {
        match self {
            Self::Plain { severity, .. } => *severity,
            Self::AmbiguousOverload { .. } | Self::FailedOverload { .. } => Severity::Error,
        }
    }

    /// Renders `severity path:line:col: message` followed by a
    /// caret-underlined excerpt of `source`, with the path normalized to
    /// forward slashes so test expectations match on every platform.
    #[must_use]
    pub fn render(&self, source: &str) -> String {
        let span = self.span();
        let mut out = format!(
            "{} {}:{}:{}: {}",
            self.severity(),
            span.normalized_path(),
            span.start.line,
            span.start.column,
            self.summary()
        );
        if let Some(line_text) = source.lines().nth(span.start.line.saturating_sub(1) as usize) {
            let caret_col = span.start.column.saturating_sub(1) as usize;
            let width = span
                .end
                .column
                .saturating_sub(span.start.column)
                .max(1) as usize;
            out.push('\n');
            out.push_str(line_text);
            out.push('\n');
            out.push_str(&" ".repeat(caret_col));
            out.push_str(&"^".repeat(width));
        }
        out
    }

    fn summary(&self) -> String {
        match self {
            Self::Plain { message, .. } => message.clone(),
            Self::AmbiguousOverload { candidates, .. } => {
                format!("ambiguous overload: matches {}", candidates.join(", "))
            }
            Self::FailedOverload { attempts, .. } => {
                let detail = attempts
                    .iter()
                    .map(|(name, reason)| format!("{name}: {reason}"))
                    .collect::<Vec<_>>()
                    .join("; ");
                format!("no matching overload ({detail})")
            }
        }
    }
}

/// Accumulates user-level diagnostics across a phase; internal errors
/// bypass this entirely and panic immediately via [`ice`].
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    messages: Vec<Diagnostic>,
}

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        self.messages.push(diagnostic);
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|d| d.severity() == Severity::Error)
    }

    /// Sorts by position then removes messages that render identically,
    /// per §7's "sorted-deduplicated" propagation rule.
    #[must_use]
    pub fn take_sorted(&mut self, source: &str) -> Vec<Diagnostic> {
        let mut messages = std::mem::take(&mut self.messages);
        messages.sort_by_key(|d| (d.span().start, d.span().path.clone()));
        let mut seen = std::collections::HashSet::new();
        messages.retain(|d| seen.insert(d.render(source)));
        messages
    }

    /// Merges a losing speculative-overload attempt's buffer into a single
    /// [`Diagnostic::FailedOverload`] entry, per the Typer's backtracking
    /// contract (§7).
    #[must_use]
    pub fn merge_failed_overload(attempts: Vec<(String, Diagnostics, &str)>, span: Span) -> Diagnostic {
        let attempts = attempts
            .into_iter()
            .map(|(name, mut diags, source)| {
                let reason = diags
                    .take_sorted(source)
                    .into_iter()
                    .map(|d| d.summary())
                    .collect::<Vec<_>>()
                    .join("; ");
                (name, reason)
            })
            .collect();
        Diagnostic::FailedOverload { span, attempts }
    }
}

/// Formats and panics with the `[error] internal` prefix §7 reserves for
/// internal-compiler-errors: unreachable branches, universe misuse, and
/// missing required annotations. These are bugs, not recoverable user
/// errors, so they abort compilation immediately.
#[track_caller]
pub fn ice(message: &str) -> ! {
    panic!("[error] internal: {message}")
}
