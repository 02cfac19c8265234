use thiserror::Error;

/// Failures raised while inlining a call site.
///
/// User-correctable problems (such as recursive inline cycles) are not errors:
/// they are reported through a [`crate::DiagnosticHandler`] and compilation
/// continues. Everything here aborts code generation for the current unit.
#[derive(Debug, Error)]
pub enum InlineError {
    /// An invariant established by an earlier compiler phase does not hold.
    #[error("Internal inliner error: {0}")]
    Internal(String),

    #[error("Class not found in compiled output: {name}")]
    ClassNotFound { name: String },

    #[error("Method not found: {owner}.{name}{desc}")]
    MethodNotFound {
        owner: String,
        name: String,
        desc: String,
    },

    #[error("Couldn't compile inline function body: {0}")]
    Compilation(#[from] anyhow::Error),

    #[error("Malformed class bytes: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't inline method call at {location}: {source}")]
    CallSite {
        location: String,
        #[source]
        source: Box<InlineError>,
    },
}

pub type Result<T> = std::result::Result<T, InlineError>;

impl InlineError {
    pub fn internal(message: impl Into<String>) -> Self {
        InlineError::Internal(message.into())
    }

    /// Wraps the error with the textual location of the call being inlined.
    /// Errors that already carry a location keep the innermost one.
    pub fn at_call_site(self, location: impl Into<String>) -> Self {
        match self {
            err @ InlineError::CallSite { .. } => err,
            err => InlineError::CallSite {
                location: location.into(),
                source: Box::new(err),
            },
        }
    }

    /// True for violated invariants, including wrapped ones.
    pub fn is_internal(&self) -> bool {
        match self {
            InlineError::Internal(_) => true,
            InlineError::CallSite { source, .. } => source.is_internal(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_site_wrapping_keeps_innermost_location() {
        let err = InlineError::internal("boom")
            .at_call_site("Foo.kt:10")
            .at_call_site("Bar.kt:3");
        match &err {
            InlineError::CallSite { location, .. } => assert_eq!(location, "Foo.kt:10"),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.is_internal());
        assert!(err.to_string().contains("Foo.kt:10"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_lookup_error_message() {
        let err = InlineError::MethodNotFound {
            owner: "foo/Bar".into(),
            name: "baz".into(),
            desc: "()V".into(),
        };
        assert_eq!(err.to_string(), "Method not found: foo/Bar.baz()V");
        assert!(!err.is_internal());
    }
}
