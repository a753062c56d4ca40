//! Error types shared by every stage of a crawl.
//!
//! [`ErrorKind`] says what went wrong and is what callers match on.
//! [`Error`] pairs a kind with a [`Context`], the key/value pairs (package
//! identity, URL, file path, ...) collected on the way down the call stack.
//! Context is purely diagnostic: it changes how an error prints, never how it
//! is handled.

use std::fmt;
use std::path::PathBuf;

/// Boxed error returned by external collaborators such as fetchers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used across the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure the crawler can report
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    #[error("failed to parse URL {url:?}: {reason}")]
    MalformedUrl { url: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("unsupported ecosystem: {0}")]
    UnsupportedEcosystem(String),

    #[error("invalid package identity {identity:?}: {reason}")]
    InvalidIdentity { identity: String, reason: String },

    #[error("no statement found in {}", path.display())]
    NoStatementsFound { path: PathBuf },

    #[error("PURL does not match in {}", path.display())]
    PurlMismatch { path: PathBuf },

    #[error("invalid VEX document {}: {source}", path.display())]
    InvalidDocument {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no VEX file found")]
    NoVexFound,

    #[error("fetch failed: {0}")]
    FetchFailed(#[source] BoxError),

    #[error("failed to persist {}: {reason}", path.display())]
    PersistFailure { path: PathBuf, reason: String },

    #[error("corrupt manifest {}: {source}", path.display())]
    CorruptManifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Attach diagnostic context, producing an [`Error`].
    pub fn at(self, context: &Context) -> Error {
        Error {
            kind: self,
            context: context.clone(),
        }
    }

    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ErrorKind::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Immutable, ordered set of diagnostic key/value pairs.
///
/// Extending a context returns a new value, so one context can be handed to
/// several concurrent callees without any of them seeing the others' keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    fields: Vec<(&'static str, String)>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of this context with `key=value` appended.
    #[must_use]
    pub fn with(&self, key: &'static str, value: impl fmt::Display) -> Self {
        let mut fields = self.fields.clone();
        fields.push((key, value.to_string()));
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

/// An [`ErrorKind`] together with the context it was raised in
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    context: Context,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{} ({})", self.kind, self.context)
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.kind)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: Context::default(),
        }
    }
}

/// Attaches a [`Context`] to the error side of a `Result<T, ErrorKind>`.
pub trait ResultExt<T> {
    fn at(self, context: &Context) -> Result<T>;
}

impl<T> ResultExt<T> for std::result::Result<T, ErrorKind> {
    fn at(self, context: &Context) -> Result<T> {
        self.map_err(|kind| kind.at(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_is_copy_on_extend() {
        let base = Context::new().with("purl", "pkg:npm/debug");
        let extended = base.with("url", "https://github.com/debug-js/debug");

        assert_eq!(base.to_string(), "purl=pkg:npm/debug");
        assert_eq!(
            extended.to_string(),
            "purl=pkg:npm/debug url=https://github.com/debug-js/debug"
        );
        assert_eq!(extended.get("purl"), Some("pkg:npm/debug"));
        assert_eq!(base.get("url"), None);
    }

    #[test]
    fn test_error_display_includes_context() {
        let ctx = Context::new().with("purl", "pkg:cargo/typemap");
        let err = ErrorKind::NoVexFound.at(&ctx);

        assert_eq!(err.to_string(), "no VEX file found (purl=pkg:cargo/typemap)");
        assert!(matches!(err.kind(), ErrorKind::NoVexFound));
    }

    #[test]
    fn test_error_without_context() {
        let err: Error = ErrorKind::NotFound("source URL not found".to_string()).into();
        assert_eq!(err.to_string(), "not found: source URL not found");
        assert!(err.context().is_empty());
    }

    #[test]
    fn test_result_ext_attaches_context() {
        let ctx = Context::new().with("path", "/tmp/x");
        let result: std::result::Result<(), ErrorKind> = Err(ErrorKind::Cancelled);
        let err = result.at(&ctx).unwrap_err();
        assert_eq!(err.context().get("path"), Some("/tmp/x"));
    }
}
