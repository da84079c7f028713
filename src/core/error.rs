//! Purpose: Single error type shared by the proxy core, server and CLI.
//! Exports: `Error`, `ErrorKind`, `DecodeStage`, `to_exit_code`.
//! Role: Carries a stable kind plus optional context; callers map kinds to HTTP or exit codes.
//! Invariants: Messages of `Transport`/`Decode` errors are for logs only, never for HTTP clients.
//! Invariants: Exit code mapping is stable across releases.
use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    Validation,
    Business,
    Transport,
    Decode,
    Io,
}

/// Which of the two optional JSON decodes failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DecodeStage {
    /// The operation-specific result field on the raw upstream value.
    Envelope,
    /// The `return` field of the first-stage object.
    Return,
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeStage::Envelope => f.write_str("envelope"),
            DecodeStage::Return => f.write_str("return"),
        }
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    stage: Option<DecodeStage>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            stage: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn stage(&self) -> Option<DecodeStage> {
        self.stage
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_stage(mut self, stage: DecodeStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(stage) = self.stage {
            write!(f, " (stage: {stage})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::Validation => 3,
        ErrorKind::Business => 4,
        ErrorKind::Transport => 5,
        ErrorKind::Decode => 6,
        ErrorKind::Io => 7,
    }
}
