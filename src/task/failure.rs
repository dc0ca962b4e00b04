use std::any::Any;
use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt::{self, Write as _};

use serde::Serialize;

/// Why a worker's function did not produce a value.
///
/// [`message`](Self::message) is the short form sent to UI subscribers;
/// [`trace`](Self::trace) is the full diagnostic record sent to the logger.
#[derive(Debug, Serialize)]
pub struct Failure {
    kind: String,
    message: String,
    causes: Vec<String>,
    #[serde(skip)]
    backtrace: Backtrace,
}

/// Reported as the kind of a failure raised by a panic.
pub const PANIC_KIND: &str = "panic";

impl Failure {
    /// Captures a returned error, its `source()` chain and the current backtrace.
    pub fn from_error<E>(error: &E) -> Self
    where
        E: StdError + ?Sized,
    {
        Self::capture(error_kind::<E>(), error)
    }

    /// Captures any error convertible to a boxed `dyn Error`, including
    /// `Box<dyn Error + Send + Sync>` itself and string messages.
    ///
    /// The kind is taken from `E` before boxing; a value that is already a
    /// boxed trait object reports the kind `Error`.
    pub fn from_raised<E>(error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        let kind = error_kind::<E>();
        let boxed: Box<dyn StdError + Send + Sync + 'static> = error.into();
        Self::capture(kind, boxed.as_ref())
    }

    fn capture<E>(kind: String, error: &E) -> Self
    where
        E: StdError + ?Sized,
    {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            kind,
            message: error.to_string(),
            causes,
            backtrace: Backtrace::force_capture(),
        }
    }

    /// Captures a panic payload as caught by `catch_unwind`.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self {
            kind: PANIC_KIND.to_owned(),
            message: panic_message(payload.as_ref()),
            causes: Vec::new(),
            backtrace: Backtrace::force_capture(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn causes(&self) -> &[String] {
        &self.causes
    }

    pub fn is_panic(&self) -> bool {
        self.kind == PANIC_KIND
    }

    /// Renders the full diagnostic trace: headline, cause chain, backtrace.
    pub fn trace(&self) -> String {
        let mut out = format!("{}: {}\n", self.kind, self.message);
        if !self.causes.is_empty() {
            out.push_str("\nCaused by:\n");
            for (i, cause) in self.causes.iter().enumerate() {
                let _ = writeln!(out, "    {i}: {cause}");
            }
        }
        let _ = write!(out, "\nStack backtrace:\n{}", self.backtrace);
        out
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Text of a panic payload caught by `catch_unwind`.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

fn error_kind<E: ?Sized>() -> String {
    let full = std::any::type_name::<E>();
    if full.contains("Box<dyn ") {
        "Error".to_owned()
    } else {
        short_type_name(full).to_owned()
    }
}

// `my_crate::jobs::DivisionByZero` -> `DivisionByZero`, keeping generic arguments.
fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    match base.rfind("::") {
        Some(pos) => &full[pos + 2..],
        None => full,
    }
}
