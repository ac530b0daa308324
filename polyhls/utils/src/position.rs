//! Source positions of IR statements.
use crate::GSym;

/// A file/line pair attached to statements and diagnostics.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct Loc {
    file: Option<GSym>,
    line: u32,
}

impl Loc {
    pub fn new(file: &str, line: u32) -> Self {
        Loc {
            file: Some(GSym::from(file)),
            line,
        }
    }

    /// The unknown position
    pub fn unknown() -> Self {
        Loc::default()
    }

    pub fn is_known(&self) -> bool {
        self.file.is_some()
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn file(&self) -> Option<&'static str> {
        self.file.map(|f| f.as_str())
    }
}

impl std::fmt::Display for Loc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.file {
            Some(file) => write!(f, "{}:{}", file.as_str(), self.line),
            None => write!(f, "<unknown>"),
        }
    }
}

/// An IR node that may contain position information.
pub trait WithPos {
    /// Position of the node in the source.
    fn loc(&self) -> Loc;
}
