//! Errors generated by the compiler.
use crate::{Id, Loc};
use itertools::Itertools;

/// Convenience wrapper to represent success or meaningful compiler error.
pub type HlsResult<T> = std::result::Result<T, Error>;

/// User-facing diagnostics carry a stable numeric code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Type errors
    IncompatibleType,
    MissingRequiredArg,
    TakesToomanyArgs,
    UnknownAttribute,
    IsNotCallable,
    IsNotSubscriptable,
    LenTakesOneArg,
    LenTakesSeqType,
    // Semantic errors
    ReferencedBeforeAssign,
    InvalidModuleObjectAccess,
    // Assertions
    AssertAlwaysFalse,
    // Language restrictions
    UnsupportedLiteralType,
    UnsupportedBinaryOperator,
    SeqCapacityOverflowed,
    GlobalVarMustBeConst,
    ClassVarMustBeConst,
    RangeUnrollPipelinedOutsideFor,
    TimedVariableLoop,
    PipelineIiTooSmall,
    // Library restrictions
    ModuleMustBeInGlobal,
    PortMustBeInCtor,
    PortDirectionConflicted,
    ReadingIsConflicted,
    WritingIsConflicted,
    WorkerArgType,
    // Warnings
    PortIsNotUsed,
    UnannotatedChannel,
    PipelineRwSameRam,
}

impl ErrorCode {
    /// The stable numeric code of this diagnostic.
    pub fn code(&self) -> u32 {
        use ErrorCode::*;
        match self {
            IncompatibleType => 100,
            MissingRequiredArg => 101,
            TakesToomanyArgs => 102,
            UnknownAttribute => 103,
            IsNotCallable => 104,
            IsNotSubscriptable => 105,
            LenTakesOneArg => 106,
            LenTakesSeqType => 107,
            ReferencedBeforeAssign => 200,
            InvalidModuleObjectAccess => 201,
            AssertAlwaysFalse => 300,
            UnsupportedLiteralType => 800,
            UnsupportedBinaryOperator => 801,
            SeqCapacityOverflowed => 802,
            GlobalVarMustBeConst => 803,
            ClassVarMustBeConst => 804,
            RangeUnrollPipelinedOutsideFor => 810,
            TimedVariableLoop => 820,
            PipelineIiTooSmall => 830,
            ModuleMustBeInGlobal => 900,
            PortMustBeInCtor => 901,
            PortDirectionConflicted => 910,
            ReadingIsConflicted => 920,
            WritingIsConflicted => 921,
            WorkerArgType => 930,
            PortIsNotUsed => 1000,
            UnannotatedChannel => 1001,
            PipelineRwSameRam => 1002,
        }
    }

    /// Message template. `{0}`, `{1}`, ... are replaced by the arguments
    /// given to [Error::fail].
    pub fn template(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            IncompatibleType => "'{0}' is incompatible type as a parameter of '{1}'",
            MissingRequiredArg => "{0}() missing required argument",
            TakesToomanyArgs => "{0}() takes {1} positional arguments but {2} were given",
            UnknownAttribute => "unknown attribute name '{0}'",
            IsNotCallable => "'{0}' is not callable",
            IsNotSubscriptable => "'{0}' is not subscriptable",
            LenTakesOneArg => "len() takes exactly one argument",
            LenTakesSeqType => "len() takes sequence type argument",
            ReferencedBeforeAssign => "local variable '{0}' referenced before assignment",
            InvalidModuleObjectAccess => "invalid access to a module object '{0}'",
            AssertAlwaysFalse => "the expression of assert always false",
            UnsupportedLiteralType => "unsupported literal type {0}",
            UnsupportedBinaryOperator => "unsupported binary operator {0}",
            SeqCapacityOverflowed => "sequence '{0}' capacity is overflowing",
            GlobalVarMustBeConst => "a global variable '{0}' must be a constant value",
            ClassVarMustBeConst => "a class variable '{0}' must be a constant value",
            RangeUnrollPipelinedOutsideFor => "'{0}' is only available in a for loop",
            TimedVariableLoop => "a loop with variable iteration count is not allowed in a timed scope",
            PipelineIiTooSmall => "cannot schedule the pipeline with ii={0}, at least {1} is required",
            ModuleMustBeInGlobal => "the module class '{0}' must be in the global scope",
            PortMustBeInCtor => "the port '{0}' must be created in the constructor",
            PortDirectionConflicted => "the direction of the port '{0}' is conflicted",
            ReadingIsConflicted => "reading from '{0}' is conflicted",
            WritingIsConflicted => "writing to '{0}' is conflicted",
            WorkerArgType => "the type of the worker argument '{0}' must be a port or a scalar",
            PortIsNotUsed => "port '{0}' is not used at all",
            UnannotatedChannel => "the channel '{0}' has no type annotation",
            PipelineRwSameRam => "reading and writing to '{0}' in the same pipeline may conflict",
        }
    }

    pub fn is_warning(&self) -> bool {
        self.code() >= 1000
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors generated by the compiler
#[derive(Clone)]
pub struct Error {
    kind: Box<ErrorKind>,
    loc: Loc,
    post_msg: Option<String>,
}

/// Standard error type for the compiler.
#[derive(Clone, thiserror::Error)]
pub enum ErrorKind {
    /// A diagnostic on the user program.
    #[error("[{code}] {msg}")]
    Compile { code: ErrorCode, msg: String },
    /// The textual IR could not be parsed.
    #[error("{0}")]
    Parse(String),
    /// The input file is invalid (does not exist).
    #[error("{0}")]
    InvalidFile(String),
    /// Failed to write the output.
    #[error("Failed to write the output: {0}")]
    WriteError(String),
    /// The IR violates a structural invariant.
    #[error("Malformed IR: {0}")]
    Malformed(String),
    /// The name has already been bound.
    #[error("Name `{0}` already bound by {1}")]
    AlreadyBound(Id, String),
    /// A name was used without a definition.
    #[error("Undefined {0} `{1}`")]
    Undefined(String, Id),
    /// A pass could not run because its assumptions were not met.
    #[error("Pass `{0}` assumption violated: {1}")]
    PassAssumption(String, String),
    /// Miscellaneous error message
    #[error("{0}")]
    Misc(String),
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.loc.is_known() {
            write!(f, "{}: ", self.loc)?;
        }
        write!(f, "{}", self.kind)?;
        if let Some(post) = &self.post_msg {
            write!(f, "\n{post}")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for Error {}

impl Error {
    fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
            loc: Loc::unknown(),
            post_msg: None,
        }
    }

    /// Format the message template of `code` with `args` and attach `loc`.
    pub fn fail<S: ToString>(loc: Loc, code: ErrorCode, args: &[S]) -> Self {
        let mut msg = code.template().to_string();
        for (i, arg) in args.iter().enumerate() {
            msg = msg.replace(&format!("{{{i}}}"), &arg.to_string());
        }
        Self::new(ErrorKind::Compile { code, msg }).with_loc(loc)
    }

    pub fn with_loc(mut self, loc: Loc) -> Self {
        self.loc = loc;
        self
    }

    pub fn with_post_msg(mut self, msg: Option<String>) -> Self {
        self.post_msg = msg;
        self
    }

    pub fn parse_error<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::Parse(msg.to_string()))
    }
    pub fn invalid_file<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::InvalidFile(msg.to_string()))
    }
    pub fn write_error<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::WriteError(msg.to_string()))
    }
    pub fn malformed<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::Malformed(msg.to_string()))
    }
    pub fn already_bound<S: ToString>(name: Id, bound_by: S) -> Self {
        Self::new(ErrorKind::AlreadyBound(name, bound_by.to_string()))
    }
    pub fn undefined<S: ToString>(name: Id, typ: S) -> Self {
        Self::new(ErrorKind::Undefined(typ.to_string(), name))
    }
    pub fn pass_assumption<S: ToString, M: ToString>(pass: S, msg: M) -> Self {
        Self::new(ErrorKind::PassAssumption(pass.to_string(), msg.to_string()))
    }
    pub fn misc<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::Misc(msg.to_string()))
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn loc(&self) -> &Loc {
        &self.loc
    }

    /// The diagnostic code, if this is a diagnostic on the user program.
    pub fn code(&self) -> Option<ErrorCode> {
        match &*self.kind {
            ErrorKind::Compile { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        self.kind.to_string()
    }
}

impl std::fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

// Conversions from other error types to our error type so that
// we can use `?` in all the places.
impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Self {
        Error::invalid_file(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::write_error(format!("IO Error: {e}"))
    }
}

impl From<std::fmt::Error> for Error {
    fn from(e: std::fmt::Error) -> Self {
        Error::write_error(format!("Formatting Error: {e}"))
    }
}

/// A collection of errors generated by a diagnostic pass.
#[derive(Clone)]
pub struct MultiError {
    errors: Vec<Error>,
}

impl MultiError {
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// The first error, which is the one reported when compilation stops.
    pub fn first(&self) -> Option<&Error> {
        self.errors.first()
    }
}

impl From<Vec<Error>> for MultiError {
    fn from(errors: Vec<Error>) -> Self {
        MultiError { errors }
    }
}

impl From<Error> for MultiError {
    fn from(err: Error) -> Self {
        MultiError { errors: vec![err] }
    }
}

impl std::fmt::Debug for MultiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.errors.iter().map(|e| format!("{e:?}")).join("\n"))
    }
}

impl std::fmt::Display for MultiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for MultiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_formats_template() {
        let loc = Loc::new("t.py", 4);
        let err = Error::fail(loc, ErrorCode::WritingIsConflicted, &["p"]);
        assert_eq!(err.code(), Some(ErrorCode::WritingIsConflicted));
        assert_eq!(format!("{err}"), "t.py:4: [921] writing to 'p' is conflicted");
    }

    #[test]
    fn warning_range() {
        assert!(ErrorCode::PortIsNotUsed.is_warning());
        assert!(!ErrorCode::PortDirectionConflicted.is_warning());
        assert_eq!(ErrorCode::PipelineRwSameRam.code(), 1002);
    }
}
