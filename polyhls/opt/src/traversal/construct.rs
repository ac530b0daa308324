use super::Visitor;
use itertools::Itertools;
use linked_hash_map::LinkedHashMap;
use polyhls_ir::Context;
use polyhls_utils::{HlsResult, OutputFile};

/// The value of a pass option.
#[derive(Clone, Debug)]
pub enum ParseVal {
    Bool(bool),
    Num(i64),
    /// An output stream (stdout, stderr, file name)
    OutStream(OutputFile),
}

impl ParseVal {
    pub fn bool(&self) -> bool {
        matches!(self, ParseVal::Bool(true))
    }

    pub fn num(&self) -> Option<i64> {
        match self {
            ParseVal::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn pos_num(&self) -> Option<u64> {
        self.num().and_then(|n| u64::try_from(n).ok())
    }

    /// Returns an output stream if it is not the null stream
    pub fn not_null_outstream(&self) -> Option<OutputFile> {
        match self {
            ParseVal::OutStream(OutputFile::Null) => None,
            ParseVal::OutStream(o) => Some(o.clone()),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParseVal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseVal::Bool(b) => write!(f, "{b}"),
            ParseVal::Num(n) => write!(f, "{n}"),
            ParseVal::OutStream(o) => write!(f, "{o}"),
        }
    }
}

/// Option that can be passed to a pass with `-x pass:opt=val`.
pub struct PassOpt {
    name: &'static str,
    description: &'static str,
    default: ParseVal,
    parse: fn(&str) -> Option<ParseVal>,
}

impl PassOpt {
    pub const fn new(
        name: &'static str,
        description: &'static str,
        default: ParseVal,
        parse: fn(&str) -> Option<ParseVal>,
    ) -> Self {
        Self {
            name,
            description,
            default,
            parse,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn description(&self) -> &'static str {
        self.description
    }

    pub const fn default(&self) -> &ParseVal {
        &self.default
    }

    fn parse(&self, s: &str) -> Option<ParseVal> {
        (self.parse)(s)
    }

    pub fn parse_bool(s: &str) -> Option<ParseVal> {
        match s {
            "true" => Some(ParseVal::Bool(true)),
            "false" => Some(ParseVal::Bool(false)),
            _ => None,
        }
    }

    pub fn parse_num(s: &str) -> Option<ParseVal> {
        s.parse::<i64>().ok().map(ParseVal::Num)
    }

    pub fn parse_outstream(s: &str) -> Option<ParseVal> {
        s.parse::<OutputFile>().ok().map(ParseVal::OutStream)
    }
}

/// Trait that describes named things. Calling [`do_pass`](Visitor::do_pass)
/// and [`do_pass_default`](Visitor::do_pass_default) requires this to be
/// implemented.
///
/// This has to be a separate trait from [`Visitor`] because these methods
/// don't receive `self`.
pub trait Named {
    /// The name of a pass. Is used for identifying passes.
    fn name() -> &'static str;
    /// A short description of the pass.
    fn description() -> &'static str;
    /// Set of options that can be passed to the pass.
    fn opts() -> Vec<PassOpt> {
        vec![]
    }
}

/// Construct a visitor from a [Context]. Passes that don't need the context
/// get this trait from [Default].
pub trait ConstructVisitor {
    /// Collect the values of this pass's options from the extra options of
    /// the context, falling back to the defaults.
    fn get_opts(ctx: &Context) -> LinkedHashMap<&'static str, ParseVal>
    where
        Self: Named,
    {
        let opts = Self::opts();
        let n = Self::name();
        let mut values: LinkedHashMap<&'static str, ParseVal> = ctx
            .extra_opts
            .iter()
            .filter_map(|opt| {
                // The format is either -x pass:opt or -x pass:opt=val
                let (pass, rest) = opt.split_once(':')?;
                if pass != n {
                    return None;
                }
                let (key, val) = match rest.split_once('=') {
                    Some((k, v)) => (k, Some(v)),
                    None => (rest, None),
                };
                let Some(opt) = opts.iter().find(|o| o.name == key) else {
                    log::warn!("Ignoring unknown option for pass `{n}`: {key}");
                    return None;
                };
                let val = match val {
                    Some(v) => match opt.parse(v) {
                        Some(v) => v,
                        None => {
                            log::warn!(
                                "Ignoring invalid value for option `{n}:{}`: {v}",
                                opt.name()
                            );
                            return None;
                        }
                    },
                    None => ParseVal::Bool(true),
                };
                Some((opt.name(), val))
            })
            .collect();

        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Extra options for {n}: {}",
                values.iter().map(|(o, v)| format!("{o}->{v}")).join(", ")
            );
        }

        for opt in opts {
            if !values.contains_key(opt.name()) {
                values.insert(opt.name(), opt.default.clone());
            }
        }
        values
    }

    /// Construct the visitor using information from the Context
    fn from(ctx: &Context) -> HlsResult<Self>
    where
        Self: Sized;

    /// Clear the data stored in the visitor. Called before traversing the
    /// next scope.
    fn clear_data(&mut self);
}

/// Derive ConstructVisitor when [Default] is provided for a visitor.
impl<T: Default + Sized + Visitor> ConstructVisitor for T {
    fn from(_ctx: &Context) -> HlsResult<Self> {
        Ok(T::default())
    }

    fn clear_data(&mut self) {
        *self = T::default();
    }
}
