use itertools::Itertools;
use std::str::FromStr;

/// Enumeration of valid backends
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendOpt {
    /// State transition graphs with the module interfaces, as text.
    #[default]
    Stg,
    /// The same contents as `Stg`, as JSON.
    #[cfg(feature = "serialize")]
    Json,
    /// The textual IR after the last pass.
    Ir,
    None,
}

/// Return a vector that maps strings to Backends.
#[inline(always)]
fn backends() -> Vec<(&'static str, BackendOpt)> {
    vec![
        ("stg", BackendOpt::Stg),
        #[cfg(feature = "serialize")]
        ("json", BackendOpt::Json),
        ("ir", BackendOpt::Ir),
        ("none", BackendOpt::None),
    ]
}

impl BackendOpt {
    /// Extension of the files written by this backend.
    pub fn extension(&self) -> &'static str {
        match self {
            BackendOpt::Stg => "stg",
            #[cfg(feature = "serialize")]
            BackendOpt::Json => "json",
            BackendOpt::Ir => "ir",
            BackendOpt::None => "",
        }
    }
}

/// Command line parsing for the Backend enum
impl FromStr for BackendOpt {
    type Err = String;
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let backends = backends();
        if let Some((_, opt)) = backends.iter().find(|(name, _)| &input == name) {
            return Ok(*opt);
        }
        let backend_str = backends.iter().map(|(name, _)| *name).join(", ");
        Err(format!(
            "`{input}` is not a valid backend.\nValid backends: {backend_str}"
        ))
    }
}

impl std::fmt::Display for BackendOpt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = backends()
            .into_iter()
            .find(|(_, b)| b == self)
            .map_or("none", |(n, _)| n);
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_names() {
        assert_eq!("stg".parse::<BackendOpt>(), Ok(BackendOpt::Stg));
        assert_eq!("ir".parse::<BackendOpt>(), Ok(BackendOpt::Ir));
        let err = "verilog".parse::<BackendOpt>().unwrap_err();
        assert!(err.contains("Valid backends: stg"));
        assert_eq!(BackendOpt::None.to_string(), "none");
    }
}
