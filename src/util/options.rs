//! Run-time options, read from `REGIONRT_`-prefixed environment variables.
//!
//! Options are scraped from the environment once, when the
//! [`crate::runtime::Runtime`] is created. An unparsable value keeps the
//! default and logs a warning rather than failing: options only control
//! diagnostics, never semantics.

use std::str::FromStr;

use strum_macros::EnumString;

/// What `Runtime::shutdown` renders when it finds leaked objects.
#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum LeakDump {
    /// Only log the leak count.
    None,
    /// Render the surviving object graph as a Mermaid diagram at error level.
    Mermaid,
}

/// The set of options for a runtime instance.
#[derive(Clone, Debug)]
pub struct Options {
    /// Run the structural heap verifier after every collection drain.
    /// Environment variable: `REGIONRT_SANITY`.
    pub sanity: bool,
    /// Leak rendering at shutdown. Environment variable:
    /// `REGIONRT_LEAK_DUMP` (`none` or `mermaid`).
    pub leak_dump: LeakDump,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            sanity: false,
            leak_dump: LeakDump::Mermaid,
        }
    }
}

impl Options {
    /// Built-in defaults overridden by whatever the environment supplies.
    pub fn new() -> Self {
        let mut options = Options::default();
        options.read_env_var_settings();
        options
    }

    /// Scan the environment for `REGIONRT_*` variables and apply them.
    pub fn read_env_var_settings(&mut self) {
        const PREFIX: &str = "REGIONRT_";
        for (key, val) in std::env::vars() {
            if let Some(name) = key.strip_prefix(PREFIX) {
                if !self.set_from_str(name.to_lowercase().as_str(), &val) {
                    warn!("Invalid value for option {}: {}", key, val);
                }
            }
        }
    }

    /// Set one option from its string form. Returns false if the name is
    /// unknown or the value does not parse.
    pub fn set_from_str(&mut self, name: &str, val: &str) -> bool {
        match name {
            "sanity" => match val.parse::<bool>() {
                Ok(v) => {
                    self.sanity = v;
                    true
                }
                Err(_) => false,
            },
            "leak_dump" => match LeakDump::from_str(val) {
                Ok(v) => {
                    self.leak_dump = v;
                    true
                }
                Err(_) => false,
            },
            _ => {
                warn!("Unknown option: {}", name);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = Options::default();
        assert!(!options.sanity);
        assert_eq!(options.leak_dump, LeakDump::Mermaid);
    }

    #[test]
    fn set_from_str() {
        let mut options = Options::default();
        assert!(options.set_from_str("sanity", "true"));
        assert!(options.sanity);
        assert!(options.set_from_str("leak_dump", "none"));
        assert_eq!(options.leak_dump, LeakDump::None);
        assert!(!options.set_from_str("sanity", "yes"));
        assert!(!options.set_from_str("no_such_option", "1"));
    }
}
