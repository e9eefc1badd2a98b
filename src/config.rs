//! Settings for compiling and running queries.

use std::str::FromStr;

use crate::hashtable::DEFAULT_BUCKET_COUNT;
use crate::memory_pool::DEFAULT_BLOCK_SIZE;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid value {value:?} for {var}.")]
    InvalidValue { var: &'static str, value: String },
}

/// What the root of a query does with its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultMode {
    /// print tab separated rows followed by a summary line.
    Print,
    /// hand each row to the caller as a `Row`.
    Collect,
}

impl FromStr for ResultMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "print" => Ok(ResultMode::Print),
            "collect" => Ok(ResultMode::Collect),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// size of the first block of every memory pool a query creates.
    pub pool_block_size: usize,
    /// bucket count a group-by hashtable starts with.
    pub hashtable_initial_buckets: usize,
    pub result_mode: ResultMode,
    /// also write printed output to stdout.
    pub echo_output: bool,
    /// branch whose rows queries see and modify; 0 is master.
    pub branch: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_block_size: DEFAULT_BLOCK_SIZE,
            hashtable_initial_buckets: DEFAULT_BUCKET_COUNT,
            result_mode: ResultMode::Print,
            echo_output: false,
            branch: 0,
        }
    }
}

fn parse_var<T: FromStr>(var: &'static str) -> Result<Option<T>, Error> {
    match std::env::var(var) {
        Err(_) => Ok(None),
        Ok(value) => match value.trim().parse::<T>() {
            Ok(v) => Ok(Some(v)),
            Err(_) => Err(Error::InvalidValue { var, value }),
        },
    }
}

impl Config {
    pub fn pool_block_size(mut self, bytes: usize) -> Self {
        self.pool_block_size = bytes;
        self
    }

    pub fn hashtable_initial_buckets(mut self, buckets: usize) -> Self {
        self.hashtable_initial_buckets = buckets;
        self
    }

    pub fn result_mode(mut self, mode: ResultMode) -> Self {
        self.result_mode = mode;
        self
    }

    pub fn echo_output(mut self, echo: bool) -> Self {
        self.echo_output = echo;
        self
    }

    pub fn branch(mut self, branch: usize) -> Self {
        self.branch = branch;
        self
    }

    /// the defaults, overridden by any of `JITQL_POOL_BLOCK_SIZE`, `JITQL_HASHTABLE_BUCKETS`,
    /// `JITQL_RESULT_MODE` (`print` or `collect`), `JITQL_ECHO` and `JITQL_BRANCH` that are set.
    pub fn from_env() -> Result<Config, Error> {
        let mut config = Config::default();
        if let Some(v) = parse_var("JITQL_POOL_BLOCK_SIZE")? {
            config.pool_block_size = v;
        }
        if let Some(v) = parse_var("JITQL_HASHTABLE_BUCKETS")? {
            config.hashtable_initial_buckets = v;
        }
        if let Some(v) = parse_var("JITQL_RESULT_MODE")? {
            config.result_mode = v;
        }
        if let Some(v) = parse_var::<String>("JITQL_ECHO")? {
            config.echo_output = v == "1" || v.to_lowercase() == "true";
        }
        if let Some(v) = parse_var("JITQL_BRANCH")? {
            config.branch = v;
        }
        Ok(config)
    }
}

#[test]
fn test_builder_overrides_defaults() {
    let c = Config::default().pool_block_size(128).result_mode(ResultMode::Collect).branch(2);
    assert_eq!(c.pool_block_size, 128);
    assert_eq!(c.result_mode, ResultMode::Collect);
    assert_eq!(c.branch, 2);
    assert_eq!(c.hashtable_initial_buckets, DEFAULT_BUCKET_COUNT);
    assert!(!c.echo_output);
}

#[test]
fn test_from_env() {
    std::env::set_var("JITQL_HASHTABLE_BUCKETS", "4");
    std::env::set_var("JITQL_RESULT_MODE", "collect");
    let c = Config::from_env().unwrap();
    assert_eq!(c.hashtable_initial_buckets, 4);
    assert_eq!(c.result_mode, ResultMode::Collect);
    std::env::set_var("JITQL_HASHTABLE_BUCKETS", "many");
    assert!(matches!(
        Config::from_env(),
        Err(Error::InvalidValue { var: "JITQL_HASHTABLE_BUCKETS", .. })
    ));
    std::env::remove_var("JITQL_HASHTABLE_BUCKETS");
    std::env::remove_var("JITQL_RESULT_MODE");
}
