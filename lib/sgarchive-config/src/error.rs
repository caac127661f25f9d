//! Configuration errors are process-fatal: `main` logs and exits non-zero
//! on one of these (spec.md §6 "Exit codes").

use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("missing required environment variable {name}"))]
    Missing { name: &'static str },

    #[snafu(display("{name}={value} is not a valid {expected}"))]
    Invalid { name: &'static str, value: String, expected: &'static str },
}
