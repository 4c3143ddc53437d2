//! Error types for ahrules.

use thiserror::Error;

/// Error type for ahrules operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Rule text that could not be parsed (carries the full input)
    #[error("could not parse rule {0:?}")]
    Parse(String),

    /// Invalid IP address, CIDR block or range
    #[error(transparent)]
    IpRange(#[from] IpRangeError),

    /// Invalid domain name pattern
    #[error(transparent)]
    DomainName(#[from] DomainNameError),

    /// Invalid or forbidden regular expression
    #[error(transparent)]
    Regex(#[from] RegexAtomError),

    /// Grammar construction error
    #[error(transparent)]
    Parser(#[from] ParserError),

    /// And/Or constructed without any operands
    #[error("{0} requires at least one operand")]
    EmptyOperands(&'static str),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for ahrules operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for IP range construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IpRangeError {
    /// Not an IPv4 or IPv6 address
    #[error("invalid IP address {0:?}")]
    InvalidAddress(String),

    /// Bitmask that is not a number
    #[error("invalid bitmask {0:?}")]
    InvalidBitmask(String),

    /// Bitmask outside of the address family's range
    #[error("bitmask {bits} outside of range 0-{max}")]
    BitsOutOfRange { bits: u32, max: u8 },

    /// Range endpoints from different address families
    #[error("mismatching IP addresses ({0:?} and {1:?})")]
    MismatchedVersions(String, String),

    /// A CIDR or range string combined with an extra bits/end argument
    #[error("unexpected second argument for {0:?}")]
    UnexpectedArgument(String),
}

/// Error type for domain name patterns.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainNameError {
    /// Empty pattern
    #[error("empty domain name pattern")]
    Empty,

    /// Pattern with a single label and no wildcard
    #[error("domain name pattern needs at least two labels: {0:?}")]
    TooFewLabels(String),

    /// Label that IDNA can not encode or that contains invalid characters
    #[error("invalid domain name label {0:?}")]
    InvalidLabel(String),

    /// Label length outside 1-63
    #[error("domain name label length must be 1-63: {0:?}")]
    LabelLength(String),

    /// Label starting or ending with a hyphen
    #[error("domain name label can not start or end with a hyphen: {0:?}")]
    Hyphen(String),

    /// Final label consisting only of digits
    #[error("top-level label can not be all-numeric: {0:?}")]
    NumericTld(String),

    /// Total length over 253 characters
    #[error("domain name pattern longer than 253 characters: {0:?}")]
    TooLong(String),
}

/// Error type for regular expression atoms.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegexAtomError {
    /// Pattern that does not compile
    #[error("invalid regular expression {pattern:?}: {reason}")]
    Invalid { pattern: String, reason: String },

    /// Pattern or flag set requesting a forbidden flag
    #[error("forbidden regular expression flag {0}")]
    ForbiddenFlag(&'static str),
}

/// Error type for parser combinator grammars.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParserError {
    /// Forward reference used before it was set
    #[error("forward reference not set")]
    Unset,

    /// Forward reference set twice
    #[error("forward reference already set")]
    AlreadySet,
}
