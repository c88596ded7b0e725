use facet::Shape;
use thiserror::Error;

/// A handy [`std::result::Result`] alias with the [`enum@Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error that may occur while (de-)serializing wire records.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Reflect(#[from] facet::ReflectError),

    #[error("no message tag found")]
    MissingTag,

    #[error("expected tag `{1}`, but got `{0}`")]
    MismatchedTag(String, &'static str),

    #[error("expected value for field {0:?}")]
    MissingField(&'static Shape),

    #[error("expected a `<key>=<value>` token, got `{0}`")]
    MisformattedParam(String),

    #[error("expected a numeric field, got `{0}`")]
    InvalidNumber(String),

    #[error("invalid upcode `{0}`, not in 64..=127 range")]
    BadUpcode(char),

    #[error("unknown or malformed line")]
    Unrecognized,
}
