//! Crate-local error type (§7): wraps the catalog and service-engine error surfaces a periodic
//! job or wire handler can hit, converting both into `fractal_types::FractalError` at the one
//! remaining boundary (this crate has none of its own above that).

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("catalog error: {source}"))]
    Catalog { source: fractal_catalog::Error },

    #[snafu(display("service engine error: {source}"))]
    Service { source: fractal_service::Error },

    #[snafu(display("invalid request: {message}"))]
    InvalidRequest { message: String },
}

impl From<fractal_catalog::Error> for Error {
    fn from(source: fractal_catalog::Error) -> Self {
        Self::Catalog { source }
    }
}

impl From<fractal_service::Error> for Error {
    fn from(source: fractal_service::Error) -> Self {
        Self::Service { source }
    }
}

impl From<Error> for fractal_types::FractalError {
    fn from(err: Error) -> Self {
        match err {
            Error::Catalog { source } => source.into(),
            Error::Service { source } => source.into(),
            Error::InvalidRequest { message } => Self::UserReportable { message },
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
