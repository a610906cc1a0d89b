use reqwest::StatusCode;
use thiserror::Error;

pub type CouchResult<T> = Result<T, CouchDaoError>;

/// Which step of preparing the snapshot database failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseStep {
    Lookup,
    Create,
}

impl std::fmt::Display for DatabaseStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Lookup => "look up",
            Self::Create => "create",
        })
    }
}

/// Failures of the CouchDB key-value backend.
#[derive(Debug, Error)]
pub enum CouchDaoError {
    #[error("missing CouchDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("CouchDB environment variable `{var}` has unusable value `{value}`")]
    InvalidEnvVar { var: &'static str, value: String },
    #[error("failed to build CouchDB client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// The database endpoint could not be reached while preparing storage.
    #[error("could not {step} CouchDB database `{database}`")]
    Database {
        database: String,
        step: DatabaseStep,
        #[source]
        source: reqwest::Error,
    },
    #[error("CouchDB answered {status} while preparing database `{database}`")]
    DatabaseStatus {
        database: String,
        status: StatusCode,
    },
    /// A key document request never got a response.
    #[error("CouchDB request for `{path}` failed")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("CouchDB answered {status} for `{path}`")]
    Status { path: String, status: StatusCode },
    #[error("CouchDB returned an unreadable body for `{path}`")]
    Decode {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// Another writer replaced the key between our revision read and the write.
    #[error("CouchDB document `{path}` was updated concurrently")]
    Conflict { path: String },
}
