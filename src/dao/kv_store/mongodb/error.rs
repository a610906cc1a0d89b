use mongodb::error::Error as MongoError;
use thiserror::Error;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB did not answer a ping after {attempts} attempt(s)")]
    Unreachable {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to read key `{key}`")]
    Read {
        key: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to write key `{key}`")]
    Write {
        key: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to delete key `{key}`")]
    Delete {
        key: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to list keys with prefix `{prefix}`")]
    List {
        prefix: String,
        #[source]
        source: MongoError,
    },
    #[error("stored value under `{key}` is not valid JSON")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
