use std::time::Duration;

use super::error::{CouchDaoError, CouchResult};

const DEFAULT_DATABASE: &str = "series_tracker";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Basic-auth pair attached to every CouchDB request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouchCredentials {
    pub username: String,
    pub password: String,
}

/// Location of the snapshot database and how to talk to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouchConfig {
    pub base_url: String,
    pub database: String,
    pub credentials: Option<CouchCredentials>,
    /// Upper bound for one request, health pings included.
    pub request_timeout: Duration,
}

impl CouchConfig {
    /// Read the configuration from the environment.
    ///
    /// `COUCH_BASE_URL` is required. `COUCH_DB` defaults to `series_tracker`, credentials are
    /// used only when both `COUCH_USERNAME` and `COUCH_PASSWORD` are set, and
    /// `COUCH_TIMEOUT_SECS` defaults to 10.
    pub fn from_env() -> CouchResult<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CouchResult<Self> {
        let read = |var: &str| {
            lookup(var)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let base_url = read("COUCH_BASE_URL").ok_or(CouchDaoError::MissingEnvVar {
            var: "COUCH_BASE_URL",
        })?;
        let credentials = match (read("COUCH_USERNAME"), read("COUCH_PASSWORD")) {
            (Some(username), Some(password)) => Some(CouchCredentials { username, password }),
            _ => None,
        };
        let request_timeout = match read("COUCH_TIMEOUT_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(CouchDaoError::InvalidEnvVar {
                        var: "COUCH_TIMEOUT_SECS",
                        value: raw,
                    });
                }
            },
            None => DEFAULT_REQUEST_TIMEOUT,
        };

        Ok(Self {
            base_url,
            database: read("COUCH_DB").unwrap_or_else(|| DEFAULT_DATABASE.to_owned()),
            credentials,
            request_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> CouchResult<CouchConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CouchConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn base_url_is_required() {
        let err = config_from(&[("COUCH_DB", "series")]).unwrap_err();
        assert!(matches!(
            err,
            CouchDaoError::MissingEnvVar {
                var: "COUCH_BASE_URL"
            }
        ));
    }

    #[test]
    fn unset_values_fall_back_to_defaults() {
        let config = config_from(&[("COUCH_BASE_URL", "http://couch:5984"), ("COUCH_DB", " ")])
            .unwrap();
        assert_eq!(config.database, "series_tracker");
        assert_eq!(config.credentials, None);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn credentials_need_both_halves() {
        let half = config_from(&[
            ("COUCH_BASE_URL", "http://couch:5984"),
            ("COUCH_USERNAME", "admin"),
        ])
        .unwrap();
        assert_eq!(half.credentials, None);

        let full = config_from(&[
            ("COUCH_BASE_URL", "http://couch:5984"),
            ("COUCH_USERNAME", "admin"),
            ("COUCH_PASSWORD", "secret"),
        ])
        .unwrap();
        assert_eq!(
            full.credentials,
            Some(CouchCredentials {
                username: "admin".into(),
                password: "secret".into(),
            })
        );
    }

    #[test]
    fn timeout_must_be_a_positive_number_of_seconds() {
        for raw in ["0", "soon"] {
            let err = config_from(&[
                ("COUCH_BASE_URL", "http://couch:5984"),
                ("COUCH_TIMEOUT_SECS", raw),
            ])
            .unwrap_err();
            assert!(matches!(err, CouchDaoError::InvalidEnvVar { value, .. } if value == raw));
        }
    }
}
