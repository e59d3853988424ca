use reqwest::Url;

use crate::ConfigError;

/// Environment variable read by [`RemoteServicesConfig::from_env`].
pub const BASE_URL_VARIABLE: &str = "REMOTE_SERVICES_BASE_URL";

/// Location of the remote compute service.
///
/// Tasks are posted to `<base_url><task type>`, so the base URL always ends with a slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteServicesConfig {
    base_url: Url,
}

impl RemoteServicesConfig {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let mut url = Url::parse(base_url).map_err(|e| ConfigError::InvalidUrl {
            value: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(Self { base_url: url })
    }

    /// Reads the base URL from `REMOTE_SERVICES_BASE_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let value =
            std::env::var(BASE_URL_VARIABLE).map_err(|_| ConfigError::MissingVariable(BASE_URL_VARIABLE))?;
        Self::new(&value)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the URL tasks of `task_type` are posted to.
    pub fn task_url(&self, task_type: &str) -> String {
        format!("{}{}", self.base_url, task_type)
    }
}
