use super::models::Config;
use thiserror::Error;

const MAX_REDIRECT_LIMIT: usize = 20;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("loader.max_concurrent_loads must be at least 1")]
    ZeroConcurrency,

    #[error("http.user_agent must not be empty")]
    EmptyUserAgent,

    #[error("http.max_redirects ({actual}) exceeds limit of {limit}")]
    TooManyRedirects { actual: usize, limit: usize },

    #[error("http.connect_timeout must be positive")]
    ZeroConnectTimeout,

    #[error("bundle.root '{path}' is not a directory")]
    MissingBundleRoot { path: String },

    #[error("decode.max_dimension must be positive")]
    ZeroMaxDimension,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_loader(config)?;
    validate_http(config)?;
    validate_bundle(config)?;
    validate_decode(config)?;
    Ok(())
}

fn validate_loader(config: &Config) -> Result<(), ValidationError> {
    if config.loader.max_concurrent_loads == 0 {
        return Err(ValidationError::ZeroConcurrency);
    }
    Ok(())
}

fn validate_http(config: &Config) -> Result<(), ValidationError> {
    let http = &config.http;

    if http.user_agent.trim().is_empty() {
        return Err(ValidationError::EmptyUserAgent);
    }

    if http.max_redirects > MAX_REDIRECT_LIMIT {
        return Err(ValidationError::TooManyRedirects {
            actual: http.max_redirects,
            limit: MAX_REDIRECT_LIMIT,
        });
    }

    if http.connect_timeout.as_duration().is_zero() {
        return Err(ValidationError::ZeroConnectTimeout);
    }

    Ok(())
}

fn validate_bundle(config: &Config) -> Result<(), ValidationError> {
    if let Some(root) = &config.bundle.root {
        if !root.is_dir() {
            return Err(ValidationError::MissingBundleRoot {
                path: root.display().to_string(),
            });
        }
    }
    Ok(())
}

fn validate_decode(config: &Config) -> Result<(), ValidationError> {
    if config.decode.max_dimension == Some(0) {
        return Err(ValidationError::ZeroMaxDimension);
    }
    Ok(())
}
