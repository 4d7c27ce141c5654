//! Generic parameters functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::de::DeserializeOwned;
use std::fs::read_to_string;
use std::path::Path;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// An error that occurs during loading of a parameter file.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Could not read the parameter file: {0}")]
    FileLoadError(std::io::Error),

    #[error("Could not deserialise the parameter file: {0}")]
    DeserialiseError(toml::de::Error),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Load a parameter file
pub fn load<P>(param_file_path: impl AsRef<Path>) -> Result<P, LoadError>
where
    P: DeserializeOwned,
{
    let params_str = read_to_string(param_file_path).map_err(LoadError::FileLoadError)?;

    toml::from_str(params_str.as_str()).map_err(LoadError::DeserialiseError)
}

/// Load a parameter file, falling back to the type's defaults if the file doesn't exist.
///
/// A file that exists but fails to parse is still an error.
pub fn load_or_default<P>(param_file_path: impl AsRef<Path>) -> Result<P, LoadError>
where
    P: DeserializeOwned + Default,
{
    if param_file_path.as_ref().exists() {
        load(param_file_path)
    } else {
        Ok(P::default())
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[derive(serde::Deserialize, Default, Debug, PartialEq)]
    struct TestParams {
        rate_hz: f64,
    }

    #[test]
    fn test_load_missing_falls_back_to_default() {
        let params: TestParams = load_or_default("definitely_not_a_file.toml").unwrap();
        assert_eq!(params, TestParams::default());
    }
}
