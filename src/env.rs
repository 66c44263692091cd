use reqwest::Url;
use serde::{
    de::{DeserializeOwned, Error},
    Deserialize, Deserializer,
};
use tracing::error;

/// Deserialize a list of URLs from a comma separated string. Empty segments
/// (and the empty string) are skipped so an unset-but-present variable parses
/// to an empty list.
pub fn deserialize_urls<'de, D>(deserializer: D) -> Result<Vec<Url>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Url::parse(s).map_err(Error::custom))
        .collect()
}

pub fn deserialize_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(Error::custom)
}

pub fn get_app_config<T: DeserializeOwned>() -> T {
    match envy::from_env::<T>() {
        Ok(config) => config,
        Err(err) => {
            error!("failed to parse config: {}", err);
            std::process::exit(1);
        }
    }
}
