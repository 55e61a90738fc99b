use std::{collections::HashMap, path::PathBuf, time::Duration};

use color_eyre::eyre::{self, WrapErr as _};
use secstr::{SecStr, SecUtf8};
use serde::{de, Deserialize, Deserializer};

const ENV_PREFIX: &str = "DEPLOYD_";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_secstr")]
    pub webhook_secret: SecStr,
    #[serde(deserialize_with = "deserialize_secutf8")]
    pub github_token: SecUtf8,
    #[serde(default = "default_github_api")]
    pub github_api: String,
    pub playbook_path: PathBuf,
    #[serde(default = "default_playbook_branch")]
    pub playbook_branch: String,
    #[serde(default = "default_inventory")]
    pub inventory: String,
    #[serde(default)]
    pub playbook_args: Vec<String>,
    #[serde(default)]
    pub extra_vars: Vec<String>,
    #[serde(default = "default_deploy_timeout")]
    pub deploy_timeout_secs: u64,
    #[serde(deserialize_with = "deserialize_repos")]
    pub repos: RepoMap,
    #[serde(deserialize_with = "deserialize_secutf8")]
    pub slack_webhook: SecUtf8,
    #[serde(default = "default_slack_channel")]
    pub slack_channel: String,
    pub public_url: String,
    pub log_dir: Option<PathBuf>,
    #[serde(default = "default_parallel_jobs")]
    pub parallel_jobs: u8,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Config {
    pub fn from_env() -> eyre::Result<Self> {
        envy::prefixed(ENV_PREFIX)
            .from_env::<Self>()
            .wrap_err("Failed to load configuration from environment")?
            .validated()
    }

    fn validated(mut self) -> eyre::Result<Self> {
        if self.public_url.trim().is_empty() {
            eyre::bail!("{}PUBLIC_URL must not be empty", ENV_PREFIX);
        }
        if self.parallel_jobs == 0 {
            eyre::bail!("{}PARALLEL_JOBS must be at least 1", ENV_PREFIX);
        }
        if let Some(var) = self.extra_vars.iter().find(|var| !var.contains('=')) {
            eyre::bail!("extra variable `{}` must have format key=value", var);
        }
        self.public_url = self.public_url.trim_end_matches('/').to_string();
        self.github_api = self.github_api.trim_end_matches('/').to_string();
        Ok(self)
    }

    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_secs(self.deploy_timeout_secs)
    }
}

/// Static mapping from repository full name (`owner/name`) to the playbook
/// that deploys it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoMap(HashMap<String, String>);

impl RepoMap {
    pub fn target(&self, full_name: &str) -> Option<&str> {
        self.0.get(full_name).map(String::as_str)
    }

    fn parse_entry(entry: &str) -> Result<(String, String), String> {
        let (repo, target) = entry
            .split_once('=')
            .ok_or_else(|| format!("repository mapping `{}` must have format owner/name=target", entry))?;
        let (repo, target) = (repo.trim(), target.trim());
        match repo.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !target.is_empty() => {
                Ok((repo.to_string(), target.to_string()))
            }
            _ => Err(format!(
                "repository mapping `{}` must have format owner/name=target",
                entry
            )),
        }
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for RepoMap {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(repo, target)| (repo.to_string(), target.to_string()))
                .collect(),
        )
    }
}

fn deserialize_secstr<'de, D>(de: D) -> Result<SecStr, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(de).map(|s| SecStr::new(s.into_bytes()))
}

fn deserialize_secutf8<'de, D>(de: D) -> Result<SecUtf8, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(de).map(SecUtf8::from)
}

fn deserialize_repos<'de, D>(de: D) -> Result<RepoMap, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<String>::deserialize(de)?
        .iter()
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| RepoMap::parse_entry(entry))
        .collect::<Result<HashMap<_, _>, _>>()
        .map(RepoMap)
        .map_err(de::Error::custom)
}

fn default_github_api() -> String {
    "https://api.github.com".into()
}

fn default_playbook_branch() -> String {
    "master".into()
}

fn default_inventory() -> String {
    "hosts/production".into()
}

fn default_deploy_timeout() -> u64 {
    60 * 60
}

fn default_slack_channel() -> String {
    "#deploys".into()
}

fn default_parallel_jobs() -> u8 {
    2
}

fn default_bind() -> String {
    "127.0.0.1:8080".into()
}
