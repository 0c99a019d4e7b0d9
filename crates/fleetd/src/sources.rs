//! Identity, proxy, and credential sources.
//!
//! The supervisor reads identities and proxies once per fleet start; the
//! bearer token is fetched on every authenticated call.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use nodefleet_common::{FleetError, NodeIdentity};

/// Ordered list of fleet members
#[async_trait]
pub trait IdentitySource: Send + Sync {
    async fn list(&self) -> Result<Vec<NodeIdentity>, FleetError>;
}

/// Ordered list of proxy URLs, matched to identities by position
#[async_trait]
pub trait ProxySource: Send + Sync {
    async fn list(&self) -> Result<Vec<String>, FleetError>;
}

/// Bearer token attached to every authenticated call
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn token(&self) -> Result<String, FleetError>;
}

/// Parse `nodeId:hardwareId` lines, skipping blanks
pub fn parse_identities(data: &str) -> Result<Vec<NodeIdentity>, FleetError> {
    data.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            line.parse::<NodeIdentity>().map_err(|e| match e {
                FleetError::Configuration(msg) => {
                    FleetError::Configuration(format!("line {}: {}", idx + 1, msg))
                }
                other => other,
            })
        })
        .collect()
}

/// Parse one proxy URL per line, skipping blanks
pub fn parse_proxies(data: &str) -> Vec<String> {
    data.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

async fn read_file(path: &Path) -> Result<String, FleetError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| FleetError::Source(format!("{}: {}", path.display(), e)))
}

/// Reads identities from a text file
pub struct FileIdentitySource {
    path: PathBuf,
}

impl FileIdentitySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl IdentitySource for FileIdentitySource {
    async fn list(&self) -> Result<Vec<NodeIdentity>, FleetError> {
        let data = read_file(&self.path).await?;
        parse_identities(&data)
    }
}

/// Reads proxy URLs from a text file
pub struct FileProxySource {
    path: PathBuf,
}

impl FileProxySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ProxySource for FileProxySource {
    async fn list(&self) -> Result<Vec<String>, FleetError> {
        let data = read_file(&self.path).await?;
        Ok(parse_proxies(&data))
    }
}

/// Reads the bearer token from a file on every call, so rotation needs no restart
pub struct FileCredentialSource {
    path: PathBuf,
}

impl FileCredentialSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialSource for FileCredentialSource {
    async fn token(&self) -> Result<String, FleetError> {
        let token = read_file(&self.path).await?.trim().to_string();
        if token.is_empty() {
            return Err(FleetError::Source(format!(
                "{}: token file is empty",
                self.path.display()
            )));
        }
        Ok(token)
    }
}

/// In-memory identities, proxies, and token
#[derive(Debug, Clone, Default)]
pub struct StaticSources {
    pub identities: Vec<NodeIdentity>,
    pub proxies: Vec<String>,
    pub token: String,
}

impl StaticSources {
    pub fn new(identities: Vec<NodeIdentity>, proxies: Vec<String>, token: impl Into<String>) -> Self {
        Self {
            identities,
            proxies,
            token: token.into(),
        }
    }
}

#[async_trait]
impl IdentitySource for StaticSources {
    async fn list(&self) -> Result<Vec<NodeIdentity>, FleetError> {
        Ok(self.identities.clone())
    }
}

#[async_trait]
impl ProxySource for StaticSources {
    async fn list(&self) -> Result<Vec<String>, FleetError> {
        Ok(self.proxies.clone())
    }
}

#[async_trait]
impl CredentialSource for StaticSources {
    async fn token(&self) -> Result<String, FleetError> {
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identities() {
        let ids = parse_identities("n1:h1\r\n\n  n2:h2  \n").unwrap();
        assert_eq!(
            ids,
            vec![NodeIdentity::new("n1", "h1"), NodeIdentity::new("n2", "h2")]
        );
    }

    #[test]
    fn test_parse_identities_reports_line() {
        let err = parse_identities("n1:h1\n\nbroken\n").unwrap_err();
        assert!(matches!(err, FleetError::Configuration(_)));
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_parse_proxies() {
        let proxies = parse_proxies("http://a:1\n\n http://b:2 \n");
        assert_eq!(proxies, vec!["http://a:1", "http://b:2"]);
    }

    #[tokio::test]
    async fn test_file_sources() {
        let dir = std::env::temp_dir().join(format!("fleetd-sources-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("id.txt"), "n1:h1\nn2:h2\n").await.unwrap();
        tokio::fs::write(dir.join("user.txt"), "  secret-token\n").await.unwrap();

        let ids = FileIdentitySource::new(dir.join("id.txt")).list().await.unwrap();
        assert_eq!(ids.len(), 2);

        let token = FileCredentialSource::new(dir.join("user.txt")).token().await.unwrap();
        assert_eq!(token, "secret-token");

        let missing = FileProxySource::new(dir.join("proxy.txt")).list().await;
        assert!(matches!(missing, Err(FleetError::Source(_))));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
