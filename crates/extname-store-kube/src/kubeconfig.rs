// # Kubeconfig Loading
//
// Out-of-cluster connection settings read from a kubeconfig file, the way
// `kubectl` finds them: `$KUBECONFIG` (first entry) or `~/.kube/config`.
//
// Only the current context is resolved. Supported credentials are a bearer
// token (inline or `tokenFile`) and a client certificate/key pair (inline
// `*-data` or file paths). Relative paths resolve against the kubeconfig's
// own directory. `exec` and `auth-provider` plugins are not run.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use extname_core::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Parsed kubeconfig document (the parts this crate uses)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Kubeconfig {
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(rename = "current-context", default)]
    current_context: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: Cluster,
}

#[derive(Debug, Clone, Deserialize)]
struct Cluster {
    server: String,
    #[serde(rename = "certificate-authority", default)]
    certificate_authority: Option<String>,
    #[serde(rename = "certificate-authority-data", default)]
    certificate_authority_data: Option<String>,
    #[serde(rename = "insecure-skip-tls-verify", default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: User,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct User {
    #[serde(default)]
    token: Option<String>,
    #[serde(rename = "tokenFile", default)]
    token_file: Option<String>,
    #[serde(rename = "client-certificate", default)]
    client_certificate: Option<String>,
    #[serde(rename = "client-certificate-data", default)]
    client_certificate_data: Option<String>,
    #[serde(rename = "client-key", default)]
    client_key: Option<String>,
    #[serde(rename = "client-key-data", default)]
    client_key_data: Option<String>,
    #[serde(default)]
    exec: Option<serde_yaml::Value>,
    #[serde(rename = "auth-provider", default)]
    auth_provider: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct NamedContext {
    name: String,
    context: Context,
}

#[derive(Debug, Clone, Deserialize)]
struct Context {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
}

/// Everything needed to build an HTTP client for the current context
pub struct Connection {
    /// API server URL
    pub server: String,
    /// Extra root certificate (PEM)
    pub ca_pem: Option<Vec<u8>>,
    /// Skip server certificate verification
    pub insecure: bool,
    /// Bearer token
    /// ⚠️ NEVER log this value
    pub token: Option<String>,
    /// Client certificate followed by its private key (PEM)
    pub identity_pem: Option<Vec<u8>>,
}

impl Kubeconfig {
    /// Parse a kubeconfig document
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| Error::config(format!("Invalid kubeconfig: {}", e)))
    }

    /// Read and parse a kubeconfig file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read kubeconfig {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }

    /// Resolve the current context into connection settings
    ///
    /// `base_dir` is the directory relative file references resolve against.
    pub fn connection(&self, base_dir: &Path) -> Result<Connection> {
        let context_name = self
            .current_context
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::config("kubeconfig has no current-context"))?;

        let context = self
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .map(|c| &c.context)
            .ok_or_else(|| {
                Error::config(format!("kubeconfig context '{}' not found", context_name))
            })?;

        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| {
                Error::config(format!("kubeconfig cluster '{}' not found", context.cluster))
            })?;

        let user = match &context.user {
            Some(name) => self
                .users
                .iter()
                .find(|u| &u.name == name)
                .map(|u| u.user.clone())
                .ok_or_else(|| Error::config(format!("kubeconfig user '{}' not found", name)))?,
            None => User::default(),
        };

        if user.exec.is_some() || user.auth_provider.is_some() {
            return Err(Error::config(format!(
                "kubeconfig context '{}' uses an exec/auth-provider plugin, which is not supported; \
                 use a token or client certificate",
                context_name
            )));
        }

        let ca_pem = inline_or_file(
            cluster.certificate_authority_data.as_deref(),
            cluster.certificate_authority.as_deref(),
            base_dir,
            "certificate-authority",
        )?;

        let token = match (&user.token, &user.token_file) {
            (Some(token), _) if !token.is_empty() => Some(token.clone()),
            (_, Some(file)) => {
                let path = resolve(base_dir, file);
                let token = std::fs::read_to_string(&path).map_err(|e| {
                    Error::config(format!("Failed to read tokenFile {}: {}", path.display(), e))
                })?;
                Some(token.trim().to_string()).filter(|t| !t.is_empty())
            }
            _ => None,
        };

        let cert = inline_or_file(
            user.client_certificate_data.as_deref(),
            user.client_certificate.as_deref(),
            base_dir,
            "client-certificate",
        )?;
        let key = inline_or_file(
            user.client_key_data.as_deref(),
            user.client_key.as_deref(),
            base_dir,
            "client-key",
        )?;
        let identity_pem = match (cert, key) {
            (Some(mut cert), Some(key)) => {
                cert.push(b'\n');
                cert.extend_from_slice(&key);
                Some(cert)
            }
            (None, None) => None,
            _ => {
                return Err(Error::config(
                    "kubeconfig user has a client certificate without a key (or the reverse)",
                ));
            }
        };

        Ok(Connection {
            server: cluster.server.clone(),
            ca_pem,
            insecure: cluster.insecure_skip_tls_verify,
            token,
            identity_pem,
        })
    }
}

/// Where `kubectl` would look: first `$KUBECONFIG` entry, else `~/.kube/config`
pub fn default_path() -> Option<PathBuf> {
    if let Some(list) = std::env::var_os("KUBECONFIG")
        && let Some(first) = std::env::split_paths(&list).find(|p| !p.as_os_str().is_empty())
    {
        return Some(first);
    }
    std::env::var_os("HOME").map(|home| Path::new(&home).join(".kube").join("config"))
}

fn resolve(base_dir: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn inline_or_file(
    data: Option<&str>,
    file: Option<&str>,
    base_dir: &Path,
    what: &str,
) -> Result<Option<Vec<u8>>> {
    if let Some(data) = data.filter(|d| !d.is_empty()) {
        let compact: String = data.split_whitespace().collect();
        let bytes = STANDARD
            .decode(compact)
            .map_err(|e| Error::config(format!("kubeconfig {}-data is not base64: {}", what, e)))?;
        return Ok(Some(bytes));
    }
    match file.filter(|f| !f.is_empty()) {
        Some(file) => {
            let path = resolve(base_dir, file);
            std::fs::read(&path).map(Some).map_err(|e| {
                Error::config(format!("Failed to read {} {}: {}", what, path.display(), e))
            })
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_CONTEXTS: &str = r#"
apiVersion: v1
kind: Config
current-context: home
clusters:
- name: lab
  cluster:
    server: https://lab.example:6443
    insecure-skip-tls-verify: true
- name: home
  cluster:
    server: https://10.0.0.5:6443
    certificate-authority-data: LS0tLS1CRUdJTiBDRVJUSUZJQ0FURS0tLS0t
users:
- name: admin
  user:
    token: abc123
- name: lab-user
  user:
    tokenFile: tokens/lab
contexts:
- name: lab
  context:
    cluster: lab
    user: lab-user
- name: home
  context:
    cluster: home
    user: admin
    namespace: edge
"#;

    #[test]
    fn resolves_current_context() {
        let config = Kubeconfig::from_yaml(TWO_CONTEXTS).unwrap();
        let conn = config.connection(Path::new("/nowhere")).unwrap();

        assert_eq!(conn.server, "https://10.0.0.5:6443");
        assert_eq!(conn.token.as_deref(), Some("abc123"));
        assert_eq!(conn.ca_pem.as_deref(), Some(&b"-----BEGIN CERTIFICATE-----"[..]));
        assert!(!conn.insecure);
        assert!(conn.identity_pem.is_none());
    }

    #[test]
    fn token_file_resolves_against_the_kubeconfig_directory() {
        let dir = std::env::temp_dir().join(format!("extname-kubeconfig-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("tokens")).unwrap();
        std::fs::write(dir.join("tokens/lab"), "lab-token\n").unwrap();

        let config =
            Kubeconfig::from_yaml(&TWO_CONTEXTS.replace("current-context: home", "current-context: lab"))
                .unwrap();
        let conn = config.connection(&dir).unwrap();

        assert_eq!(conn.server, "https://lab.example:6443");
        assert_eq!(conn.token.as_deref(), Some("lab-token"));
        assert!(conn.insecure);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn client_certificate_pair_becomes_one_identity() {
        let yaml = r#"
current-context: c
clusters: [{name: c, cluster: {server: "https://k:6443"}}]
users: [{name: u, user: {client-certificate-data: Q0VSVA==, client-key-data: S0VZ}}]
contexts: [{name: c, context: {cluster: c, user: u}}]
"#;
        let conn = Kubeconfig::from_yaml(yaml).unwrap().connection(Path::new("/")).unwrap();
        assert_eq!(conn.identity_pem.as_deref(), Some(&b"CERT\nKEY"[..]));
        assert!(conn.token.is_none());
    }

    #[test]
    fn unknown_context_and_plugins_are_config_errors() {
        let config = Kubeconfig::from_yaml(
            &TWO_CONTEXTS.replace("current-context: home", "current-context: gone"),
        )
        .unwrap();
        assert!(matches!(config.connection(Path::new("/")), Err(Error::Config(_))));

        let yaml = r#"
current-context: c
clusters: [{name: c, cluster: {server: "https://k:6443"}}]
users: [{name: u, user: {exec: {command: gke-gcloud-auth-plugin}}}]
contexts: [{name: c, context: {cluster: c, user: u}}]
"#;
        let config = Kubeconfig::from_yaml(yaml).unwrap();
        assert!(matches!(config.connection(Path::new("/")), Err(Error::Config(_))));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(Kubeconfig::from_yaml("clusters: 7"), Err(Error::Config(_))));
    }
}
