//! SSH credential resolution and host-key verification.
//!
//! [`SshAuthResolver::resolve`] turns a [`Credential`] into an ordered list of
//! [`AuthMethod`]s (key first, password second) plus a [`KnownHosts`] verifier.
//! Everything here is synchronous and touches only local files; the
//! interactive passphrase prompt, when supplied, blocks the resolving call.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::keys::{self, PrivateKey, PublicKey};
use tracing::{debug, warn};

use crate::address::Password;
use crate::error::{ActionError, AuthError, HostKeyProblem};

/// Asks the operator for a private-key passphrase. Returns `None` when no
/// answer could be read.
pub type PassphrasePrompt = dyn Fn() -> Option<String> + Send + Sync;

/// Borrowed form of [`PassphrasePrompt`] for a single resolution. Unlike the
/// stored alias it may capture locals.
pub type PromptRef<'a> = &'a (dyn Fn() -> Option<String> + Send + Sync + 'a);

/// Location of a private key and an optional embedded passphrase.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyFile {
    /// Absolute, `~/`-prefixed, or relative to `~/.ssh/`.
    pub path: String,
    pub passphrase: Option<String>,
}

impl std::fmt::Debug for KeyFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyFile")
            .field("path", &self.path)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***"))
            .finish()
    }
}

/// What the operator supplied to log in with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Password(Password),
    PrivateKey(KeyFile),
    /// Key is tried first; the password is the fallback.
    KeyWithPassword { key: KeyFile, password: Password },
}

impl Credential {
    /// Build a credential from optional raw parts. Empty strings count as absent.
    pub fn from_parts(
        password: Option<String>,
        key: Option<KeyFile>,
    ) -> Result<Self, ActionError> {
        let password = password.filter(|p| !p.is_empty()).map(Password::new).transpose()?;
        let key = key.filter(|k| !k.path.is_empty()).map(|k| KeyFile {
            passphrase: k.passphrase.filter(|p| !p.is_empty()),
            ..k
        });
        match (key, password) {
            (Some(key), Some(password)) => Ok(Self::KeyWithPassword { key, password }),
            (Some(key), None) => Ok(Self::PrivateKey(key)),
            (None, Some(password)) => Ok(Self::Password(password)),
            (None, None) => Err(AuthError::NoCredential.into()),
        }
    }

    fn key(&self) -> Option<&KeyFile> {
        match self {
            Self::PrivateKey(key) | Self::KeyWithPassword { key, .. } => Some(key),
            Self::Password(_) => None,
        }
    }

    fn password(&self) -> Option<&Password> {
        match self {
            Self::Password(password) | Self::KeyWithPassword { password, .. } => Some(password),
            Self::PrivateKey(_) => None,
        }
    }
}

/// One way to authenticate, in the order it should be attempted.
#[derive(Clone)]
pub enum AuthMethod {
    PublicKey(Arc<PrivateKey>),
    Password(String),
}

impl AuthMethod {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PublicKey(_) => "publickey",
            Self::Password(_) => "password",
        }
    }
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthMethod::{}", self.kind())
    }
}

/// Output of [`SshAuthResolver::resolve`].
#[derive(Debug, Clone)]
pub struct ResolvedAuth {
    pub methods: Vec<AuthMethod>,
    pub verifier: KnownHosts,
}

/// An OpenSSH `known_hosts` file. Unknown or changed keys are rejected.
#[derive(Debug, Clone)]
pub struct KnownHosts {
    path: PathBuf,
}

impl KnownHosts {
    /// Open the store at `path`, creating an empty file (and its directory) if
    /// it does not exist yet.
    pub fn open_or_create(path: impl Into<PathBuf>) -> Result<Self, HostKeyProblem> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                HostKeyProblem::Store(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|e| HostKeyProblem::Store(format!("cannot open {}: {e}", path.display())))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept `key` only if `known_hosts` already lists it for `host:port`.
    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), HostKeyProblem> {
        let known_hosts = self.path.display().to_string();
        match keys::check_known_hosts_path(host, port, key, &self.path) {
            Ok(true) => Ok(()),
            Ok(false) => Err(HostKeyProblem::Unknown {
                host: host.to_string(),
                port,
                known_hosts,
            }),
            Err(keys::Error::KeyChanged { line }) => Err(HostKeyProblem::Changed {
                host: host.to_string(),
                port,
                known_hosts,
                line,
            }),
            Err(e) => Err(HostKeyProblem::Store(e.to_string())),
        }
    }
}

/// Resolves credentials relative to one operator's `~/.ssh` directory.
#[derive(Debug, Clone)]
pub struct SshAuthResolver {
    ssh_dir: PathBuf,
    home: Option<PathBuf>,
    known_hosts: PathBuf,
}

impl SshAuthResolver {
    /// Resolver rooted at an explicit `.ssh` directory. Keys with relative
    /// paths are looked up there and `known_hosts` defaults to a file inside it.
    pub fn new(ssh_dir: impl Into<PathBuf>) -> Self {
        let ssh_dir = ssh_dir.into();
        Self {
            known_hosts: ssh_dir.join("known_hosts"),
            home: ssh_dir.parent().map(Path::to_path_buf),
            ssh_dir,
        }
    }

    /// Resolver for the current user (`$HOME/.ssh`), with an optional
    /// known-hosts override.
    pub fn for_current_user(known_hosts: Option<&str>) -> Result<Self, ActionError> {
        let home = crate::util::home_dir()
            .ok_or_else(|| ActionError::from(HostKeyProblem::Store("HOME is not set".into())))?;
        let mut resolver = Self::new(home.join(".ssh"));
        if let Some(path) = known_hosts {
            resolver.known_hosts = PathBuf::from(crate::util::expand_tilde(path).as_ref());
        }
        Ok(resolver)
    }

    /// Where a configured key path points on disk.
    pub fn key_path(&self, raw: &str) -> PathBuf {
        if let (Some(rest), Some(home)) = (raw.strip_prefix("~/"), self.home.as_ref()) {
            return home.join(rest);
        }
        let path = Path::new(raw);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.ssh_dir.join(path)
        }
    }

    /// Resolve `credential` into auth methods and a host-key verifier.
    ///
    /// `prompt` is called at most once, and only when the key is encrypted
    /// and the credential carries no passphrase.
    pub fn resolve(
        &self,
        credential: &Credential,
        prompt: Option<PromptRef<'_>>,
    ) -> Result<ResolvedAuth, ActionError> {
        let verifier = KnownHosts::open_or_create(&self.known_hosts)?;
        let mut methods = Vec::with_capacity(2);

        if let Some(key) = credential.key() {
            match self.load_key(key, prompt) {
                Ok(private) => methods.push(AuthMethod::PublicKey(Arc::new(private))),
                Err(e) if credential.password().is_some() => {
                    warn!("Private key unusable, falling back to password: {e}");
                }
                Err(e) => return Err(e.into()),
            }
        }
        if let Some(password) = credential.password() {
            methods.push(AuthMethod::Password(password.expose().to_string()));
        }
        if methods.is_empty() {
            return Err(AuthError::NoCredential.into());
        }

        debug!(
            "Resolved SSH auth: {:?}",
            methods.iter().map(AuthMethod::kind).collect::<Vec<_>>()
        );
        Ok(ResolvedAuth { methods, verifier })
    }

    fn load_key(
        &self,
        key: &KeyFile,
        prompt: Option<PromptRef<'_>>,
    ) -> Result<PrivateKey, AuthError> {
        let path = self.key_path(&key.path);
        let shown = path.display().to_string();
        let pem = std::fs::read_to_string(&path).map_err(|e| AuthError::KeyUnreadable {
            path: shown.clone(),
            reason: e.to_string(),
        })?;

        match keys::decode_secret_key(&pem, None) {
            Ok(private) => return Ok(private),
            Err(keys::Error::KeyIsEncrypted) => {}
            Err(e) => {
                return Err(AuthError::KeyUnreadable {
                    path: shown,
                    reason: e.to_string(),
                })
            }
        }

        let passphrase = match (key.passphrase.as_deref(), prompt) {
            (Some(embedded), _) => embedded.to_string(),
            (None, Some(ask)) => ask().ok_or_else(|| AuthError::PassphraseRequired(shown.clone()))?,
            (None, None) => return Err(AuthError::PassphraseRequired(shown)),
        };
        keys::decode_secret_key(&pem, Some(&passphrase)).map_err(|_| AuthError::BadPassphrase(shown))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rand_core::OsRng;
    use ssh_key::{Algorithm, LineEnding};

    /// Write a fresh ed25519 key to `dir/name`, optionally encrypted. Returns
    /// the OpenSSH public key line.
    pub(crate) fn write_key(dir: &Path, name: &str, passphrase: Option<&str>) -> String {
        let key = ssh_key::PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let public = key.public_key().to_openssh().unwrap();
        let key = match passphrase {
            Some(p) => key.encrypt(&mut OsRng, p).unwrap(),
            None => key,
        };
        let pem = key.to_openssh(LineEnding::LF).unwrap();
        std::fs::write(dir.join(name), pem.as_bytes()).unwrap();
        public
    }

    fn setup() -> (tempfile::TempDir, SshAuthResolver) {
        let home = tempfile::tempdir().unwrap();
        let ssh_dir = home.path().join(".ssh");
        std::fs::create_dir_all(&ssh_dir).unwrap();
        let resolver = SshAuthResolver::new(&ssh_dir);
        (home, resolver)
    }

    fn key_cred(path: &str, passphrase: Option<&str>) -> Credential {
        Credential::PrivateKey(KeyFile {
            path: path.to_string(),
            passphrase: passphrase.map(String::from),
        })
    }

    #[test]
    fn test_credential_from_parts() {
        let key = KeyFile {
            path: "id_ed25519".into(),
            passphrase: Some(String::new()),
        };
        match Credential::from_parts(Some("pw".into()), Some(key.clone())).unwrap() {
            Credential::KeyWithPassword { key, password } => {
                assert_eq!(key.passphrase, None);
                assert_eq!(password.expose(), "pw");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            Credential::from_parts(Some(String::new()), Some(key)).unwrap(),
            Credential::PrivateKey(_)
        ));
        let empty_key = KeyFile {
            path: String::new(),
            passphrase: None,
        };
        assert!(matches!(
            Credential::from_parts(None, Some(empty_key)),
            Err(ActionError::AuthResolution(AuthError::NoCredential))
        ));
    }

    #[test]
    fn test_key_path_resolution() {
        let resolver = SshAuthResolver::new("/home/op/.ssh");
        assert_eq!(resolver.key_path("id_rsa"), PathBuf::from("/home/op/.ssh/id_rsa"));
        assert_eq!(resolver.key_path("keys/lab"), PathBuf::from("/home/op/.ssh/keys/lab"));
        assert_eq!(resolver.key_path("/etc/keys/lab"), PathBuf::from("/etc/keys/lab"));
        assert_eq!(resolver.key_path("~/lab.pem"), PathBuf::from("/home/op/lab.pem"));
    }

    #[test]
    fn test_resolve_creates_known_hosts() {
        let (_home, resolver) = setup();
        let resolved = resolver
            .resolve(&Credential::Password(Password::new("pw").unwrap()), None)
            .unwrap();
        assert!(resolved.verifier.path().exists());
        assert_eq!(resolved.methods.len(), 1);
        assert_eq!(resolved.methods[0].kind(), "password");
    }

    #[test]
    fn test_unencrypted_key_needs_no_prompt() {
        let (_home, resolver) = setup();
        write_key(&resolver.ssh_dir, "id_ed25519", None);
        let prompted = AtomicUsize::new(0);
        let prompt = || {
            prompted.fetch_add(1, Ordering::SeqCst);
            Some("unused".to_string())
        };
        let resolved = resolver.resolve(&key_cred("id_ed25519", None), Some(&prompt)).unwrap();
        assert_eq!(resolved.methods[0].kind(), "publickey");
        assert_eq!(prompted.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_encrypted_key_with_embedded_passphrase() {
        let (_home, resolver) = setup();
        write_key(&resolver.ssh_dir, "lab", Some("correct horse"));
        let resolved = resolver
            .resolve(&key_cred("lab", Some("correct horse")), None)
            .unwrap();
        assert_eq!(resolved.methods.len(), 1);
    }

    #[test]
    fn test_prompted_passphrase_is_asked_once() {
        let (_home, resolver) = setup();
        write_key(&resolver.ssh_dir, "lab", Some("correct horse"));
        let prompted = AtomicUsize::new(0);
        let prompt = || {
            prompted.fetch_add(1, Ordering::SeqCst);
            Some("correct horse".to_string())
        };
        let resolved = resolver.resolve(&key_cred("lab", None), Some(&prompt)).unwrap();
        assert_eq!(resolved.methods[0].kind(), "publickey");
        assert_eq!(prompted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wrong_prompted_passphrase_fails_without_retry() {
        let (_home, resolver) = setup();
        write_key(&resolver.ssh_dir, "lab", Some("correct horse"));
        let prompted = AtomicUsize::new(0);
        let prompt = || {
            prompted.fetch_add(1, Ordering::SeqCst);
            Some("battery staple".to_string())
        };
        let err = resolver.resolve(&key_cred("lab", None), Some(&prompt)).unwrap_err();
        assert!(matches!(
            err,
            ActionError::AuthResolution(AuthError::BadPassphrase(_))
        ));
        assert_eq!(prompted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_encrypted_key_without_passphrase_source() {
        let (_home, resolver) = setup();
        write_key(&resolver.ssh_dir, "lab", Some("correct horse"));
        let err = resolver.resolve(&key_cred("lab", None), None).unwrap_err();
        assert!(matches!(
            err,
            ActionError::AuthResolution(AuthError::PassphraseRequired(_))
        ));
    }

    #[test]
    fn test_missing_key_falls_back_to_password() {
        let (_home, resolver) = setup();
        let cred = Credential::KeyWithPassword {
            key: KeyFile {
                path: "does-not-exist".into(),
                passphrase: None,
            },
            password: Password::new("pw").unwrap(),
        };
        let resolved = resolver.resolve(&cred, None).unwrap();
        assert_eq!(resolved.methods.len(), 1);
        assert_eq!(resolved.methods[0].kind(), "password");
    }

    #[test]
    fn test_key_then_password_order() {
        let (_home, resolver) = setup();
        write_key(&resolver.ssh_dir, "id_ed25519", None);
        let cred = Credential::KeyWithPassword {
            key: KeyFile {
                path: "id_ed25519".into(),
                passphrase: None,
            },
            password: Password::new("pw").unwrap(),
        };
        let kinds: Vec<&str> = resolver
            .resolve(&cred, None)
            .unwrap()
            .methods
            .iter()
            .map(AuthMethod::kind)
            .collect();
        assert_eq!(kinds, ["publickey", "password"]);
    }

    #[test]
    fn test_missing_key_without_password_is_unreadable() {
        let (_home, resolver) = setup();
        let err = resolver.resolve(&key_cred("nope", None), None).unwrap_err();
        assert!(matches!(
            err,
            ActionError::AuthResolution(AuthError::KeyUnreadable { .. })
        ));
    }

    #[test]
    fn test_known_hosts_verification() {
        let (_home, resolver) = setup();
        let known = write_key(&resolver.ssh_dir, "server_a", None);
        let other = write_key(&resolver.ssh_dir, "server_b", None);
        std::fs::write(
            &resolver.known_hosts,
            format!("nas.local {known}\n[lab.local]:2222 {known}\n"),
        )
        .unwrap();
        let verifier = KnownHosts::open_or_create(&resolver.known_hosts).unwrap();
        let known = PublicKey::from_openssh(&known).unwrap();
        let other = PublicKey::from_openssh(&other).unwrap();

        assert!(verifier.verify("nas.local", 22, &known).is_ok());
        assert!(verifier.verify("lab.local", 2222, &known).is_ok());
        assert!(matches!(
            verifier.verify("desktop.local", 22, &known),
            Err(HostKeyProblem::Unknown { .. })
        ));
        assert!(matches!(
            verifier.verify("nas.local", 22, &other),
            Err(HostKeyProblem::Changed { .. })
        ));
    }
}
