//! The session store.
//!
//! A session is a directory below the configured session root that
//! contains the manifest file `session.nsm`. The manifest has one line
//! per client, `name:executable:id`, and its order defines the launch
//! order on load. Sessions may be nested for organization, but a
//! directory holding a manifest is a leaf: nothing below it is a session.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::warn;
use walkdir::WalkDir;

use crate::error::Error;

/// Name of the session manifest file.
pub const SESSION_FILE: &str = "session.nsm";

/// A short opaque client identifier: `n` followed by four capitals.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    /// Validate and wrap an existing identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidClientId`] if the text does not match the
    /// `n[A-Z]{4}` shape.
    pub fn parse(text: &str) -> Result<Self, Error> {
        if Self::is_valid(text) {
            Ok(Self(text.to_string()))
        } else {
            Err(Error::InvalidClientId(text.to_string()))
        }
    }

    /// Whether `text` matches the `n[A-Z]{4}` identifier shape.
    #[must_use]
    pub fn is_valid(text: &str) -> bool {
        let bytes = text.as_bytes();
        bytes.len() == 5 && bytes[0] == b'n' && bytes[1..].iter().all(u8::is_ascii_uppercase)
    }

    /// Generate a fresh identifier that does not collide with `taken`.
    ///
    /// The namespace is 26^4; exhausting it is not handled.
    #[must_use]
    pub fn generate(taken: &HashSet<ClientId>) -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let mut id = String::with_capacity(5);
            id.push('n');
            for _ in 0..4 {
                id.push(rng.gen_range('A'..='Z'));
            }
            let candidate = Self(id);
            if !taken.contains(&candidate) {
                return candidate;
            }
        }
    }

    /// The identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One manifest line: the persisted identity of a session client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTriple {
    /// Client name (initially the executable basename, later the
    /// self-reported pretty name).
    pub name: String,
    /// Command used to launch the client.
    pub executable: String,
    /// The client's identifier within the session.
    pub client_id: ClientId,
}

/// Parse manifest text into triples, preserving order.
///
/// Each line must have exactly three colon-separated fields; surrounding
/// whitespace within fields is preserved. Malformed lines are warned
/// about and skipped, as are empty lines.
#[must_use]
pub fn parse_manifest(text: &str) -> Vec<SessionTriple> {
    let mut triples = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != 3 {
            warn!("skipping malformed manifest line {}: '{line}'", idx + 1);
            continue;
        }
        match ClientId::parse(fields[2]) {
            Ok(client_id) => triples.push(SessionTriple {
                name: fields[0].to_string(),
                executable: fields[1].to_string(),
                client_id,
            }),
            Err(_) => warn!("skipping manifest line {} with bad id: '{line}'", idx + 1),
        }
    }
    triples
}

/// Render triples into manifest text, one line per client.
#[must_use]
pub fn render_manifest(triples: &[SessionTriple]) -> String {
    let mut out = String::new();
    for t in triples {
        out.push_str(&format!("{}:{}:{}\n", t.name, t.executable, t.client_id));
    }
    out
}

/// Read and parse the manifest below `session_path`.
///
/// # Errors
///
/// Returns an I/O error if the manifest cannot be read.
pub fn load_manifest(session_path: &Path) -> Result<Vec<SessionTriple>, Error> {
    let file = session_path.join(SESSION_FILE);
    let text = fs::read_to_string(&file).map_err(|e| Error::io(&file, e))?;
    Ok(parse_manifest(&text))
}

/// Write the manifest below `session_path`.
///
/// # Errors
///
/// Returns an I/O error if the manifest cannot be written, which callers
/// treat as "the session file is write-protected".
pub fn store_manifest(session_path: &Path, triples: &[SessionTriple]) -> Result<(), Error> {
    let file = session_path.join(SESSION_FILE);
    fs::write(&file, render_manifest(triples)).map_err(|e| Error::io(&file, e))
}

/// Validate a session name received over the wire.
///
/// # Errors
///
/// Returns [`Error::InvalidSessionName`] if the name would traverse out
/// of the session root.
pub fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || name.contains("..") {
        return Err(Error::InvalidSessionName(name.to_string()));
    }
    Ok(())
}

/// Whether a session already exists at `root`/`relative`.
#[must_use]
pub fn session_exists(root: &Path, relative: &str) -> bool {
    root.join(relative).join(SESSION_FILE).is_file()
}

/// The simple name of a session: the basename of its path.
#[must_use]
pub fn simple_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Per-client project directory: `{session_path}/{name}.{client_id}`.
#[must_use]
pub fn client_project_path(session_path: &Path, name: &str, client_id: &ClientId) -> PathBuf {
    session_path.join(format!("{name}.{client_id}"))
}

/// Default session root: `$XDG_DATA_HOME/nsm`, else `~/.local/share/nsm`.
#[must_use]
pub fn default_session_root() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        if !data_home.is_empty() {
            return PathBuf::from(data_home).join("nsm");
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".local/share/nsm")
}

/// Enumerate sessions below `root`, depth first.
///
/// A directory containing [`SESSION_FILE`] is a session leaf: its
/// root-relative path is yielded and its descendants are pruned.
#[must_use]
pub fn list_sessions(root: &Path) -> Vec<String> {
    let mut sessions = Vec::new();
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();
    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("session walk error under {root:?}: {e}");
                continue;
            },
        };
        if entry.file_type().is_dir() && entry.path().join(SESSION_FILE).is_file() {
            if let Ok(relative) = entry.path().strip_prefix(root) {
                sessions.push(relative.to_string_lossy().into_owned());
            }
            walker.skip_current_dir();
        }
    }
    sessions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_shape() {
        assert!(ClientId::is_valid("nABCD"));
        assert!(!ClientId::is_valid("nabcd"));
        assert!(!ClientId::is_valid("nABC"));
        assert!(!ClientId::is_valid("xABCD"));
        assert!(!ClientId::is_valid("nABCDE"));
        assert!(ClientId::parse("nWXYZ").is_ok());
        assert!(ClientId::parse("bogus").is_err());
    }

    #[test]
    fn test_client_id_generation_avoids_collisions() {
        let mut taken = HashSet::new();
        for _ in 0..64 {
            let id = ClientId::generate(&taken);
            assert!(ClientId::is_valid(id.as_str()));
            assert!(!taken.contains(&id));
            taken.insert(id);
        }
    }

    #[test]
    fn test_manifest_round_trip_preserves_order_and_fields() {
        let text = "Mytool:mytool:nABCD\nSynth Lead:synth:nWXYZ\n";
        let triples = parse_manifest(text);
        assert_eq!(triples.len(), 2);
        assert_eq!(triples[0].name, "Mytool");
        assert_eq!(triples[0].executable, "mytool");
        assert_eq!(triples[0].client_id.as_str(), "nABCD");
        assert_eq!(triples[1].name, "Synth Lead");
        assert_eq!(render_manifest(&triples), text);
    }

    #[test]
    fn test_manifest_rejects_malformed_lines() {
        let text = "good:exe:nABCD\nmissing-fields\nfour:fields:nWXYZ:extra\n";
        let triples = parse_manifest(text);
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].name, "good");
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_name("alpha").is_ok());
        assert!(validate_name("album/song").is_ok());
        assert!(validate_name("../escape").is_err());
        assert!(validate_name("a/../b").is_err());
        assert!(validate_name("").is_err());
    }

    #[test]
    fn test_list_sessions_prunes_leaves() {
        let root = tempfile::tempdir().unwrap();
        let alpha = root.path().join("alpha");
        let nested = root.path().join("album/song");
        let below_leaf = alpha.join("inner");
        std::fs::create_dir_all(&alpha).unwrap();
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(&below_leaf).unwrap();
        std::fs::write(alpha.join(SESSION_FILE), "").unwrap();
        std::fs::write(nested.join(SESSION_FILE), "").unwrap();
        // A manifest below a leaf must not be reported.
        std::fs::write(below_leaf.join(SESSION_FILE), "").unwrap();

        let mut sessions = list_sessions(root.path());
        sessions.sort();
        assert_eq!(sessions, vec!["album/song".to_string(), "alpha".to_string()]);
    }

    #[test]
    fn test_store_and_load_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let triples = vec![SessionTriple {
            name: "Mytool".to_string(),
            executable: "mytool".to_string(),
            client_id: ClientId::parse("nQRST").unwrap(),
        }];
        store_manifest(dir.path(), &triples).unwrap();
        let loaded = load_manifest(dir.path()).unwrap();
        assert_eq!(loaded, triples);
    }
}
