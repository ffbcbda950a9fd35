//! Builds the per-user enrollment archive served to TAK clients.
//!
//! Layout inside the archive, all paths relative to its root:
//!
//! ```text
//! MANIFEST/manifest.xml
//! config.pref
//! truststore-root.p12   (only when the trust store is provisioned)
//! ```

use std::fs::{self, File};
use std::io::{Seek, Write};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::{PackageConfig, TakServerConfig};
use crate::utils::validate_username;

pub const MANIFEST_ENTRY: &str = "MANIFEST/manifest.xml";
pub const PREFERENCES_ENTRY: &str = "config.pref";
pub const TRUSTSTORE_ENTRY: &str = "truststore-root.p12";

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Invalid archive entry: {0}")]
    InvalidEntry(String),
}

/// Credentials to embed in one package.
#[derive(Debug, Clone, Copy)]
pub struct PackageRequest<'a> {
    pub username: &'a str,
    pub token: &'a str,
    pub group_name: &'a str,
}

#[derive(Debug, Clone)]
pub struct PackageBuilder {
    tak: TakServerConfig,
    root_dir: PathBuf,
}

impl PackageBuilder {
    pub fn new(tak: TakServerConfig, packages: PackageConfig) -> Self {
        Self {
            tak,
            root_dir: packages.root_dir,
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Final location of the archive for `username`.
    pub fn archive_path(&self, username: &str) -> PathBuf {
        self.root_dir.join(format!("enroll-{}.zip", username))
    }

    /// Assemble the archive and move it into place.
    ///
    /// The working directory and the staged archive are both temporary files
    /// under the packages root; they are removed on every return path, so a
    /// failed attempt never blocks a retry for the same username.
    #[instrument(skip(self, request), fields(username = %request.username))]
    pub fn build(&self, request: &PackageRequest<'_>) -> Result<PathBuf, PackageError> {
        validate_username(request.username).map_err(|_| {
            PackageError::InvalidEntry(format!("unsafe username '{}'", request.username))
        })?;

        fs::create_dir_all(&self.root_dir)?;

        let work_dir = tempfile::Builder::new()
            .prefix(&format!(".work-{}-", request.username))
            .tempdir_in(&self.root_dir)?;

        let manifest_path = work_dir.path().join(MANIFEST_ENTRY);
        if let Some(parent) = manifest_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&manifest_path, self.manifest(request))?;
        fs::write(work_dir.path().join(PREFERENCES_ENTRY), self.preferences(request))?;

        if self.tak.truststore_path.is_file() {
            fs::copy(
                &self.tak.truststore_path,
                work_dir.path().join(TRUSTSTORE_ENTRY),
            )?;
        } else {
            debug!(path = %self.tak.truststore_path.display(), "Trust store not provisioned, skipping");
        }

        let mut staged = tempfile::Builder::new()
            .prefix(".enroll-")
            .suffix(".zip.tmp")
            .tempfile_in(&self.root_dir)?;
        write_archive(work_dir.path(), staged.as_file_mut())?;
        staged.as_file().sync_all()?;

        let destination = self.archive_path(request.username);
        staged
            .persist(&destination)
            .map_err(|e| PackageError::Io(e.error))?;

        work_dir.close()?;

        info!(path = %destination.display(), "Enrollment package built");
        Ok(destination)
    }

    fn manifest(&self, request: &PackageRequest<'_>) -> String {
        let username = xml_escape(request.username);
        format!(
            r#"<MissionPackageManifest version="2">
    <Configuration>
        <Parameter name="uid" value="{username}"/>
        <Parameter name="name" value="enroll-{username}.zip"/>
        <Parameter name="group" value="{group}"/>
    </Configuration>
    <Contents>
        <Content zipEntry="{PREFERENCES_ENTRY}"/>
        <Content zipEntry="{TRUSTSTORE_ENTRY}"/>
    </Contents>
</MissionPackageManifest>
"#,
            group = xml_escape(request.group_name),
        )
    }

    fn preferences(&self, request: &PackageRequest<'_>) -> String {
        format!(
            r#"<?xml version='1.0' standalone='yes'?>
<preferences>
    <preference version="1" name="cot_streams">
        <entry key="count" class="class java.lang.Integer">1</entry>
        <entry key="connectString0" class="class java.lang.String">{host}:{port}:{protocol}</entry>
        <entry key="caLocation0" class="class java.lang.String">cert/{TRUSTSTORE_ENTRY}</entry>
        <entry key="caPassword0" class="class java.lang.String">{ca_password}</entry>
        <entry key="enrollForCertificateWithTrust0" class="class java.lang.Boolean">true</entry>
        <entry key="useAuth0" class="class java.lang.Boolean">true</entry>
        <entry key="username0" class="class java.lang.String">{username}</entry>
        <entry key="password0" class="class java.lang.String">{token}</entry>
    </preference>
</preferences>
"#,
            host = xml_escape(&self.tak.host),
            port = self.tak.port,
            protocol = xml_escape(&self.tak.protocol),
            ca_password = xml_escape(&self.tak.truststore_password),
            username = xml_escape(request.username),
            token = xml_escape(request.token),
        )
    }
}

/// Zip every regular file below `source`, sorted, with `/`-separated relative
/// names.
fn write_archive<W: Write + Seek>(source: &Path, writer: W) -> Result<W, PackageError> {
    let mut files = Vec::new();
    collect_files(source, &mut files)?;
    files.sort();

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(writer);

    for path in files {
        let name = entry_name(source, &path)?;
        zip.start_file(name, options)?;
        let mut file = File::open(&path)?;
        std::io::copy(&mut file, &mut zip)?;
    }

    Ok(zip.finish()?)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), PackageError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&entry.path(), out)?;
        } else if file_type.is_file() {
            out.push(entry.path());
        }
    }
    Ok(())
}

fn entry_name(root: &Path, path: &Path) -> Result<String, PackageError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| PackageError::InvalidEntry(path.display().to_string()))?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| PackageError::InvalidEntry(relative.display().to_string()))?,
            ),
            _ => return Err(PackageError::InvalidEntry(relative.display().to_string())),
        }
    }

    if parts.is_empty() {
        return Err(PackageError::InvalidEntry(relative.display().to_string()));
    }
    Ok(parts.join("/"))
}

fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn builder(root: &Path, truststore: PathBuf) -> PackageBuilder {
        PackageBuilder::new(
            TakServerConfig {
                host: "10.123.123.2".to_string(),
                port: 8089,
                protocol: "ssl".to_string(),
                truststore_path: truststore,
                truststore_password: "atakatak".to_string(),
            },
            PackageConfig {
                root_dir: root.to_path_buf(),
            },
        )
    }

    fn request<'a>(username: &'a str, token: &'a str) -> PackageRequest<'a> {
        PackageRequest {
            username,
            token,
            group_name: "__ANON__",
        }
    }

    fn entries(path: &Path) -> Vec<String> {
        let archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        names
    }

    fn read_entry(path: &Path, name: &str) -> String {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut contents = String::new();
        archive
            .by_name(name)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        contents
    }

    fn leftovers(root: &Path) -> Vec<String> {
        fs::read_dir(root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with('.'))
            .collect()
    }

    #[test]
    fn builds_archive_without_truststore() {
        let root = TempDir::new().unwrap();
        let builder = builder(root.path(), root.path().join("missing.p12"));

        let path = builder
            .build(&request("alice", "TAK-abcdefghijklmnopqr-ENR"))
            .unwrap();

        assert_eq!(path, root.path().join("enroll-alice.zip"));
        assert_eq!(entries(&path), vec!["MANIFEST/manifest.xml", "config.pref"]);
        assert!(leftovers(root.path()).is_empty());

        let prefs = read_entry(&path, PREFERENCES_ENTRY);
        assert!(prefs.contains("10.123.123.2:8089:ssl"));
        assert!(prefs.contains(">alice</entry>"));
        assert!(prefs.contains(">TAK-abcdefghijklmnopqr-ENR</entry>"));
        assert!(prefs.contains("cert/truststore-root.p12"));
    }

    #[test]
    fn includes_truststore_when_present() {
        let root = TempDir::new().unwrap();
        let config_dir = TempDir::new().unwrap();
        let truststore = config_dir.path().join("truststore-root.p12");
        fs::write(&truststore, b"not really pkcs12").unwrap();

        let path = builder(root.path(), truststore)
            .build(&request("bob", "TAK-000000000000000000-ENR"))
            .unwrap();

        assert_eq!(
            entries(&path),
            vec!["MANIFEST/manifest.xml", "config.pref", "truststore-root.p12"]
        );
        assert_eq!(read_entry(&path, TRUSTSTORE_ENTRY), "not really pkcs12");
    }

    #[test]
    fn rebuild_replaces_previous_archive() {
        let root = TempDir::new().unwrap();
        let builder = builder(root.path(), root.path().join("missing.p12"));

        builder.build(&request("carol", "TAK-first0000000000000-ENR")).unwrap();
        let path = builder
            .build(&request("carol", "TAK-second000000000000-ENR"))
            .unwrap();

        let prefs = read_entry(&path, PREFERENCES_ENTRY);
        assert!(prefs.contains("TAK-second000000000000-ENR"));
        assert!(!prefs.contains("TAK-first0000000000000-ENR"));
    }

    #[test]
    fn failed_build_leaves_no_working_files() {
        let root = TempDir::new().unwrap();
        // A directory at the destination makes the final move fail.
        fs::create_dir(root.path().join("enroll-dave.zip")).unwrap();

        let result = builder(root.path(), root.path().join("missing.p12"))
            .build(&request("dave", "TAK-000000000000000000-ENR"));

        assert!(matches!(result, Err(PackageError::Io(_))));
        assert!(leftovers(root.path()).is_empty());
    }

    #[test]
    fn rejects_path_like_usernames() {
        let root = TempDir::new().unwrap();
        let builder = builder(root.path(), root.path().join("missing.p12"));

        for username in ["../evil", "a/b", ".hidden", ""] {
            let result = builder.build(&request(username, "TAK-000000000000000000-ENR"));
            assert!(matches!(result, Err(PackageError::InvalidEntry(_))), "{username}");
        }
    }

    #[test]
    fn manifest_escapes_values() {
        let root = TempDir::new().unwrap();
        let builder = builder(root.path(), root.path().join("missing.p12"));
        let manifest = builder.manifest(&PackageRequest {
            username: "eve",
            token: "t",
            group_name: "Red & <Blue>",
        });

        assert!(manifest.contains(r#"value="Red &amp; &lt;Blue&gt;""#));
        assert!(manifest.contains(r#"zipEntry="config.pref""#));
        assert!(manifest.contains(r#"zipEntry="truststore-root.p12""#));
    }

    #[test]
    fn entry_name_rejects_parent_components() {
        let root = Path::new("/work");
        assert_eq!(
            entry_name(root, Path::new("/work/MANIFEST/manifest.xml")).unwrap(),
            "MANIFEST/manifest.xml"
        );
        assert!(entry_name(root, Path::new("/work/../etc/passwd")).is_err());
        assert!(entry_name(root, Path::new("/elsewhere/file")).is_err());
    }
}
