use crate::error::{ServerError, ServerResult};
use crate::mime;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// The index file served for directory requests
pub const INDEX_FILE: &str = "index.html";

/// The outcome of resolving a request path against the document root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    /// Canonicalized filesystem path
    pub absolute_path: PathBuf,
    /// Whether `absolute_path` names a regular file
    pub exists: bool,
    /// Whether `absolute_path` is a strict descendant of the document root
    pub within_root: bool,
    /// Content type chosen from the requested name, before symlinks are followed
    pub content_type: &'static str,
}

impl ResolvedFile {
    /// Only files that exist inside the root may be served
    pub fn is_servable(&self) -> bool {
        self.exists && self.within_root
    }
}

/// Maps request paths onto files beneath a document root
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Create a resolver for `document_root`, which must be an existing directory
    pub fn new<P: AsRef<Path>>(document_root: P) -> ServerResult<Self> {
        let document_root = document_root.as_ref();
        let root = fs::canonicalize(document_root).map_err(|e| {
            ServerError::Config(format!(
                "Cannot resolve document root {}: {}",
                document_root.display(),
                e
            ))
        })?;

        if !root.is_dir() {
            return Err(ServerError::Config(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        Ok(Self { root })
    }

    /// The canonical document root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build the on-disk candidate for a request path, before canonicalization
    pub fn candidate(&self, request_path: &str) -> PathBuf {
        if request_path == "/" {
            return self.root.join(INDEX_FILE);
        }

        if request_path.len() > 1 && request_path.ends_with('/') {
            let dir = request_path.trim_start_matches('/').trim_end_matches('/');
            return self.root.join(dir).join(INDEX_FILE);
        }

        self.root.join(request_path.strip_prefix('/').unwrap_or(request_path))
    }

    /// Resolve a request path.
    ///
    /// Fails with `ForbiddenPath` when the canonical candidate is not a
    /// strict descendant of the root, or when it cannot be canonicalized.
    pub fn resolve(&self, request_path: &str) -> ServerResult<ResolvedFile> {
        let candidate = self.candidate(request_path);

        let absolute_path = canonicalize_lenient(&candidate).map_err(|e| {
            ServerError::ForbiddenPath(format!("{}: {}", request_path, e))
        })?;

        let within_root = absolute_path != self.root && absolute_path.starts_with(&self.root);
        if !within_root {
            return Err(ServerError::ForbiddenPath(request_path.to_string()));
        }

        Ok(ResolvedFile {
            exists: absolute_path.is_file(),
            absolute_path,
            within_root,
            content_type: mime::content_type(&candidate),
        })
    }

    /// Resolve a request path to a file that can be served
    pub fn resolve_servable(&self, request_path: &str) -> ServerResult<ResolvedFile> {
        let resolved = self.resolve(request_path)?;
        if !resolved.is_servable() {
            return Err(ServerError::NotFound(resolved.absolute_path));
        }
        Ok(resolved)
    }
}

/// Canonicalize a path whose tail may not exist.
///
/// Every existing prefix is resolved through `fs::canonicalize`, so symlinks
/// are followed wherever they occur. Missing components are appended
/// lexically, and `..` pops the last component.
pub fn canonicalize_lenient(path: &Path) -> io::Result<PathBuf> {
    let mut resolved = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(segment) => {
                resolved.push(segment);
                match fs::canonicalize(&resolved) {
                    Ok(canonical) => resolved = canonical,
                    Err(e) if is_missing(&e) => {}
                    Err(e) => return Err(e),
                }
            }
        }
    }

    Ok(resolved)
}

fn is_missing(err: &io::Error) -> bool {
    // NotADirectory shows up when a path walks through a regular file
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "poolhttpd-resolver-{}-{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("docs")).unwrap();
        fs::write(dir.join("index.html"), b"<h1>hi</h1>").unwrap();
        fs::write(dir.join("docs").join("index.html"), b"docs").unwrap();
        dir
    }

    #[test]
    fn candidate_rules() {
        let root = temp_root("candidate");
        let resolver = PathResolver::new(&root).unwrap();
        let base = resolver.root().to_path_buf();

        assert_eq!(resolver.candidate("/"), base.join("index.html"));
        assert_eq!(resolver.candidate("/docs/"), base.join("docs").join("index.html"));
        assert_eq!(resolver.candidate("/a/b.txt"), base.join("a").join("b.txt"));
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn lenient_canonicalization_handles_missing_tail() {
        let root = temp_root("lenient");
        let canonical_root = fs::canonicalize(&root).unwrap();

        let missing = canonicalize_lenient(&root.join("nope").join("x.txt")).unwrap();
        assert_eq!(missing, canonical_root.join("nope").join("x.txt"));

        let popped = canonicalize_lenient(&root.join("nope").join("..").join("docs")).unwrap();
        assert_eq!(popped, canonical_root.join("docs"));
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn rejects_escapes_and_root_itself() {
        let root = temp_root("escape");
        let resolver = PathResolver::new(&root).unwrap();

        for path in ["/../secret.txt", "/docs/../../etc/passwd", "/.", "//etc/passwd"] {
            assert!(
                matches!(resolver.resolve(path), Err(ServerError::ForbiddenPath(_))),
                "{} should be forbidden",
                path
            );
        }
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn reports_existence_inside_root() {
        let root = temp_root("exists");
        let resolver = PathResolver::new(&root).unwrap();

        let index = resolver.resolve("/").unwrap();
        assert!(index.is_servable());

        let missing = resolver.resolve("/nofile.txt").unwrap();
        assert!(missing.within_root);
        assert!(!missing.exists);

        let dir = resolver.resolve("/docs").unwrap();
        assert!(!dir.exists);
        assert!(matches!(resolver.resolve_servable("/docs"), Err(ServerError::NotFound(_))));
        assert!(resolver.resolve_servable("/docs/").is_ok());
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn paths_through_a_file_are_not_found() {
        let root = temp_root("notdir");
        let resolver = PathResolver::new(&root).unwrap();

        let resolved = resolver.resolve("/index.html/extra.txt").unwrap();
        assert!(resolved.within_root);
        assert!(!resolved.exists);
        assert!(matches!(
            resolver.resolve_servable("/index.html/extra.txt"),
            Err(ServerError::NotFound(_))
        ));
        fs::remove_dir_all(root).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_out_of_root_are_forbidden() {
        let root = temp_root("symlink");
        let outside = std::env::temp_dir().join(format!("poolhttpd-outside-{}", std::process::id()));
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("secret.txt"), b"secret").unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        let resolver = PathResolver::new(&root).unwrap();
        assert!(matches!(
            resolver.resolve("/link/secret.txt"),
            Err(ServerError::ForbiddenPath(_))
        ));
        assert!(matches!(
            resolver.resolve("/missing/../link/secret.txt"),
            Err(ServerError::ForbiddenPath(_))
        ));

        fs::remove_dir_all(root).unwrap();
        fs::remove_dir_all(outside).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn content_type_follows_requested_name() {
        let root = temp_root("linktype");
        fs::write(root.join("blob"), b"<b>x</b>").unwrap();
        std::os::unix::fs::symlink(root.join("blob"), root.join("page.html")).unwrap();

        let resolver = PathResolver::new(&root).unwrap();
        let resolved = resolver.resolve_servable("/page.html").unwrap();
        assert_eq!(resolved.absolute_path, resolver.root().join("blob"));
        assert_eq!(resolved.content_type, "text/html");
        assert_eq!(resolver.resolve("/docs/").unwrap().content_type, "text/html");
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn missing_root_is_a_config_error() {
        let err = PathResolver::new("/definitely/not/here/poolhttpd").unwrap_err();
        assert!(err.is_fatal());
    }
}
