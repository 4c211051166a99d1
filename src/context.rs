//! Unpack contexts and the tree they form.
//!
//! A context is created for every archive selected for unpacking. Contexts
//! found inside another archive point back at it through a [`ContextId`]
//! into the owning [`UnpackTree`]; the back-reference only feeds the
//! human-readable lineage label.

use std::fmt;
use std::io;
use std::ops::Index;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::classify::{Classification, FileKind};
use crate::lineage;

/// Index of a context inside its [`UnpackTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(usize);

impl ContextId {
    pub const ROOT: ContextId = ContextId(0);
}

/// Unpack state of a single archive.
#[derive(Debug, Clone)]
pub struct UnpackContext {
    pub classification: Classification,
    /// Scratch root the context's directory is created in.
    pub enclosing_dir: PathBuf,
    /// Directory this context created and owns, once unpacked.
    pub unpacked_dir: Option<PathBuf>,
    pub parent: Option<ContextId>,
}

impl UnpackContext {
    pub fn new(classification: Classification, enclosing_dir: impl Into<PathBuf>, parent: Option<ContextId>) -> Self {
        Self {
            classification,
            enclosing_dir: enclosing_dir.into(),
            unpacked_dir: None,
            parent,
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.classification.path
    }

    pub fn kind(&self) -> FileKind {
        self.classification.kind
    }

    /// Where the unpacked contents can be read from.
    ///
    /// Directories are used in place, everything else only has contents once
    /// its scratch directory exists.
    pub fn contents_dir(&self) -> Option<&Path> {
        match self.classification.kind {
            FileKind::Dir => Some(self.source_path()),
            _ => self.unpacked_dir.as_deref(),
        }
    }

    /// Create this context's scratch directory.
    ///
    /// `lineage_root` is the classification of the originally requested file
    /// for contexts discovered inside it.
    pub fn create_temp_dir(&mut self, lineage_root: Option<&Classification>) -> io::Result<&Path> {
        let dir = lineage::make_temp_dir(&self.classification, lineage_root, &self.enclosing_dir)?;
        Ok(self.unpacked_dir.insert(dir).as_path())
    }

    /// Remove the scratch directory, if there is one.
    ///
    /// A directory that is already gone counts as removed. Anything without
    /// the scratch marker in its name is left alone.
    pub fn cleanup_tmp(&mut self) -> io::Result<()> {
        let Some(dir) = self.unpacked_dir.as_deref() else {
            return Ok(());
        };

        if !lineage::is_scratch_dir(dir) {
            warn!("Refusing to remove {}, it was not created by the unpacker", dir.display());
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a scratch directory", dir.display()),
            ));
        }

        debug!("Removing {}", dir.display());
        match std::fs::remove_dir_all(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        self.unpacked_dir = None;
        Ok(())
    }
}

/// Every context produced by one unpack run, the requested file first.
#[derive(Debug, Clone)]
pub struct UnpackTree {
    contexts: Vec<UnpackContext>,
}

impl UnpackTree {
    pub fn new(root: UnpackContext) -> Self {
        Self { contexts: vec![root] }
    }

    /// Add a context discovered while walking another one.
    pub fn push(&mut self, context: UnpackContext) -> ContextId {
        self.contexts.push(context);
        ContextId(self.contexts.len() - 1)
    }

    pub fn root(&self) -> &UnpackContext {
        &self.contexts[0]
    }

    /// Number of contexts, the root included, so never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ContextId, &UnpackContext)> {
        self.contexts.iter().enumerate().map(|(i, c)| (ContextId(i), c))
    }

    /// Human-readable name of a context, e.g. `outer.iso::/a/inner.tar`.
    pub fn lineage_label(&self, id: ContextId) -> String {
        let context = &self[id];
        let Some(parent_id) = context.parent else {
            return context.classification.file_name();
        };

        let parent = &self[parent_id];
        let path = context.source_path().to_string_lossy();
        let relative = parent
            .contents_dir()
            .map(|dir| dir.to_string_lossy())
            .and_then(|dir| path.strip_prefix(&*dir).map(str::to_owned))
            .unwrap_or_else(|| path.to_string());

        format!("{}::{relative}", self.lineage_label(parent_id))
    }

    /// Replace the context's scratch directory in `message` with its label.
    pub fn redact_temp_path(&self, id: ContextId, message: &str) -> String {
        match &self[id].unpacked_dir {
            Some(dir) => message.replace(&*dir.to_string_lossy(), &self.lineage_label(id)),
            None => message.to_string(),
        }
    }
}

impl Index<ContextId> for UnpackTree {
    type Output = UnpackContext;

    fn index(&self, id: ContextId) -> &UnpackContext {
        &self.contexts[id.0]
    }
}

impl fmt::Display for UnpackTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, context) in self.iter() {
            match context.contents_dir() {
                Some(dir) => writeln!(f, "{} -> {}", self.lineage_label(id), dir.display())?,
                None => writeln!(f, "{} -> Not unpacked", self.lineage_label(id))?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(path: &str, kind: FileKind, unpacked: Option<&str>, parent: Option<ContextId>) -> UnpackContext {
        let mut c = UnpackContext::new(Classification::new(path, kind, "test", 1), "/tmp", parent);
        c.unpacked_dir = unpacked.map(PathBuf::from);
        c
    }

    fn three_levels() -> (UnpackTree, ContextId, ContextId) {
        let mut tree = UnpackTree::new(ctx(
            "/data/outer.iso",
            FileKind::Iso,
            Some("/tmp/clam_unpacker_iso_outer.iso_aaaaaaaa"),
            None,
        ));
        let child = tree.push(ctx(
            "/tmp/clam_unpacker_iso_outer.iso_aaaaaaaa/a/inner.tar",
            FileKind::Tar,
            Some("/tmp/clam_unpacker_tar-p_outer.iso_p-inner.tar_bbbbbbbb"),
            Some(ContextId::ROOT),
        ));
        let grandchild = tree.push(ctx(
            "/tmp/clam_unpacker_tar-p_outer.iso_p-inner.tar_bbbbbbbb/x.zip",
            FileKind::Zip,
            Some("/tmp/clam_unpacker_zip-p_outer.iso_p-x.zip_cccccccc"),
            Some(child),
        ));
        (tree, child, grandchild)
    }

    #[test]
    fn labels_follow_the_lineage() {
        let (tree, child, grandchild) = three_levels();
        assert_eq!(tree.lineage_label(ContextId::ROOT), "outer.iso");
        assert_eq!(tree.lineage_label(child), "outer.iso::/a/inner.tar");
        assert_eq!(tree.lineage_label(grandchild), "outer.iso::/a/inner.tar::/x.zip");
    }

    #[test]
    fn redacts_scratch_paths() {
        let (tree, _, grandchild) = three_levels();
        let output = "/tmp/clam_unpacker_zip-p_outer.iso_p-x.zip_cccccccc/evil.exe: Eicar FOUND\n\
                      /tmp/clam_unpacker_zip-p_outer.iso_p-x.zip_cccccccc/other.exe: Eicar FOUND";

        let redacted = tree.redact_temp_path(grandchild, output);
        assert_eq!(
            redacted,
            "outer.iso::/a/inner.tar::/x.zip/evil.exe: Eicar FOUND\n\
             outer.iso::/a/inner.tar::/x.zip/other.exe: Eicar FOUND"
        );
    }

    #[test]
    fn children_of_directories_are_relative_to_the_directory() {
        let mut tree = UnpackTree::new(ctx("/srv/share", FileKind::Dir, None, None));
        let child = tree.push(ctx("/srv/share/b/img.iso", FileKind::Iso, None, Some(ContextId::ROOT)));
        assert_eq!(tree.lineage_label(child), "share::/b/img.iso");
        assert_eq!(tree.to_string(), "share -> /srv/share\nshare::/b/img.iso -> Not unpacked\n");
    }

    #[test]
    fn cleanup_tmp_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let mut c = UnpackContext::new(
            Classification::new("/data/a.tar", FileKind::Tar, "test", 1),
            root.path(),
            None,
        );
        let dir = c.create_temp_dir(None).unwrap().to_path_buf();
        std::fs::write(dir.join("payload"), b"x").unwrap();

        c.cleanup_tmp().unwrap();
        assert!(!dir.exists());
        assert!(c.unpacked_dir.is_none());
        c.cleanup_tmp().unwrap();
    }

    #[test]
    fn cleanup_tmp_tolerates_vanished_directory() {
        let root = tempfile::tempdir().unwrap();
        let mut c = UnpackContext::new(
            Classification::new("/data/a.zip", FileKind::Zip, "test", 1),
            root.path(),
            None,
        );
        let dir = c.create_temp_dir(None).unwrap().to_path_buf();
        std::fs::remove_dir(&dir).unwrap();

        c.cleanup_tmp().unwrap();
        assert!(c.unpacked_dir.is_none());
    }

    #[test]
    fn never_removes_foreign_directories() {
        let root = tempfile::tempdir().unwrap();
        let precious = root.path().join("precious");
        std::fs::create_dir(&precious).unwrap();

        let mut c = ctx("/data/a.tar", FileKind::Tar, None, None);
        c.unpacked_dir = Some(precious.clone());
        assert!(c.cleanup_tmp().is_err());
        assert!(precious.exists());

        let mut dir_ctx = ctx(root.path().to_str().unwrap(), FileKind::Dir, None, None);
        dir_ctx.cleanup_tmp().unwrap();
        assert!(root.path().exists());
    }
}
