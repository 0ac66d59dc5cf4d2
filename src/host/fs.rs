//! Host store backed by a directory tree.
//!
//! ```text
//! root/
//!   main/                         tenant "main"
//!     Help/
//!       Install.md                main:Help.Install
//!       Install.meta.toml         title, language, url, viewers, fields
//!       Install.attachments/      attachment files
//!       Admin/
//!         Backup.xwiki            main:Help.Admin.Backup
//! ```
//!
//! The sidecar is optional:
//!
//! ```toml
//! title = "Installing"
//! language = "en"
//! viewers = ["alice", "bob"]   # empty or missing: everyone
//!
//! [[fields]]
//! name = "Summary"
//! value = "How to install the product."
//! ```
//!
//! All file access runs on the blocking pool.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use walkdir::WalkDir;

use llm_index_core::reference::DocumentRef;

use super::{under_any, Attachment, HostPage, HostStore, Syntax};
use crate::config::HostConfig;
use crate::extract::mimetype_for;

const PAGE_EXTENSIONS: &[&str] = &["md", "xwiki", "txt"];

#[derive(Debug, Default, Deserialize)]
struct Sidecar {
    title: Option<String>,
    language: Option<String>,
    url: Option<String>,
    #[serde(default)]
    viewers: Vec<String>,
    #[serde(default)]
    fields: Vec<Field>,
}

#[derive(Debug, Deserialize)]
struct Field {
    name: String,
    value: String,
}

#[derive(Clone)]
pub struct FsHostStore {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
}

impl FsHostStore {
    pub fn new(config: &HostConfig) -> Result<Self> {
        let mut excludes = vec!["**/.git/**".to_string()];
        excludes.extend(config.exclude_globs.iter().cloned());
        Ok(Self {
            root: config.root.clone(),
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
        })
    }

    fn tenant_dir(&self, tenant: &str) -> PathBuf {
        self.root.join(tenant)
    }

    fn accepts(&self, relative: &str) -> bool {
        self.include.is_match(relative) && !self.exclude.is_match(relative)
    }

    /// Runs `f` against a copy of the store on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&FsHostStore) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store)).await?
    }

    /// Pages of a tenant under any of `prefixes`, sorted by path.
    fn list_under(&self, tenant: &str, prefixes: &[String]) -> Result<Vec<DocumentRef>> {
        let dir = self.tenant_dir(tenant);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut docs = Vec::new();
        let walker = WalkDir::new(&dir).into_iter().filter_entry(|e| {
            !(e.file_type().is_dir() && e.file_name().to_string_lossy().ends_with(".attachments"))
        });
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&dir).unwrap_or(entry.path());
            let rel_str = relative.to_string_lossy().replace('\\', "/");
            if !self.accepts(&rel_str) {
                continue;
            }
            match page_path(relative) {
                Some(path) if under_any(&path, prefixes) => {
                    docs.push(DocumentRef::new(tenant, path));
                }
                _ => {}
            }
        }
        docs.sort();
        docs.dedup();
        Ok(docs)
    }

    fn viewable_by(&self, principal: &str, doc: &DocumentRef) -> Result<bool> {
        let Some((file, _)) = self.locate(doc) else {
            return Ok(true);
        };
        let sidecar = read_sidecar(&file)?;
        Ok(sidecar.viewers.is_empty() || sidecar.viewers.iter().any(|v| v == principal))
    }

    /// The page file of `doc`, trying each known extension.
    fn locate(&self, doc: &DocumentRef) -> Option<(PathBuf, Syntax)> {
        let mut base = self.tenant_dir(&doc.tenant);
        for segment in doc.path.split('.') {
            base.push(segment);
        }
        for ext in PAGE_EXTENSIONS {
            let candidate = base.with_extension(ext);
            let Ok(relative) = candidate.strip_prefix(self.tenant_dir(&doc.tenant)) else {
                continue;
            };
            if candidate.is_file() && self.accepts(&relative.to_string_lossy().replace('\\', "/")) {
                return Some((candidate, syntax_for(ext)));
            }
        }
        None
    }

    fn read_page(&self, doc: &DocumentRef) -> Result<Option<HostPage>> {
        let Some((file, syntax)) = self.locate(doc) else {
            return Ok(None);
        };
        let body = std::fs::read_to_string(&file)
            .with_context(|| format!("Failed to read page {}", file.display()))?;
        let sidecar = read_sidecar(&file)?;

        let title = sidecar
            .title
            .clone()
            .or_else(|| first_heading(&body, syntax))
            .unwrap_or_else(|| doc.page_name().to_string());
        let metadata = sidecar
            .fields
            .into_iter()
            .map(|f| (f.name, f.value))
            .collect();

        Ok(Some(HostPage {
            title,
            body,
            syntax,
            language: sidecar.language.or_else(|| doc.locale.clone()),
            url: sidecar
                .url
                .or_else(|| Some(format!("file://{}", file.display()))),
            metadata,
            attachments: read_attachments(&file)?,
        }))
    }
}

#[async_trait]
impl HostStore for FsHostStore {
    async fn get_page(&self, doc: &DocumentRef) -> llm_index_core::Result<Option<HostPage>> {
        let doc = doc.clone();
        Ok(self.blocking(move |store| store.read_page(&doc)).await?)
    }

    async fn enumerate_under_prefixes(
        &self,
        tenant: &str,
        prefixes: &[String],
        offset: usize,
        limit: Option<usize>,
    ) -> llm_index_core::Result<Vec<DocumentRef>> {
        let (tenant, prefixes) = (tenant.to_string(), prefixes.to_vec());
        let docs = self
            .blocking(move |store| store.list_under(&tenant, &prefixes))
            .await?
            .into_iter()
            .skip(offset);
        Ok(match limit {
            Some(limit) => docs.take(limit).collect(),
            None => docs.collect(),
        })
    }

    async fn count_under_prefixes(
        &self,
        tenant: &str,
        prefixes: &[String],
    ) -> llm_index_core::Result<usize> {
        let (tenant, prefixes) = (tenant.to_string(), prefixes.to_vec());
        Ok(self
            .blocking(move |store| store.list_under(&tenant, &prefixes))
            .await?
            .len())
    }

    async fn can_view(
        &self,
        principal: Option<&str>,
        doc: &DocumentRef,
    ) -> llm_index_core::Result<bool> {
        let Some(principal) = principal else {
            return Ok(true);
        };
        let (principal, doc) = (principal.to_string(), doc.clone());
        Ok(self
            .blocking(move |store| store.viewable_by(&principal, &doc))
            .await?)
    }
}

/// `Space/Sub/Page.md` → `Space.Sub.Page`.
fn page_path(relative: &Path) -> Option<String> {
    let ext = relative.extension()?.to_str()?;
    if !PAGE_EXTENSIONS.contains(&ext) {
        return None;
    }
    let stem = relative.with_extension("");
    let segments: Vec<String> = stem
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if segments.is_empty() || segments.iter().any(|s| s.is_empty() || s.contains('.')) {
        return None;
    }
    Some(segments.join("."))
}

fn syntax_for(ext: &str) -> Syntax {
    match ext {
        "md" => Syntax::Markdown,
        "xwiki" => Syntax::XWiki,
        _ => Syntax::Plain,
    }
}

fn first_heading(body: &str, syntax: Syntax) -> Option<String> {
    body.lines().map(str::trim).find_map(|line| match syntax {
        Syntax::XWiki => line
            .strip_prefix("= ")
            .and_then(|rest| rest.strip_suffix(" ="))
            .map(|t| t.trim().to_string()),
        Syntax::Markdown | Syntax::Plain => line.strip_prefix("# ").map(|t| t.trim().to_string()),
    })
}

fn sibling(file: &Path, suffix: &str) -> PathBuf {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    file.with_file_name(format!("{}{}", stem, suffix))
}

fn read_sidecar(file: &Path) -> Result<Sidecar> {
    let path = sibling(file, ".meta.toml");
    if !path.is_file() {
        return Ok(Sidecar::default());
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Invalid metadata sidecar {}", path.display()))
}

fn read_attachments(file: &Path) -> Result<Vec<Attachment>> {
    let dir = sibling(file, ".attachments");
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut attachments = Vec::new();
    for entry in WalkDir::new(&dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let filename = entry.file_name().to_string_lossy().to_string();
        let bytes = std::fs::read(entry.path())
            .with_context(|| format!("Failed to read attachment {}", entry.path().display()))?;
        attachments.push(Attachment {
            mimetype: mimetype_for(&filename).to_string(),
            filename,
            bytes,
        });
    }
    Ok(attachments)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn store(root: &Path) -> FsHostStore {
        FsHostStore::new(&HostConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.md".into(), "**/*.xwiki".into(), "**/*.txt".into()],
            exclude_globs: vec!["**/drafts/**".into()],
        })
        .unwrap()
    }

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_page_path() {
        assert_eq!(page_path(Path::new("Help/Admin/Backup.md")).unwrap(), "Help.Admin.Backup");
        assert_eq!(page_path(Path::new("Top.txt")).unwrap(), "Top");
        assert!(page_path(Path::new("Help/image.png")).is_none());
        assert!(page_path(Path::new("Help/v1.2.md")).is_none());
    }

    #[tokio::test]
    async fn test_enumerate_and_read() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "main/Help/Install.md", "# Installing\n\nRun the installer.");
        write(
            root,
            "main/Help/Install.meta.toml",
            "language = \"en\"\n[[fields]]\nname = \"Summary\"\nvalue = \"Setup steps\"\n",
        );
        write(root, "main/Help/Install.attachments/notes.txt", "attached notes");
        write(root, "main/Help/Admin/Backup.xwiki", "= Backups =\n\nNightly.");
        write(root, "main/Help/drafts/Wip.md", "wip");
        write(root, "main/Other/Page.md", "other");
        write(root, "dev/Help/Guide.md", "dev guide");

        let host = store(root);
        let prefixes = vec!["Help".to_string()];
        let docs = host.enumerate_under_prefixes("main", &prefixes, 0, None).await.unwrap();
        let ids: Vec<String> = docs.iter().map(|d| d.to_string()).collect();
        assert_eq!(ids, vec!["main:Help.Admin.Backup", "main:Help.Install"]);
        assert_eq!(host.count_under_prefixes("dev", &prefixes).await.unwrap(), 1);
        assert_eq!(host.count_under_prefixes("nobody", &prefixes).await.unwrap(), 0);

        let page = host
            .get_page(&DocumentRef::new("main", "Help.Install"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.title, "Installing");
        assert_eq!(page.syntax, Syntax::Markdown);
        assert_eq!(page.language.as_deref(), Some("en"));
        assert_eq!(page.metadata, vec![("Summary".to_string(), "Setup steps".to_string())]);
        assert_eq!(page.attachments.len(), 1);
        assert_eq!(page.attachments[0].mimetype, "text/plain");

        let wiki = host
            .get_page(&DocumentRef::new("main", "Help.Admin.Backup"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(wiki.title, "Backups");
        assert_eq!(wiki.syntax, Syntax::XWiki);

        assert!(host
            .get_page(&DocumentRef::new("main", "Help.Missing"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_enumerate_pages_through_scope() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["A", "B", "C"] {
            write(tmp.path(), &format!("main/Help/{}.md", name), "body");
        }
        write(tmp.path(), "main/Helpdesk/Queue.md", "not under Help");
        let host = store(tmp.path());
        let prefixes = vec!["Help".to_string()];

        let first = host.enumerate_under_prefixes("main", &prefixes, 0, Some(2)).await.unwrap();
        let rest = host.enumerate_under_prefixes("main", &prefixes, 2, Some(2)).await.unwrap();
        let paths: Vec<&str> = first.iter().chain(&rest).map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["Help.A", "Help.B", "Help.C"]);
        assert_eq!(host.count_under_prefixes("main", &prefixes).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_viewers() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "main/Secret/Plan.md", "plan");
        write(tmp.path(), "main/Secret/Plan.meta.toml", "viewers = [\"alice\"]\n");
        let host = store(tmp.path());
        let doc = DocumentRef::new("main", "Secret.Plan");
        assert!(host.can_view(Some("alice"), &doc).await.unwrap());
        assert!(!host.can_view(Some("bob"), &doc).await.unwrap());
        assert!(host.can_view(None, &doc).await.unwrap());
    }
}
