//! The host document store that mirrored collections observe.
//!
//! The host owns pages organized in dotted spaces per tenant. The indexer
//! never writes to it; it only reads page content, walks spaces and asks
//! whether a principal may see a page.
//!
//! # Implementations
//!
//! | Type | Backing |
//! |------|---------|
//! | [`memory::InMemoryHost`] | A map, for tests and embedding |
//! | [`fs::FsHostStore`] | A directory tree: `root/<tenant>/<Space>/<Page>.md` |

pub mod fs;
pub mod memory;

use async_trait::async_trait;

use llm_index_core::reference::DocumentRef;
use llm_index_core::Result;

/// Markup of a page body, which decides heading syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Syntax {
    /// `= Title =` headings.
    XWiki,
    Markdown,
    #[default]
    Plain,
}

impl Syntax {
    /// A heading of `level` (1-based) in this syntax.
    pub fn heading(&self, level: usize, title: &str) -> String {
        let level = level.max(1);
        match self {
            Syntax::XWiki => {
                let marks = "=".repeat(level);
                format!("{} {} {}", marks, title, marks)
            }
            Syntax::Markdown | Syntax::Plain => format!("{} {}", "#".repeat(level), title),
        }
    }

    pub fn mimetype(&self) -> &'static str {
        match self {
            Syntax::XWiki => "text/x-xwiki",
            Syntax::Markdown => "text/markdown",
            Syntax::Plain => "text/plain",
        }
    }
}

/// A file attached to a host page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    /// Guessed from the file extension.
    pub mimetype: String,
    /// Raw content, extracted to text at indexing time.
    pub bytes: Vec<u8>,
}

/// Everything the indexer reads from one host page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostPage {
    pub title: String,
    /// Page source in `syntax`.
    pub body: String,
    pub syntax: Syntax,
    /// Language tag, when the page declares one.
    pub language: Option<String>,
    /// Where readers can open the page.
    pub url: Option<String>,
    /// Named metadata fields in display order.
    pub metadata: Vec<(String, String)>,
    pub attachments: Vec<Attachment>,
}

#[async_trait]
pub trait HostStore: Send + Sync {
    /// The page, or `None` when it doesn't exist.
    async fn get_page(&self, doc: &DocumentRef) -> Result<Option<HostPage>>;

    /// Pages of `tenant` below any of `prefixes`, in a stable sorted order.
    ///
    /// Overlapping prefixes never yield a page twice. `limit = None` is
    /// unbounded.
    async fn enumerate_under_prefixes(
        &self,
        tenant: &str,
        prefixes: &[String],
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<DocumentRef>>;

    async fn count_under_prefixes(&self, tenant: &str, prefixes: &[String]) -> Result<usize>;

    /// Whether `principal` may read `doc`. `None` is the system context.
    async fn can_view(&self, principal: Option<&str>, doc: &DocumentRef) -> Result<bool>;
}

/// True when `path` lies below at least one of `prefixes`.
pub(crate) fn under_any(path: &str, prefixes: &[String]) -> bool {
    prefixes
        .iter()
        .any(|p| llm_index_core::reference::path_under(path, p.trim_end_matches('.')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headings() {
        assert_eq!(Syntax::XWiki.heading(1, "Title"), "= Title =");
        assert_eq!(Syntax::XWiki.heading(2, "Summary"), "== Summary ==");
        assert_eq!(Syntax::Markdown.heading(2, "Summary"), "## Summary");
        assert_eq!(Syntax::Plain.heading(0, "T"), "# T");
    }

    #[test]
    fn test_under_any() {
        let prefixes = vec!["Space.A".to_string(), "Space.B.".to_string()];
        assert!(under_any("Space.A.Page", &prefixes));
        assert!(under_any("Space.B.Sub.Page", &prefixes));
        assert!(!under_any("Space.AB.Page", &prefixes));
        assert!(!under_any("Space.A", &prefixes));
    }
}
