//! Document collaborator.
//!
//! The authentication layer only needs a persistence service with CRUD, search,
//! category listing and version history behind it. `DocumentService` is that
//! seam; `MemoryDocumentStore` is the in-process implementation the server uses.
//! Mutation is restricted to the document's author.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::identity::ensure_author;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub author_id: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A superseded revision, captured before each update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentVersion {
    pub document_id: String,
    pub version: u32,
    pub title: String,
    pub content: String,
    pub author_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDocument {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

pub trait DocumentService: Send + Sync {
    fn create(&self, author_id: &str, new: NewDocument) -> AppResult<Document>;
    fn find(&self, id: &str) -> AppResult<Document>;
    fn update(&self, actor_id: &str, id: &str, patch: DocumentPatch) -> AppResult<Document>;
    fn delete(&self, actor_id: &str, id: &str) -> AppResult<()>;
    /// Case-insensitive match on title, content and tags.
    fn search(&self, query: &str) -> AppResult<Vec<Document>>;
    fn list_by_category(&self, category_id: &str) -> AppResult<Vec<Document>>;
    /// Oldest revision first.
    fn version_history(&self, id: &str) -> AppResult<Vec<DocumentVersion>>;
}

#[derive(Default)]
struct Shelf {
    docs: HashMap<String, Document>,
    versions: HashMap<String, Vec<DocumentVersion>>,
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    shelf: RwLock<Shelf>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self { Self::default() }
}

fn not_found(id: &str) -> AppError {
    AppError::not_found(format!("Document {} not found", id))
}

fn sorted(mut docs: Vec<Document>) -> Vec<Document> {
    docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
    docs
}

impl DocumentService for MemoryDocumentStore {
    fn create(&self, author_id: &str, new: NewDocument) -> AppResult<Document> {
        if new.title.trim().is_empty() {
            return Err(AppError::validation("title must not be empty"));
        }
        let now = Utc::now();
        let doc = Document {
            id: uuid::Uuid::new_v4().to_string(),
            title: new.title.trim().to_string(),
            content: new.content,
            category_id: new.category_id,
            tags: new.tags,
            author_id: author_id.to_string(),
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.shelf.write().docs.insert(doc.id.clone(), doc.clone());
        debug!(target: "documents", doc_id = %doc.id, author = %author_id, "document created");
        Ok(doc)
    }

    fn find(&self, id: &str) -> AppResult<Document> {
        self.shelf.read().docs.get(id).cloned().ok_or_else(|| not_found(id))
    }

    fn update(&self, actor_id: &str, id: &str, patch: DocumentPatch) -> AppResult<Document> {
        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(AppError::validation("title must not be empty"));
        }
        let mut guard = self.shelf.write();
        let shelf = &mut *guard;
        let doc = shelf.docs.get_mut(id).ok_or_else(|| not_found(id))?;
        ensure_author(actor_id, &doc.author_id)?;
        shelf.versions.entry(id.to_string()).or_default().push(DocumentVersion {
            document_id: doc.id.clone(),
            version: doc.version,
            title: doc.title.clone(),
            content: doc.content.clone(),
            author_id: doc.author_id.clone(),
            created_at: doc.updated_at,
        });
        if let Some(t) = patch.title { doc.title = t.trim().to_string(); }
        if let Some(c) = patch.content { doc.content = c; }
        if let Some(c) = patch.category_id { doc.category_id = Some(c); }
        if let Some(t) = patch.tags { doc.tags = t; }
        doc.version += 1;
        doc.updated_at = Utc::now();
        debug!(target: "documents", doc_id = %id, version = doc.version, "document updated");
        Ok(doc.clone())
    }

    fn delete(&self, actor_id: &str, id: &str) -> AppResult<()> {
        let mut shelf = self.shelf.write();
        let author = shelf.docs.get(id).map(|d| d.author_id.clone()).ok_or_else(|| not_found(id))?;
        ensure_author(actor_id, &author)?;
        shelf.docs.remove(id);
        shelf.versions.remove(id);
        debug!(target: "documents", doc_id = %id, "document deleted");
        Ok(())
    }

    fn search(&self, query: &str) -> AppResult<Vec<Document>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(AppError::validation("search query must not be empty"));
        }
        let shelf = self.shelf.read();
        let hits = shelf
            .docs
            .values()
            .filter(|d| {
                d.title.to_lowercase().contains(&needle)
                    || d.content.to_lowercase().contains(&needle)
                    || d.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();
        Ok(sorted(hits))
    }

    fn list_by_category(&self, category_id: &str) -> AppResult<Vec<Document>> {
        let shelf = self.shelf.read();
        let docs = shelf.docs.values().filter(|d| d.category_id.as_deref() == Some(category_id)).cloned().collect();
        Ok(sorted(docs))
    }

    fn version_history(&self, id: &str) -> AppResult<Vec<DocumentVersion>> {
        let shelf = self.shelf.read();
        if !shelf.docs.contains_key(id) {
            return Err(not_found(id));
        }
        Ok(shelf.versions.get(id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(title: &str) -> NewDocument {
        NewDocument {
            title: title.to_string(),
            content: "Retention policy for signed contracts".to_string(),
            category_id: Some("legal".to_string()),
            tags: vec!["Contracts".to_string()],
        }
    }

    #[test]
    fn create_and_find() {
        let s = MemoryDocumentStore::new();
        let doc = s.create("alice", draft("Retention")).unwrap();
        assert_eq!(doc.version, 1);
        assert_eq!(s.find(&doc.id).unwrap(), doc);
        assert!(matches!(s.find("missing"), Err(AppError::NotFound { .. })));
        assert!(matches!(s.create("alice", draft("  ")), Err(AppError::Validation { .. })));
    }

    #[test]
    fn only_author_may_update_or_delete() {
        let s = MemoryDocumentStore::new();
        let doc = s.create("alice", draft("Retention")).unwrap();
        let patch = DocumentPatch { content: Some("rewritten".into()), ..Default::default() };
        let err = s.update("bob", &doc.id, patch.clone()).unwrap_err();
        assert_eq!(err.http_status(), 403);
        assert!(matches!(s.delete("bob", &doc.id), Err(AppError::PermissionDenied { .. })));
        assert_eq!(s.find(&doc.id).unwrap().content, doc.content);

        s.update("alice", &doc.id, patch).unwrap();
        s.delete("alice", &doc.id).unwrap();
        assert!(matches!(s.find(&doc.id), Err(AppError::NotFound { .. })));
    }

    #[test]
    fn updates_keep_history() {
        let s = MemoryDocumentStore::new();
        let doc = s.create("alice", draft("v1 title")).unwrap();
        s.update("alice", &doc.id, DocumentPatch { title: Some("v2 title".into()), ..Default::default() }).unwrap();
        let cur = s.update("alice", &doc.id, DocumentPatch { title: Some("v3 title".into()), ..Default::default() }).unwrap();
        assert_eq!(cur.version, 3);
        let hist = s.version_history(&doc.id).unwrap();
        let titles: Vec<_> = hist.iter().map(|v| (v.version, v.title.as_str())).collect();
        assert_eq!(titles, vec![(1, "v1 title"), (2, "v2 title")]);
    }

    #[test]
    fn search_and_category_listing() {
        let s = MemoryDocumentStore::new();
        let a = s.create("alice", draft("Retention")).unwrap();
        let mut other = draft("Onboarding");
        other.content = "Laptop setup".into();
        other.category_id = Some("it".into());
        other.tags = vec![];
        s.create("bob", other).unwrap();

        let hits = s.search("CONTRACTS").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, a.id);
        assert!(s.search("nothing-matches").unwrap().is_empty());
        assert!(s.search(" ").is_err());

        assert_eq!(s.list_by_category("it").unwrap().len(), 1);
        assert!(s.list_by_category("hr").unwrap().is_empty());
    }
}
