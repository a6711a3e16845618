use async_trait::async_trait;
use log::{ debug, info };
use std::collections::HashMap;
use std::sync::atomic::{ AtomicU64, Ordering };
use tokio::sync::Mutex;

use crate::models::document::{ DocumentId, GeneratedDocument };
use crate::studio::DocumentSink;

#[derive(Default)]
struct Documents {
    by_id: HashMap<DocumentId, GeneratedDocument>,
    order: Vec<DocumentId>,
}

/// Every document created during a session, keyed by id.
pub struct DocumentRegistry {
    documents: Mutex<Documents>,
    next_seq: AtomicU64,
}

impl Default for DocumentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(Documents::default()),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Ids are never reused, not even after `clear`.
    pub fn allocate_id(&self) -> DocumentId {
        DocumentId::from_sequence(self.next_seq.fetch_add(1, Ordering::Relaxed))
    }

    pub async fn create(&self, title: impl Into<String>) -> GeneratedDocument {
        let doc = GeneratedDocument::new(self.allocate_id(), title);
        info!("Created document {} ('{}')", doc.id, doc.title);
        self.insert(doc.clone()).await;
        doc
    }

    pub async fn insert(&self, doc: GeneratedDocument) {
        let mut docs = self.documents.lock().await;
        if !docs.by_id.contains_key(&doc.id) {
            docs.order.push(doc.id.clone());
        }
        docs.by_id.insert(doc.id.clone(), doc);
    }

    pub async fn get(&self, id: &DocumentId) -> Option<GeneratedDocument> {
        self.documents.lock().await.by_id.get(id).cloned()
    }

    pub async fn contains(&self, id: &DocumentId) -> bool {
        self.documents.lock().await.by_id.contains_key(id)
    }

    /// Applies `f` to the stored document. Returns false when the id is unknown.
    pub async fn update<F>(&self, id: &DocumentId, f: F) -> bool
        where F: FnOnce(&mut GeneratedDocument)
    {
        match self.documents.lock().await.by_id.get_mut(id) {
            Some(doc) => {
                f(doc);
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, id: &DocumentId) -> Option<GeneratedDocument> {
        let mut docs = self.documents.lock().await;
        docs.order.retain(|existing| existing != id);
        docs.by_id.remove(id)
    }

    /// Documents in creation order.
    pub async fn list(&self) -> Vec<GeneratedDocument> {
        let docs = self.documents.lock().await;
        docs.order
            .iter()
            .filter_map(|id| docs.by_id.get(id).cloned())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.documents.lock().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        let mut docs = self.documents.lock().await;
        info!("Clearing document registry ({} documents)", docs.by_id.len());
        docs.by_id.clear();
        docs.order.clear();
    }
}

#[async_trait]
impl DocumentSink for DocumentRegistry {
    async fn content_updated(&self, id: &DocumentId, content: &str) {
        let applied = self.update(id, |doc| {
            doc.content = content.to_string();
        }).await;
        if !applied {
            debug!("Content update for unknown document {} ignored", id);
        }
    }

    async fn generation_completed(&self, id: &DocumentId, markup: &str) {
        let applied = self.update(id, |doc| {
            doc.generated_html = markup.to_string();
        }).await;
        if !applied {
            debug!("Markup for unknown document {} ignored", id);
        }
    }
}
