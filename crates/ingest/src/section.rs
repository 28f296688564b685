use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A document as supplied by the document source: already-converted text
/// plus a filename. Content is immutable after creation; derived metadata
/// (entity counts, completion time) is attached to the graph node later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub project_id: String,
    pub filename: String,
    pub content_hash: String,
}

impl Document {
    pub fn new(project_id: &str, filename: &str, content: &str) -> Self {
        let content_hash = hash_hex(content.as_bytes());
        // Document ID is derived from content, so re-uploading the same
        // file lands on the same graph node.
        let id = content_hash[..32].to_string();

        Self {
            id,
            project_id: project_id.to_string(),
            filename: filename.to_string(),
            content_hash,
        }
    }
}

/// One titled section of a document. Sections form a tree: the parent of a
/// section always appears earlier in traversal order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub section_id: String,
    pub title: String,
    pub heading_level: u8,
    pub content: String,
    pub parent_section_id: Option<String>,
    pub child_ids: Vec<String>,
}

impl Section {
    pub fn new(doc_id: &str, ordinal: usize, title: &str, heading_level: u8) -> Self {
        Self {
            section_id: generate_section_id(doc_id, ordinal, title),
            title: title.to_string(),
            heading_level,
            content: String::new(),
            parent_section_id: None,
            child_ids: Vec::new(),
        }
    }

    /// Path used as extraction provenance, e.g. "Protection > Relays".
    pub fn path(&self, sections: &[Section]) -> String {
        let mut parts = vec![self.title.clone()];
        let mut parent = self.parent_section_id.clone();

        while let Some(pid) = parent {
            match sections.iter().find(|s| s.section_id == pid) {
                Some(p) => {
                    parts.push(p.title.clone());
                    parent = p.parent_section_id.clone();
                }
                None => break,
            }
        }

        parts.reverse();
        parts.join(" > ")
    }
}

/// Stable ID independent of title text alone: the ordinal disambiguates
/// repeated titles, the doc ID scopes it globally.
fn generate_section_id(doc_id: &str, ordinal: usize, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(doc_id.as_bytes());
    hasher.update(ordinal.to_string().as_bytes());
    hasher.update(title.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

fn hash_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_is_content_derived() {
        let a = Document::new("proj", "a.md", "same text");
        let b = Document::new("proj", "b.md", "same text");
        let c = Document::new("proj", "a.md", "other text");

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_repeated_titles_get_distinct_ids() {
        let s1 = Section::new("doc", 1, "Overview", 2);
        let s2 = Section::new("doc", 7, "Overview", 2);

        assert_ne!(s1.section_id, s2.section_id);
    }

    #[test]
    fn test_section_path_walks_ancestors() {
        let mut root = Section::new("doc", 0, "Protection", 1);
        let mut child = Section::new("doc", 1, "Relays", 2);
        child.parent_section_id = Some(root.section_id.clone());
        root.child_ids.push(child.section_id.clone());

        let sections = vec![root, child.clone()];
        assert_eq!(child.path(&sections), "Protection > Relays");
    }
}
