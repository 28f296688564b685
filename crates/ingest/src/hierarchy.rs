use std::collections::{HashMap, HashSet};

use crate::section::Section;

/// Builds the section tree for a document from markdown-style headings.
pub struct HierarchyExtractor;

impl HierarchyExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Split `text` into titled sections linked parent -> child via a
    /// level-aware stack. A heading's parent is the nearest preceding
    /// heading with a strictly smaller level. Sections whose content is
    /// empty after trimming are discarded. If the document has no headings
    /// at all, the whole text becomes one "Introduction" root.
    pub fn extract(&self, doc_id: &str, text: &str) -> Vec<Section> {
        let mut sections: Vec<Section> = Vec::new();
        // Stack of (heading_level, index into sections).
        let mut stack: Vec<(u8, usize)> = Vec::new();
        let mut ordinal = 0usize;
        let mut preamble = String::new();
        let mut saw_heading = false;

        for line in text.lines() {
            match parse_heading(line) {
                Some((level, title)) => {
                    saw_heading = true;

                    // Pop entries at the same or deeper level; the
                    // remaining top is this section's parent.
                    while let Some(&(top_level, _)) = stack.last() {
                        if top_level >= level {
                            stack.pop();
                        } else {
                            break;
                        }
                    }

                    let mut section = Section::new(doc_id, ordinal, &title, level);
                    ordinal += 1;

                    if let Some(&(_, parent_idx)) = stack.last() {
                        let parent_id = sections[parent_idx].section_id.clone();
                        section.parent_section_id = Some(parent_id);
                        let child_id = section.section_id.clone();
                        sections[parent_idx].child_ids.push(child_id);
                    }

                    sections.push(section);
                    stack.push((level, sections.len() - 1));
                }
                None => {
                    if let Some(&(_, idx)) = stack.last() {
                        sections[idx].content.push_str(line);
                        sections[idx].content.push('\n');
                    } else {
                        // Text before the first heading.
                        preamble.push_str(line);
                        preamble.push('\n');
                    }
                }
            }
        }

        if !saw_heading {
            let mut root = Section::new(doc_id, 0, "Introduction", 1);
            root.content = text.to_string();
            return if root.content.trim().is_empty() {
                Vec::new()
            } else {
                vec![root]
            };
        }

        // Preamble ahead of the first heading becomes an implicit
        // introduction section so its text is not lost.
        if !preamble.trim().is_empty() {
            let mut intro = Section::new(doc_id, ordinal, "Introduction", 1);
            intro.content = preamble;
            sections.insert(0, intro);
        }

        self.prune_empty(sections)
    }

    /// Drop every section with no content, re-linking children of a
    /// dropped section to its nearest surviving ancestor so the tree
    /// stays intact.
    fn prune_empty(&self, sections: Vec<Section>) -> Vec<Section> {
        let dropped: HashSet<String> = sections
            .iter()
            .filter(|s| s.content.trim().is_empty())
            .map(|s| s.section_id.clone())
            .collect();
        if dropped.is_empty() {
            return sections;
        }

        let parents: HashMap<String, Option<String>> = sections
            .iter()
            .map(|s| (s.section_id.clone(), s.parent_section_id.clone()))
            .collect();

        // Nearest ancestor that survives the prune, walking over any
        // chain of dropped headings.
        let surviving_ancestor = |mut parent: Option<String>| -> Option<String> {
            while let Some(pid) = parent {
                if !dropped.contains(&pid) {
                    return Some(pid);
                }
                parent = parents.get(&pid).cloned().flatten();
            }
            None
        };

        let mut kept: Vec<Section> = sections
            .into_iter()
            .filter(|s| !dropped.contains(&s.section_id))
            .collect();

        for section in &mut kept {
            section.parent_section_id = surviving_ancestor(section.parent_section_id.take());
            section.child_ids.clear();
        }

        // Rebuild child links from the surviving parent pointers.
        let links: Vec<(String, String)> = kept
            .iter()
            .filter_map(|s| {
                s.parent_section_id
                    .clone()
                    .map(|parent_id| (parent_id, s.section_id.clone()))
            })
            .collect();
        for (parent_id, child_id) in links {
            if let Some(parent) = kept.iter_mut().find(|s| s.section_id == parent_id) {
                parent.child_ids.push(child_id);
            }
        }

        kept
    }
}

/// Parse a markdown ATX heading: 1-6 '#' characters followed by a space
/// and a non-empty title.
fn parse_heading(line: &str) -> Option<(u8, String)> {
    let trimmed = line.trim_start();
    if !trimmed.starts_with('#') {
        return None;
    }

    let level = trimmed.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }

    let rest = &trimmed[level..];
    if !rest.starts_with(' ') && !rest.is_empty() {
        return None;
    }

    let title = rest.trim().trim_end_matches('#').trim();
    if title.is_empty() {
        return None;
    }

    Some((level as u8, title.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn extract(text: &str) -> Vec<Section> {
        HierarchyExtractor::new().extract("doc-1", text)
    }

    #[test]
    fn test_no_headings_yields_introduction_root() {
        let sections = extract("Just some plain text.\nNo headings here.");

        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title, "Introduction");
        assert_eq!(sections[0].heading_level, 1);
        assert!(sections[0].parent_section_id.is_none());
    }

    #[test]
    fn test_level_stack_builds_parent_links() {
        let text = "# Substation\ntop text\n## Transformers\ntr text\n### Cooling\ncool text\n## Breakers\nbr text\n";
        let sections = extract(text);

        assert_eq!(sections.len(), 4);

        let substation = &sections[0];
        let transformers = &sections[1];
        let cooling = &sections[2];
        let breakers = &sections[3];

        assert!(substation.parent_section_id.is_none());
        assert_eq!(
            transformers.parent_section_id.as_deref(),
            Some(substation.section_id.as_str())
        );
        assert_eq!(
            cooling.parent_section_id.as_deref(),
            Some(transformers.section_id.as_str())
        );
        // "## Breakers" pops "### Cooling" and "## Transformers".
        assert_eq!(
            breakers.parent_section_id.as_deref(),
            Some(substation.section_id.as_str())
        );
    }

    #[test]
    fn test_empty_sections_are_discarded() {
        let text = "# Kept\nbody\n## Empty\n\n\n## Also Kept\nmore body\n";
        let sections = extract(text);

        assert_eq!(sections.len(), 2);
        assert!(sections.iter().all(|s| s.title != "Empty"));
    }

    #[test]
    fn test_empty_parent_heading_is_dropped_and_child_promoted() {
        let sections = extract("# Chapter\n## Detail\nbody\n");

        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title, "Detail");
        assert!(sections[0].parent_section_id.is_none());
        assert!(!sections[0].content.trim().is_empty());
    }

    #[test]
    fn test_reparenting_walks_over_chains_of_empty_headings() {
        let text = "# Root\nroot body\n## Empty Mid\n### Leaf\nleaf body\n";
        let sections = extract(text);

        assert_eq!(sections.len(), 2);
        let root = sections.iter().find(|s| s.title == "Root").unwrap();
        let leaf = sections.iter().find(|s| s.title == "Leaf").unwrap();
        assert_eq!(
            leaf.parent_section_id.as_deref(),
            Some(root.section_id.as_str())
        );
        assert!(root.child_ids.contains(&leaf.section_id));
    }

    #[test]
    fn test_no_forward_parent_references() {
        let text = "# A\na\n## B\nb\n# C\nc\n## D\nd\n### E\ne\n";
        let sections = extract(text);

        let mut seen = HashSet::new();
        for section in &sections {
            if let Some(parent) = &section.parent_section_id {
                assert!(seen.contains(parent), "parent must precede child");
            }
            seen.insert(section.section_id.clone());
        }
    }

    #[test]
    fn test_no_cycles() {
        let text = "# A\na\n## B\nb\n### C\nc\n## B\nb again\n";
        let sections = extract(text);

        for section in &sections {
            let mut hops = 0;
            let mut current = section.parent_section_id.clone();
            while let Some(pid) = current {
                assert_ne!(pid, section.section_id, "cycle detected");
                current = sections
                    .iter()
                    .find(|s| s.section_id == pid)
                    .and_then(|s| s.parent_section_id.clone());
                hops += 1;
                assert!(hops <= sections.len(), "cycle detected");
            }
        }
    }

    #[test]
    fn test_preamble_becomes_introduction() {
        let text = "lead-in paragraph\n\n# First Heading\nbody\n";
        let sections = extract(text);

        assert_eq!(sections[0].title, "Introduction");
        assert!(sections[0].content.contains("lead-in paragraph"));
        assert_eq!(sections[1].title, "First Heading");
    }
}
