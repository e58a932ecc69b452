//! Many-to-many association sets: task <-> tag and task <-> entity.

use crate::types::{EntityLink, TagLink};
use std::collections::{BTreeSet, HashMap};

/// Forward and reverse indexes over a set of `(left, right)` pairs.
#[derive(Debug, Default, Clone)]
struct PairIndex {
    forward: HashMap<String, BTreeSet<String>>,
    reverse: HashMap<String, BTreeSet<String>>,
}

impl PairIndex {
    fn contains(&self, left: &str, right: &str) -> bool {
        self.forward.get(left).is_some_and(|set| set.contains(right))
    }

    fn insert(&mut self, left: &str, right: &str) -> bool {
        self.reverse
            .entry(right.to_string())
            .or_default()
            .insert(left.to_string());
        self.forward
            .entry(left.to_string())
            .or_default()
            .insert(right.to_string())
    }

    fn remove(&mut self, left: &str, right: &str) -> bool {
        let removed = remove_from(&mut self.forward, left, right);
        remove_from(&mut self.reverse, right, left);
        removed
    }

    fn rights(&self, left: &str) -> Vec<String> {
        self.forward
            .get(left)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn lefts(&self, right: &str) -> Vec<String> {
        self.reverse
            .get(right)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.forward
            .iter()
            .flat_map(|(left, rights)| rights.iter().map(move |right| (left.as_str(), right.as_str())))
    }
}

fn remove_from(map: &mut HashMap<String, BTreeSet<String>>, key: &str, value: &str) -> bool {
    let Some(set) = map.get_mut(key) else {
        return false;
    };
    let removed = set.remove(value);
    if set.is_empty() {
        map.remove(key);
    }
    removed
}

/// Tag and entity associations. Owns only the association rows; the task
/// and entity records live in the state arena.
#[derive(Debug, Default, Clone)]
pub struct LinkIndex {
    tags: PairIndex,
    entities: PairIndex,
}

impl LinkIndex {
    pub fn has_tag(&self, link: &TagLink) -> bool {
        self.tags.contains(&link.task_id, &link.tag)
    }

    pub fn add_tag(&mut self, link: &TagLink) -> bool {
        self.tags.insert(&link.task_id, &link.tag)
    }

    pub fn remove_tag(&mut self, link: &TagLink) -> bool {
        self.tags.remove(&link.task_id, &link.tag)
    }

    pub fn has_entity_link(&self, link: &EntityLink) -> bool {
        self.entities.contains(&link.task_id, &link.entity_id)
    }

    pub fn add_entity_link(&mut self, link: &EntityLink) -> bool {
        self.entities.insert(&link.task_id, &link.entity_id)
    }

    pub fn remove_entity_link(&mut self, link: &EntityLink) -> bool {
        self.entities.remove(&link.task_id, &link.entity_id)
    }

    /// Tags of a task, ascending.
    pub fn tags_of(&self, task_id: &str) -> Vec<String> {
        self.tags.rights(task_id)
    }

    /// Ids of tasks carrying `tag`.
    pub fn tasks_with_tag(&self, tag: &str) -> Vec<String> {
        self.tags.lefts(tag)
    }

    pub fn entities_of(&self, task_id: &str) -> Vec<String> {
        self.entities.rights(task_id)
    }

    pub fn tasks_with_entity(&self, entity_id: &str) -> Vec<String> {
        self.entities.lefts(entity_id)
    }

    /// Every link row touching a task, for delete cascades.
    pub fn links_of_task(&self, task_id: &str) -> (Vec<TagLink>, Vec<EntityLink>) {
        let tags = self
            .tags_of(task_id)
            .into_iter()
            .map(|tag| TagLink {
                task_id: task_id.to_string(),
                tag,
            })
            .collect();
        let entities = self
            .entities_of(task_id)
            .into_iter()
            .map(|entity_id| EntityLink {
                task_id: task_id.to_string(),
                entity_id,
            })
            .collect();
        (tags, entities)
    }

    /// Every link row pointing at an entity.
    pub fn links_of_entity(&self, entity_id: &str) -> Vec<EntityLink> {
        self.tasks_with_entity(entity_id)
            .into_iter()
            .map(|task_id| EntityLink {
                task_id,
                entity_id: entity_id.to_string(),
            })
            .collect()
    }

    /// All distinct tags in use, ascending.
    pub fn all_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.tags.reverse.keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn tag_links(&self) -> impl Iterator<Item = TagLink> + '_ {
        self.tags.pairs().map(|(task_id, tag)| TagLink {
            task_id: task_id.to_string(),
            tag: tag.to_string(),
        })
    }

    pub fn entity_links(&self) -> impl Iterator<Item = EntityLink> + '_ {
        self.entities.pairs().map(|(task_id, entity_id)| EntityLink {
            task_id: task_id.to_string(),
            entity_id: entity_id.to_string(),
        })
    }
}
