//! Skeleton sources: ordered collections of skeleton models that widgets
//! share, optionally grouped and linked into propagation chains.

use std::collections::{BTreeMap, BTreeSet};

use foundation::ids::SkeletonId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletonModel {
    pub id: SkeletonId,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_color")]
    pub color: [u8; 3],
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_color() -> [u8; 3] {
    [255, 255, 0]
}

fn default_visible() -> bool {
    true
}

impl SkeletonModel {
    pub fn new(id: SkeletonId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            color: default_color(),
            visible: true,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub u32);

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "source-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    EmptyGroupName,
    GroupExists(String),
    UnknownSource(SourceId),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::EmptyGroupName => write!(f, "please give a valid group name"),
            SourceError::GroupExists(name) => write!(f, "the group '{name}' exists already"),
            SourceError::UnknownSource(id) => write!(f, "unknown skeleton source {id}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// A top-level entry of a source: a single skeleton or a named group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    Skeleton(SkeletonId),
    Group(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicSkeletonSource {
    name: String,
    models: BTreeMap<SkeletonId, SkeletonModel>,
    ordered: Vec<SkeletonId>,
    elements: Vec<Element>,
    groups: BTreeMap<String, Vec<SkeletonId>>,
    /// Skeletons appended to a new group leave the groups they were in.
    pub move_existing_to_new_group: bool,
    link_target: Option<SourceId>,
}

impl BasicSkeletonSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            models: BTreeMap::new(),
            ordered: Vec::new(),
            elements: Vec::new(),
            groups: BTreeMap::new(),
            move_existing_to_new_group: true,
            link_target: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn has_skeleton(&self, id: SkeletonId) -> bool {
        self.models.contains_key(&id)
    }

    pub fn model(&self, id: SkeletonId) -> Option<&SkeletonModel> {
        self.models.get(&id)
    }

    pub fn selected_skeletons(&self) -> Vec<SkeletonId> {
        self.ordered.clone()
    }

    pub fn selected_models(&self) -> Vec<SkeletonModel> {
        self.ordered
            .iter()
            .filter_map(|id| self.models.get(id).cloned())
            .collect()
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn group(&self, name: &str) -> Option<&[SkeletonId]> {
        self.groups.get(name).map(Vec::as_slice)
    }

    pub fn is_group(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    pub fn link_target(&self) -> Option<SourceId> {
        self.link_target
    }

    /// Appends models in order. Known skeletons get their model replaced and
    /// keep their place, unless they are appended to a new `group`.
    fn append(&mut self, models: &[SkeletonModel], group: Option<&str>) {
        let mut grouped = Vec::new();
        for model in models {
            let id = model.id;
            if self.models.contains_key(&id) {
                if group.is_none() {
                    self.models.insert(id, model.clone());
                    continue;
                }
                if !self.move_existing_to_new_group {
                    continue;
                }
                self.detach(id);
            }
            self.ordered.push(id);
            self.models.insert(id, model.clone());
            match group {
                Some(_) => grouped.push(id),
                None => self.elements.push(Element::Skeleton(id)),
            }
        }
        if let Some(name) = group {
            self.elements.push(Element::Group(name.to_string()));
            self.groups.insert(name.to_string(), grouped);
        }
    }

    /// Takes a skeleton out of the order, the element list and all groups.
    fn detach(&mut self, id: SkeletonId) {
        self.ordered.retain(|s| *s != id);
        self.elements.retain(|e| *e != Element::Skeleton(id));
        for members in self.groups.values_mut() {
            members.retain(|s| *s != id);
        }
    }

    fn clear(&mut self) {
        self.models.clear();
        self.ordered.clear();
        self.elements.clear();
        self.groups.clear();
    }

    fn remove(&mut self, ids: &[SkeletonId]) {
        for id in ids {
            self.models.remove(id);
            self.detach(*id);
        }
    }

    /// Replaces known models and returns the unknown ones.
    fn update(&mut self, models: &[SkeletonModel]) -> Vec<SkeletonModel> {
        let mut new_models = Vec::new();
        for model in models {
            match self.models.get_mut(&model.id) {
                Some(existing) => *existing = model.clone(),
                None => new_models.push(model.clone()),
            }
        }
        new_models
    }
}

/// All skeleton sources plus the links between them.
///
/// A source may forward its changes to one link target. Links can form
/// cycles; propagation visits every source at most once.
#[derive(Debug, Default)]
pub struct SkeletonSources {
    next_id: u32,
    sources: BTreeMap<SourceId, BasicSkeletonSource>,
}

impl SkeletonSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, source: BasicSkeletonSource) -> SourceId {
        let id = SourceId(self.next_id);
        self.next_id += 1;
        self.sources.insert(id, source);
        id
    }

    pub fn remove_source(&mut self, id: SourceId) -> Option<BasicSkeletonSource> {
        let removed = self.sources.remove(&id);
        for source in self.sources.values_mut() {
            if source.link_target == Some(id) {
                source.link_target = None;
            }
        }
        removed
    }

    pub fn get(&self, id: SourceId) -> Option<&BasicSkeletonSource> {
        self.sources.get(&id)
    }

    fn get_mut(&mut self, id: SourceId) -> Result<&mut BasicSkeletonSource, SourceError> {
        self.sources
            .get_mut(&id)
            .ok_or(SourceError::UnknownSource(id))
    }

    pub fn link(&mut self, from: SourceId, to: Option<SourceId>) -> Result<(), SourceError> {
        if let Some(to) = to {
            if !self.sources.contains_key(&to) {
                return Err(SourceError::UnknownSource(to));
            }
        }
        self.get_mut(from)?.link_target = to;
        Ok(())
    }

    pub fn append(&mut self, id: SourceId, models: &[SkeletonModel]) -> Result<(), SourceError> {
        self.get_mut(id)?.append(models, None);
        self.propagate_update(id, models);
        Ok(())
    }

    /// Appends `models` as a new group named `group`.
    pub fn load_as_group(
        &mut self,
        id: SourceId,
        group: &str,
        models: &[SkeletonModel],
    ) -> Result<(), SourceError> {
        let source = self.get_mut(id)?;
        if group.trim().is_empty() {
            return Err(SourceError::EmptyGroupName);
        }
        if source.is_group(group) {
            return Err(SourceError::GroupExists(group.to_string()));
        }
        source.append(models, Some(group));
        self.propagate_update(id, models);
        Ok(())
    }

    pub fn clear(&mut self, id: SourceId) -> Result<(), SourceError> {
        self.get_mut(id)?;
        let mut visited = BTreeSet::new();
        let mut next = Some(id);
        while let Some(current) = next {
            if !visited.insert(current) {
                break;
            }
            next = match self.sources.get_mut(&current) {
                Some(source) => {
                    source.clear();
                    source.link_target
                }
                None => None,
            };
        }
        Ok(())
    }

    /// Removes skeletons here and down the link chain, as long as the next
    /// target still has any of them.
    pub fn remove_skeletons(&mut self, id: SourceId, ids: &[SkeletonId]) -> Result<(), SourceError> {
        self.get_mut(id)?;
        let mut visited = BTreeSet::new();
        let mut next = Some(id);
        while let Some(current) = next {
            if !visited.insert(current) {
                break;
            }
            let Some(source) = self.sources.get_mut(&current) else {
                break;
            };
            source.remove(ids);
            let target = source.link_target;
            next = target.filter(|t| {
                self.sources
                    .get(t)
                    .is_some_and(|s| ids.iter().any(|id| s.has_skeleton(*id)))
            });
        }
        Ok(())
    }

    /// Updates known models and appends unknown ones, here and along the
    /// link chain.
    pub fn update_models(&mut self, id: SourceId, models: &[SkeletonModel]) -> Result<(), SourceError> {
        self.get_mut(id)?;
        let mut visited = BTreeSet::new();
        self.update_chain(id, models, &mut visited);
        Ok(())
    }

    fn propagate_update(&mut self, id: SourceId, models: &[SkeletonModel]) {
        let mut visited = BTreeSet::from([id]);
        if let Some(target) = self.sources.get(&id).and_then(|s| s.link_target) {
            self.update_chain(target, models, &mut visited);
        }
    }

    fn update_chain(
        &mut self,
        start: SourceId,
        models: &[SkeletonModel],
        visited: &mut BTreeSet<SourceId>,
    ) {
        let mut next = Some(start);
        while let Some(current) = next {
            if !visited.insert(current) {
                break;
            }
            let Some(source) = self.sources.get_mut(&current) else {
                break;
            };
            let new_models = source.update(models);
            if !new_models.is_empty() {
                source.append(&new_models, None);
            }
            next = source.link_target;
        }
    }
}

#[cfg(test)]
mod tests {
    use foundation::ids::SkeletonId;
    use pretty_assertions::assert_eq;

    use super::{BasicSkeletonSource, Element, SkeletonModel, SkeletonSources, SourceError};

    fn models(ids: &[u64]) -> Vec<SkeletonModel> {
        ids.iter()
            .map(|id| SkeletonModel::new(SkeletonId(*id), format!("neuron {id}")))
            .collect()
    }

    #[test]
    fn append_keeps_order_and_updates_known_models() {
        let mut sources = SkeletonSources::new();
        let a = sources.add(BasicSkeletonSource::new("a"));
        sources.append(a, &models(&[3, 1])).unwrap();
        let mut renamed = models(&[1, 2]);
        renamed[0].name = "renamed".into();
        sources.append(a, &renamed).unwrap();

        let source = sources.get(a).unwrap();
        assert_eq!(
            source.selected_skeletons(),
            vec![SkeletonId(3), SkeletonId(1), SkeletonId(2)]
        );
        assert_eq!(source.model(SkeletonId(1)).unwrap().name, "renamed");
        assert!(source.has_skeleton(SkeletonId(2)));
        assert!(!source.has_skeleton(SkeletonId(4)));
    }

    #[test]
    fn groups_take_over_existing_members() {
        let mut sources = SkeletonSources::new();
        let a = sources.add(BasicSkeletonSource::new("a"));
        sources.append(a, &models(&[1, 2])).unwrap();
        sources.load_as_group(a, "left", &models(&[2, 3])).unwrap();

        let source = sources.get(a).unwrap();
        assert!(source.is_group("left"));
        assert!(!source.is_group("1"));
        assert_eq!(source.group("left"), Some(&[SkeletonId(2), SkeletonId(3)][..]));
        assert_eq!(
            source.elements(),
            &[Element::Skeleton(SkeletonId(1)), Element::Group("left".into())]
        );
        assert_eq!(
            source.selected_skeletons(),
            vec![SkeletonId(1), SkeletonId(2), SkeletonId(3)]
        );

        assert_eq!(
            sources.load_as_group(a, "left", &models(&[4])),
            Err(SourceError::GroupExists("left".into()))
        );
        assert_eq!(
            sources.load_as_group(a, " ", &models(&[4])),
            Err(SourceError::EmptyGroupName)
        );
    }

    #[test]
    fn updates_propagate_through_cyclic_links_once() {
        let mut sources = SkeletonSources::new();
        let a = sources.add(BasicSkeletonSource::new("a"));
        let b = sources.add(BasicSkeletonSource::new("b"));
        sources.link(a, Some(b)).unwrap();
        sources.link(b, Some(a)).unwrap();

        sources.update_models(a, &models(&[5])).unwrap();
        assert_eq!(sources.get(a).unwrap().len(), 1);
        assert_eq!(sources.get(b).unwrap().len(), 1);

        sources.remove_skeletons(b, &[SkeletonId(5)]).unwrap();
        assert!(sources.get(a).unwrap().is_empty());
        assert!(sources.get(b).unwrap().is_empty());

        sources.append(a, &models(&[6, 7])).unwrap();
        assert_eq!(sources.get(b).unwrap().len(), 2);
        sources.clear(b).unwrap();
        assert!(sources.get(a).unwrap().is_empty());
    }

    #[test]
    fn unknown_sources_are_reported() {
        let mut sources = SkeletonSources::new();
        let a = sources.add(BasicSkeletonSource::new("a"));
        let gone = sources.add(BasicSkeletonSource::new("gone"));
        sources.link(a, Some(gone)).unwrap();
        sources.remove_source(gone);
        assert_eq!(sources.get(a).unwrap().link_target(), None);
        assert_eq!(
            sources.append(gone, &models(&[1])),
            Err(SourceError::UnknownSource(gone))
        );
    }
}
