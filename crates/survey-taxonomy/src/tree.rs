//! Category arena and attribute index.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde::{Deserialize, Serialize};
use survey_model::taxonomy::validate_code;
use survey_model::{
    AttributeConstraints, AttributeId, AttributeKey, CategoryId, DataType, TaxonomyAttribute,
    TaxonomyCategory,
};
use tracing::debug;

use crate::error::TaxonomyError;

type Result<T> = std::result::Result<T, TaxonomyError>;

/// Serializable form of a whole tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxonomySnapshot {
    pub categories: Vec<TaxonomyCategory>,
    pub attributes: Vec<TaxonomyAttribute>,
}

#[derive(Debug, Clone, Default)]
pub struct TaxonomyTree {
    categories: BTreeMap<String, TaxonomyCategory>,
    children: BTreeMap<String, BTreeSet<String>>,
    roots: BTreeSet<String>,
    attributes: BTreeMap<AttributeKey, TaxonomyAttribute>,
    next_category_id: u32,
    next_attribute_id: u32,
}

impl TaxonomyTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a category, optionally under an existing active parent.
    pub fn add_category(
        &mut self,
        parent_code: Option<&str>,
        code: &str,
        name: &str,
    ) -> Result<TaxonomyCategory> {
        let code = validate_code(code)?;
        if self.categories.contains_key(&code) {
            return Err(TaxonomyError::DuplicateCode {
                scope: "category",
                code,
            });
        }
        let parent = match parent_code {
            Some(parent) => {
                let parent = self
                    .categories
                    .get(parent.trim())
                    .ok_or_else(|| TaxonomyError::ParentNotFound(parent.to_string()))?;
                if !parent.is_active {
                    return Err(TaxonomyError::ParentInactive(parent.code.clone()));
                }
                Some(parent.code.clone())
            }
            None => None,
        };
        if let Some(parent) = &parent {
            self.check_cycle(&code, parent)?;
        }

        self.next_category_id += 1;
        let category = TaxonomyCategory {
            id: CategoryId(self.next_category_id),
            code: code.clone(),
            name: name.trim().to_string(),
            parent_code: parent,
            is_active: true,
            version: 1,
        };
        self.link(&category);
        debug!(category = %code, parent = ?category.parent_code, "category added");
        self.categories.insert(code, category.clone());
        Ok(category)
    }

    /// Adds an attribute to an existing category.
    pub fn add_attribute(
        &mut self,
        category_code: &str,
        code: &str,
        data_type: DataType,
        constraints: AttributeConstraints,
        is_required: bool,
    ) -> Result<TaxonomyAttribute> {
        let category_code = category_code.trim();
        if !self.categories.contains_key(category_code) {
            return Err(TaxonomyError::CategoryNotFound(category_code.to_string()));
        }
        let key = AttributeKey::new(category_code, code)?;
        if self.attributes.contains_key(&key) {
            return Err(TaxonomyError::DuplicateCode {
                scope: "attribute",
                code: key.to_string(),
            });
        }
        check_constraints(&key, data_type, &constraints)?;

        self.next_attribute_id += 1;
        let attribute = TaxonomyAttribute {
            id: AttributeId(self.next_attribute_id),
            category_code: key.category.clone(),
            code: key.attribute.clone(),
            data_type,
            constraints,
            is_required,
        };
        if let Some(category) = self.categories.get_mut(category_code) {
            category.version += 1;
        }
        debug!(attribute = %key, data_type = %data_type, "attribute added");
        self.attributes.insert(key, attribute.clone());
        Ok(attribute)
    }

    /// Looks up an attribute by category and attribute code.
    pub fn resolve(&self, category_code: &str, attribute_code: &str) -> Result<&TaxonomyAttribute> {
        let key = AttributeKey {
            category: category_code.trim().to_string(),
            attribute: attribute_code.trim().to_string(),
        };
        self.attributes
            .get(&key)
            .ok_or_else(|| TaxonomyError::AttributeNotFound {
                category: key.category,
                attribute: key.attribute,
            })
    }

    pub fn resolve_key(&self, key: &AttributeKey) -> Result<&TaxonomyAttribute> {
        self.resolve(&key.category, &key.attribute)
    }

    /// Like [`Self::resolve`], but the owning category and all of its
    /// ancestors must be active.
    pub fn resolve_active(
        &self,
        category_code: &str,
        attribute_code: &str,
    ) -> Result<&TaxonomyAttribute> {
        let category_code = category_code.trim();
        if !self.categories.contains_key(category_code) {
            return Err(TaxonomyError::CategoryNotFound(category_code.to_string()));
        }
        if !self.is_active_path(category_code) {
            return Err(TaxonomyError::CategoryInactive(category_code.to_string()));
        }
        self.resolve(category_code, attribute_code)
    }

    pub fn category(&self, code: &str) -> Option<&TaxonomyCategory> {
        self.categories.get(code.trim())
    }

    /// Direct children of a category, in code order.
    pub fn children(&self, code: &str) -> Vec<&TaxonomyCategory> {
        self.children
            .get(code)
            .into_iter()
            .flatten()
            .filter_map(|child| self.categories.get(child))
            .collect()
    }

    pub fn roots(&self) -> Vec<&TaxonomyCategory> {
        self.roots
            .iter()
            .filter_map(|code| self.categories.get(code))
            .collect()
    }

    /// Ancestor codes, nearest first.
    pub fn ancestors(&self, code: &str) -> Result<Vec<String>> {
        let mut current = self
            .categories
            .get(code)
            .ok_or_else(|| TaxonomyError::CategoryNotFound(code.to_string()))?;
        let mut out = Vec::new();
        while let Some(parent) = &current.parent_code {
            if out.len() > self.categories.len() {
                return Err(TaxonomyError::CycleDetected {
                    code: code.to_string(),
                    parent: parent.clone(),
                });
            }
            out.push(parent.clone());
            current = self
                .categories
                .get(parent)
                .ok_or_else(|| TaxonomyError::ParentNotFound(parent.clone()))?;
        }
        Ok(out)
    }

    /// True when the category and every ancestor are active.
    pub fn is_active_path(&self, code: &str) -> bool {
        let Some(category) = self.categories.get(code) else {
            return false;
        };
        if !category.is_active {
            return false;
        }
        match self.ancestors(code) {
            Ok(ancestors) => ancestors
                .iter()
                .all(|code| self.categories.get(code).is_some_and(|c| c.is_active)),
            Err(_) => false,
        }
    }

    /// Moves a category under a new parent (or to the root).
    pub fn reparent(&mut self, code: &str, new_parent: Option<&str>) -> Result<&TaxonomyCategory> {
        let code = code.trim().to_string();
        let old_parent = self
            .categories
            .get(&code)
            .ok_or_else(|| TaxonomyError::CategoryNotFound(code.clone()))?
            .parent_code
            .clone();
        let new_parent = match new_parent {
            Some(parent) => {
                let parent = self
                    .categories
                    .get(parent.trim())
                    .ok_or_else(|| TaxonomyError::ParentNotFound(parent.to_string()))?;
                if !parent.is_active {
                    return Err(TaxonomyError::ParentInactive(parent.code.clone()));
                }
                Some(parent.code.clone())
            }
            None => None,
        };
        if let Some(parent) = &new_parent {
            self.check_cycle(&code, parent)?;
        }

        self.unlink(&code, old_parent.as_deref());
        let Some(category) = self.categories.get_mut(&code) else {
            return Err(TaxonomyError::CategoryNotFound(code));
        };
        category.parent_code = new_parent;
        category.version += 1;
        let snapshot = category.clone();
        self.link(&snapshot);
        debug!(category = %code, parent = ?snapshot.parent_code, "category re-parented");
        self.categories
            .get(&code)
            .ok_or(TaxonomyError::CategoryNotFound(code))
    }

    /// Marks a category inactive. Its attributes stop resolving through
    /// [`Self::resolve_active`], as do those of its descendants.
    pub fn deactivate(&mut self, code: &str) -> Result<&TaxonomyCategory> {
        let category = self
            .categories
            .get_mut(code.trim())
            .ok_or_else(|| TaxonomyError::CategoryNotFound(code.to_string()))?;
        if category.is_active {
            category.is_active = false;
            category.version += 1;
        }
        Ok(&*category)
    }

    pub fn attributes_of(&self, category_code: &str) -> Vec<&TaxonomyAttribute> {
        self.attributes
            .values()
            .filter(|attribute| attribute.category_code == category_code)
            .collect()
    }

    pub fn attributes(&self) -> impl Iterator<Item = &TaxonomyAttribute> {
        self.attributes.values()
    }

    pub fn categories(&self) -> impl Iterator<Item = &TaxonomyCategory> {
        self.categories.values()
    }

    /// Depth-first walk from the roots, yielding `(depth, category)`.
    pub fn walk(&self) -> Vec<(usize, &TaxonomyCategory)> {
        let mut out = Vec::with_capacity(self.categories.len());
        let mut stack: Vec<(usize, &str)> =
            self.roots.iter().rev().map(|code| (0, code.as_str())).collect();
        while let Some((depth, code)) = stack.pop() {
            let Some(category) = self.categories.get(code) else {
                continue;
            };
            out.push((depth, category));
            if let Some(children) = self.children.get(code) {
                stack.extend(children.iter().rev().map(|child| (depth + 1, child.as_str())));
            }
        }
        out
    }

    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn snapshot(&self) -> TaxonomySnapshot {
        TaxonomySnapshot {
            categories: self.walk().into_iter().map(|(_, c)| c.clone()).collect(),
            attributes: self.attributes.values().cloned().collect(),
        }
    }

    /// Rebuilds a tree from a snapshot, keeping ids, versions and flags.
    ///
    /// Parents may appear after their children in the snapshot. The
    /// "parent must be active" rule only applies when a category is created,
    /// so it is not re-checked here.
    pub fn from_snapshot(snapshot: TaxonomySnapshot) -> Result<Self> {
        let mut tree = Self::new();
        let mut pending = snapshot.categories;
        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            for category in pending {
                let ready = category
                    .parent_code
                    .as_ref()
                    .is_none_or(|parent| tree.categories.contains_key(parent));
                if ready {
                    tree.restore_category(category)?;
                } else {
                    deferred.push(category);
                }
            }
            if deferred.len() == before {
                let stuck = &deferred[0];
                return Err(TaxonomyError::ParentNotFound(
                    stuck.parent_code.clone().unwrap_or_default(),
                ));
            }
            pending = deferred;
        }
        for attribute in snapshot.attributes {
            let key = AttributeKey::new(&attribute.category_code, &attribute.code)?;
            if !tree.categories.contains_key(&key.category) {
                return Err(TaxonomyError::CategoryNotFound(key.category));
            }
            if tree.attributes.contains_key(&key) {
                return Err(TaxonomyError::DuplicateCode {
                    scope: "attribute",
                    code: key.to_string(),
                });
            }
            check_constraints(&key, attribute.data_type, &attribute.constraints)?;
            tree.next_attribute_id = tree.next_attribute_id.max(attribute.id.0);
            tree.attributes.insert(key, attribute);
        }
        Ok(tree)
    }

    fn restore_category(&mut self, category: TaxonomyCategory) -> Result<()> {
        let code = validate_code(&category.code)?;
        if self.categories.contains_key(&code) {
            return Err(TaxonomyError::DuplicateCode {
                scope: "category",
                code,
            });
        }
        if let Some(parent) = &category.parent_code {
            self.check_cycle(&code, parent)?;
        }
        self.next_category_id = self.next_category_id.max(category.id.0);
        self.link(&category);
        self.categories.insert(code, category);
        Ok(())
    }

    /// Rejects `parent` if it is `code` itself or one of its descendants.
    ///
    /// Walks the ancestor chain of `parent`; the walk is bounded by the number
    /// of categories so a corrupted index cannot loop forever.
    fn check_cycle(&self, code: &str, parent: &str) -> Result<()> {
        let cycle = || TaxonomyError::CycleDetected {
            code: code.to_string(),
            parent: parent.to_string(),
        };
        let mut cursor = Some(parent.to_string());
        let mut steps = 0usize;
        while let Some(current) = cursor {
            if current == code {
                return Err(cycle());
            }
            steps += 1;
            if steps > self.categories.len() + 1 {
                return Err(cycle());
            }
            cursor = self
                .categories
                .get(&current)
                .and_then(|category| category.parent_code.clone());
        }
        Ok(())
    }

    fn link(&mut self, category: &TaxonomyCategory) {
        match &category.parent_code {
            Some(parent) => {
                self.children
                    .entry(parent.clone())
                    .or_default()
                    .insert(category.code.clone());
            }
            None => {
                self.roots.insert(category.code.clone());
            }
        }
    }

    fn unlink(&mut self, code: &str, parent: Option<&str>) {
        match parent {
            Some(parent) => {
                if let Some(children) = self.children.get_mut(parent) {
                    children.remove(code);
                }
            }
            None => {
                self.roots.remove(code);
            }
        }
    }
}

fn check_constraints(
    key: &AttributeKey,
    data_type: DataType,
    constraints: &AttributeConstraints,
) -> Result<()> {
    constraints
        .check_shape(data_type)
        .map_err(|e| TaxonomyError::InvalidConstraints {
            attribute: key.to_string(),
            message: e.to_string(),
        })?;
    if let Some(pattern) = &constraints.pattern {
        Regex::new(pattern).map_err(|e| TaxonomyError::InvalidConstraints {
            attribute: key.to_string(),
            message: format!("invalid pattern: {e}"),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> TaxonomyTree {
        let mut tree = TaxonomyTree::new();
        tree.add_category(None, "respondent", "Respondent").unwrap();
        tree.add_category(Some("respondent"), "demographics", "Demographics")
            .unwrap();
        tree.add_category(Some("demographics"), "income", "Income")
            .unwrap();
        tree
    }

    #[test]
    fn rejects_duplicate_category_codes() {
        let mut tree = tree();
        let err = tree.add_category(None, "income", "Again").unwrap_err();
        assert!(matches!(err, TaxonomyError::DuplicateCode { scope: "category", .. }));
    }

    #[test]
    fn rejects_missing_or_inactive_parent() {
        let mut tree = tree();
        assert!(matches!(
            tree.add_category(Some("nope"), "child", "Child"),
            Err(TaxonomyError::ParentNotFound(_))
        ));
        tree.deactivate("income").unwrap();
        assert!(matches!(
            tree.add_category(Some("income"), "child", "Child"),
            Err(TaxonomyError::ParentInactive(_))
        ));
    }

    #[test]
    fn reparent_under_descendant_is_a_cycle() {
        let mut tree = tree();
        let err = tree.reparent("respondent", Some("income")).unwrap_err();
        assert!(matches!(err, TaxonomyError::CycleDetected { .. }));
        let err = tree.reparent("income", Some("income")).unwrap_err();
        assert!(matches!(err, TaxonomyError::CycleDetected { .. }));
        assert_eq!(
            tree.ancestors("income").unwrap(),
            vec!["demographics".to_string(), "respondent".to_string()]
        );
    }

    #[test]
    fn reparent_moves_children_and_bumps_version() {
        let mut tree = tree();
        let moved = tree.reparent("income", Some("respondent")).unwrap();
        assert_eq!(moved.version, 2);
        assert!(tree.children("demographics").is_empty());
        let children: Vec<_> = tree
            .children("respondent")
            .iter()
            .map(|c| c.code.clone())
            .collect();
        assert_eq!(children, vec!["demographics", "income"]);
        tree.reparent("income", None).unwrap();
        assert_eq!(tree.roots().len(), 2);
    }

    #[test]
    fn attributes_are_unique_per_category() {
        let mut tree = tree();
        tree.add_attribute(
            "income",
            "bracket",
            DataType::ClosedSet,
            AttributeConstraints::closed_set(["LOW", "HIGH"]),
            true,
        )
        .unwrap();
        assert!(matches!(
            tree.add_attribute(
                "income",
                "bracket",
                DataType::String,
                AttributeConstraints::default(),
                false
            ),
            Err(TaxonomyError::DuplicateCode { scope: "attribute", .. })
        ));
        // Same code in a different category is fine.
        tree.add_attribute(
            "demographics",
            "bracket",
            DataType::String,
            AttributeConstraints::default(),
            false,
        )
        .unwrap();
        assert_eq!(tree.category("income").unwrap().version, 2);
    }

    #[test]
    fn attribute_needs_existing_category_and_valid_constraints() {
        let mut tree = tree();
        assert!(matches!(
            tree.add_attribute(
                "missing",
                "x",
                DataType::Boolean,
                AttributeConstraints::default(),
                false
            ),
            Err(TaxonomyError::CategoryNotFound(_))
        ));
        let bad_pattern = AttributeConstraints {
            pattern: Some("([".to_string()),
            ..AttributeConstraints::default()
        };
        assert!(matches!(
            tree.add_attribute("income", "code", DataType::String, bad_pattern, false),
            Err(TaxonomyError::InvalidConstraints { .. })
        ));
    }

    #[test]
    fn resolve_active_respects_ancestors() {
        let mut tree = tree();
        tree.add_attribute(
            "income",
            "amount",
            DataType::Number,
            AttributeConstraints::default(),
            false,
        )
        .unwrap();
        assert!(tree.resolve_active("income", "amount").is_ok());
        tree.deactivate("respondent").unwrap();
        assert!(tree.resolve("income", "amount").is_ok());
        assert!(matches!(
            tree.resolve_active("income", "amount"),
            Err(TaxonomyError::CategoryInactive(_))
        ));
    }

    #[test]
    fn walk_is_depth_first_in_code_order() {
        let mut tree = tree();
        tree.add_category(Some("respondent"), "attitudes", "Attitudes")
            .unwrap();
        let walked: Vec<_> = tree
            .walk()
            .into_iter()
            .map(|(depth, c)| format!("{depth}:{}", c.code))
            .collect();
        assert_eq!(
            walked,
            vec!["0:respondent", "1:attitudes", "1:demographics", "2:income"]
        );
    }

    #[test]
    fn snapshot_round_trips() {
        let mut tree = tree();
        tree.add_attribute(
            "income",
            "bracket",
            DataType::ClosedSet,
            AttributeConstraints::closed_set(["LOW", "HIGH"]),
            false,
        )
        .unwrap();
        tree.deactivate("demographics").unwrap();
        let mut snapshot = tree.snapshot();
        snapshot.categories.reverse();
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored =
            TaxonomyTree::from_snapshot(serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(restored.category_count(), 3);
        assert!(!restored.category("demographics").unwrap().is_active);
        assert!(restored.resolve("income", "bracket").is_ok());
        let next = {
            let mut restored = restored;
            restored.add_category(None, "extra", "Extra").unwrap().id
        };
        assert_eq!(next, CategoryId(4));
    }
}
