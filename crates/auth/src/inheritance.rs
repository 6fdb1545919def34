//! Ancestor inheritance strategies.
//!
//! A strategy answers two questions for a (child, parent) pair of resource
//! types: does the child inherit at all, and which child privileges follow
//! from the parent's effective set.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use keystone_core::PolicyResult;

use crate::{Privilege, PrivilegeSet, ResourceType};

pub trait InheritanceStrategy: Send + Sync {
    /// Whether a `child` policy inherits from a `parent` policy. `false` cuts the walk.
    fn inherits_from(&self, child: &ResourceType, parent: &ResourceType) -> bool;

    /// Child privileges implied by the parent's effective privilege set.
    fn inherited_privileges(
        &self,
        child: &ResourceType,
        parent: &ResourceType,
        parent_privileges: &PrivilegeSet,
    ) -> PrivilegeSet;
}

impl<T> InheritanceStrategy for Arc<T>
where
    T: InheritanceStrategy + ?Sized,
{
    fn inherits_from(&self, child: &ResourceType, parent: &ResourceType) -> bool {
        (**self).inherits_from(child, parent)
    }

    fn inherited_privileges(
        &self,
        child: &ResourceType,
        parent: &ResourceType,
        parent_privileges: &PrivilegeSet,
    ) -> PrivilegeSet {
        (**self).inherited_privileges(child, parent, parent_privileges)
    }
}

/// Every policy stands alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInheritance;

impl InheritanceStrategy for NoInheritance {
    fn inherits_from(&self, _child: &ResourceType, _parent: &ResourceType) -> bool {
        false
    }

    fn inherited_privileges(&self, _: &ResourceType, _: &ResourceType, _: &PrivilegeSet) -> PrivilegeSet {
        PrivilegeSet::new()
    }
}

/// Inheritance behaviour of one child resource type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InheritanceRule {
    #[serde(default)]
    pub inherits: bool,
    /// Restrict inheritance to these parent types; empty means any parent.
    #[serde(default)]
    pub parents: Vec<ResourceType>,
    /// Pass every parent privilege through unchanged.
    #[serde(default)]
    pub pass_through: bool,
    /// Parent privilege -> child privileges it implies.
    #[serde(default)]
    pub mappings: BTreeMap<Privilege, Vec<Privilege>>,
}

impl InheritanceRule {
    pub fn pass_through() -> Self {
        Self {
            inherits: true,
            pass_through: true,
            ..Self::default()
        }
    }

    pub fn mapped() -> Self {
        Self {
            inherits: true,
            ..Self::default()
        }
    }

    pub fn with_parent(mut self, parent: ResourceType) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn with_mapping(mut self, parent: Privilege, child: impl IntoIterator<Item = Privilege>) -> Self {
        self.mappings.entry(parent).or_default().extend(child);
        self
    }
}

/// Configuration-driven strategy keyed by child resource type.
///
/// Types without an entry do not inherit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InheritanceTable {
    rules: HashMap<ResourceType, InheritanceRule>,
}

impl InheritanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a table from `{ "<childType>": { "inherits": .., "mappings": .. } }`.
    pub fn from_json(json: &str) -> PolicyResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_rule(mut self, child: ResourceType, rule: InheritanceRule) -> Self {
        self.rules.insert(child, rule);
        self
    }

    pub fn rule(&self, child: &ResourceType) -> Option<&InheritanceRule> {
        self.rules.get(child)
    }
}

impl InheritanceStrategy for InheritanceTable {
    fn inherits_from(&self, child: &ResourceType, parent: &ResourceType) -> bool {
        self.rule(child)
            .is_some_and(|rule| rule.inherits && (rule.parents.is_empty() || rule.parents.contains(parent)))
    }

    fn inherited_privileges(
        &self,
        child: &ResourceType,
        parent: &ResourceType,
        parent_privileges: &PrivilegeSet,
    ) -> PrivilegeSet {
        if !self.inherits_from(child, parent) {
            return PrivilegeSet::new();
        }
        let Some(rule) = self.rule(child) else {
            return PrivilegeSet::new();
        };

        let mut inherited = PrivilegeSet::new();
        if rule.pass_through {
            inherited.extend(parent_privileges.iter().cloned());
        }
        for privilege in parent_privileges {
            if let Some(mapped) = rule.mappings.get(privilege) {
                inherited.extend(mapped.iter().cloned());
            }
        }
        inherited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_inheritance_cuts_everything() {
        let parent = PrivilegeSet::from([Privilege::READ]);

        assert!(!NoInheritance.inherits_from(&ResourceType::CALLOUT, &ResourceType::SPACE));
        assert!(NoInheritance
            .inherited_privileges(&ResourceType::CALLOUT, &ResourceType::SPACE, &parent)
            .is_empty());
    }

    #[test]
    fn mappings_translate_parent_privileges() {
        let table = InheritanceTable::new().with_rule(
            ResourceType::CALLOUT,
            InheritanceRule::mapped()
                .with_parent(ResourceType::COLLABORATION)
                .with_mapping(Privilege::CONTRIBUTE, [Privilege::CREATE, Privilege::READ]),
        );
        let parent = PrivilegeSet::from([Privilege::CONTRIBUTE, Privilege::GRANT]);

        assert_eq!(
            table.inherited_privileges(&ResourceType::CALLOUT, &ResourceType::COLLABORATION, &parent),
            PrivilegeSet::from([Privilege::CREATE, Privilege::READ])
        );
        assert!(!table.inherits_from(&ResourceType::CALLOUT, &ResourceType::SPACE));
        assert!(!table.inherits_from(&ResourceType::SPACE, &ResourceType::ACCOUNT));
    }

    #[test]
    fn table_parses_from_json() {
        let table = InheritanceTable::from_json(
            r#"{
                "collaboration": { "inherits": true, "passThrough": true },
                "callout": { "inherits": true, "mappings": { "UPDATE": ["READ"] } }
            }"#,
        )
        .unwrap();
        let parent = PrivilegeSet::from([Privilege::UPDATE]);

        assert_eq!(
            table.inherited_privileges(&ResourceType::COLLABORATION, &ResourceType::SPACE, &parent),
            parent
        );
        assert_eq!(
            table.inherited_privileges(&ResourceType::CALLOUT, &ResourceType::COLLABORATION, &parent),
            PrivilegeSet::from([Privilege::READ])
        );
    }

    #[test]
    fn malformed_table_is_rejected() {
        assert!(InheritanceTable::from_json(r#"{"callout": {"inherits": "yes"}}"#).is_err());
    }
}
