//! Role and resource based access control.
//!
//! Roles form a DAG: each role carries an ordered list of parents, and
//! the most recently added parent has the highest priority when rules
//! conflict across the inheritance graph. Resources form a tree rooted
//! at an implicit all-resources node. Rules live in a nested table keyed
//! by (resource or all, role or all) with a per-privilege slot and an
//! all-privileges slot; the global default rule always exists and is
//! DENY, so the engine is a whitelist.

use crate::Error;

use std::sync::Arc;

use ahash::{HashMap, HashMapExt};

/// The role assumed by unauthenticated callers, honored only when a
/// deployment registers it.
pub const GUEST_ROLE: &str = "anonymous";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOp {
    Add,
    Remove,
}

/// A predicate attached to a rule; when present, its result gates
/// whether the rule applies. The queried role, resource and privilege
/// are passed through unchanged.
pub trait Assertion: Send + Sync {
    fn assert(
        &self,
        acl: &Acl,
        role: Option<&str>,
        resource: Option<&str>,
        privilege: Option<&str>,
    ) -> bool;
}

#[derive(Clone)]
struct Rule {
    kind: RuleType,
    assert: Option<Arc<dyn Assertion>>,
}

impl Rule {
    fn deny() -> Self {
        Self {
            kind: RuleType::Deny,
            assert: None,
        }
    }
}

#[derive(Default)]
struct PrivilegeRules {
    all_privileges: Option<Rule>,
    by_privilege: HashMap<String, Rule>,
}

#[derive(Default)]
struct RoleRules {
    all_roles: PrivilegeRules,
    by_role: HashMap<String, PrivilegeRules>,
}

struct Rules {
    all_resources: RoleRules,
    by_resource: HashMap<String, RoleRules>,
}

impl Default for Rules {
    fn default() -> Self {
        let mut rules = Self {
            all_resources: RoleRules::default(),
            by_resource: HashMap::new(),
        };

        rules.all_resources.all_roles.all_privileges = Some(Rule::deny());
        rules
    }
}

struct Query<'a> {
    role: Option<&'a str>,
    resource: Option<&'a str>,
    privilege: Option<&'a str>,
}

#[derive(Default)]
pub struct Acl {
    /// role id to parents, in insertion order.
    roles: HashMap<String, Vec<String>>,
    /// resource id to parent resource.
    resources: HashMap<String, Option<String>>,
    rules: Rules,
}

impl Acl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a role inheriting from `parents`, all of which must
    /// already exist. The last parent has the highest priority.
    pub fn add_role(&mut self, id: &str, parents: &[&str]) -> Result<(), Error> {
        if self.roles.contains_key(id) {
            return Err(Error::DuplicateName(id.to_string()));
        }

        for parent in parents {
            if !self.roles.contains_key(*parent) {
                return Err(Error::UnknownRole(parent.to_string()));
            }
        }

        self.roles
            .insert(id.to_string(), parents.iter().map(|it| it.to_string()).collect());

        Ok(())
    }

    /// Register a resource under an optional parent resource.
    pub fn add_resource(&mut self, id: &str, parent: Option<&str>) -> Result<(), Error> {
        if self.resources.contains_key(id) {
            return Err(Error::DuplicateName(id.to_string()));
        }

        if let Some(parent) = parent {
            if !self.resources.contains_key(parent) {
                return Err(Error::UnknownResource(parent.to_string()));
            }
        }

        self.resources
            .insert(id.to_string(), parent.map(|it| it.to_string()));

        Ok(())
    }

    pub fn has_role(&self, id: &str) -> bool {
        self.roles.contains_key(id)
    }

    pub fn has_resource(&self, id: &str) -> bool {
        self.resources.contains_key(id)
    }

    pub fn allow(
        &mut self,
        roles: Option<&[&str]>,
        resources: Option<&[&str]>,
        privileges: Option<&[&str]>,
        assert: Option<Arc<dyn Assertion>>,
    ) -> Result<(), Error> {
        self.set_rule(RuleOp::Add, RuleType::Allow, roles, resources, privileges, assert)
    }

    pub fn deny(
        &mut self,
        roles: Option<&[&str]>,
        resources: Option<&[&str]>,
        privileges: Option<&[&str]>,
        assert: Option<Arc<dyn Assertion>>,
    ) -> Result<(), Error> {
        self.set_rule(RuleOp::Add, RuleType::Deny, roles, resources, privileges, assert)
    }

    /// Add or remove rules. `None` roles, resources or privileges address
    /// the matching "all" bucket. Removal only touches rules of the given
    /// type, and removing the global default resets it to DENY instead of
    /// deleting it.
    pub fn set_rule(
        &mut self,
        op: RuleOp,
        kind: RuleType,
        roles: Option<&[&str]>,
        resources: Option<&[&str]>,
        privileges: Option<&[&str]>,
        assert: Option<Arc<dyn Assertion>>,
    ) -> Result<(), Error> {
        if let Some(roles) = roles {
            for role in roles {
                if !self.roles.contains_key(*role) {
                    return Err(Error::UnknownRole(role.to_string()));
                }
            }
        }

        if let Some(resources) = resources {
            for resource in resources {
                if !self.resources.contains_key(*resource) {
                    return Err(Error::UnknownResource(resource.to_string()));
                }
            }
        }

        let resource_keys: Vec<Option<String>> = match resources {
            Some(list) => list.iter().map(|it| Some(it.to_string())).collect(),
            None => vec![None],
        };

        let role_keys: Vec<Option<String>> = match roles {
            Some(list) => list.iter().map(|it| Some(it.to_string())).collect(),
            None => vec![None],
        };

        for resource in &resource_keys {
            for role in &role_keys {
                match op {
                    RuleOp::Add => {
                        let rules = self.rules_mut(resource.as_deref(), role.as_deref());
                        match privileges {
                            None => {
                                rules.all_privileges = Some(Rule {
                                    kind,
                                    assert: assert.clone(),
                                });
                            }
                            Some(list) => {
                                for privilege in list {
                                    rules.by_privilege.insert(
                                        privilege.to_string(),
                                        Rule {
                                            kind,
                                            assert: assert.clone(),
                                        },
                                    );
                                }
                            }
                        }
                    }
                    RuleOp::Remove => {
                        let global = resource.is_none() && role.is_none();
                        let Some(rules) =
                            self.existing_rules_mut(resource.as_deref(), role.as_deref())
                        else {
                            continue;
                        };

                        match privileges {
                            None => {
                                let matches = rules
                                    .all_privileges
                                    .as_ref()
                                    .map(|it| it.kind == kind)
                                    .unwrap_or(false);

                                if matches {
                                    if global {
                                        rules.all_privileges = Some(Rule::deny());
                                        rules.by_privilege.clear();
                                    } else {
                                        rules.all_privileges = None;
                                    }
                                }
                            }
                            Some(list) => {
                                for privilege in list {
                                    let matches = rules
                                        .by_privilege
                                        .get(*privilege)
                                        .map(|it| it.kind == kind)
                                        .unwrap_or(false);

                                    if matches {
                                        rules.by_privilege.remove(*privilege);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Whether `role` may exercise `privilege` on `resource`.
    ///
    /// The resource walk starts at the named resource and climbs to the
    /// all-resources node; at each level the role DAG is searched depth
    /// first, most recently added parent first, before the all-roles
    /// bucket is consulted. The first applicable rule decides; a fully
    /// exhausted walk is a deny.
    pub fn is_allowed(
        &self,
        role: Option<&str>,
        resource: Option<&str>,
        privilege: Option<&str>,
    ) -> bool {
        let query = Query {
            role,
            resource,
            privilege,
        };

        let mut cursor = resource;

        loop {
            if let Some(role) = role {
                if let Some(result) = self.role_dfs(&query, role, cursor, privilege) {
                    return result;
                }
            }

            if let Some(result) = self.all_roles_search(&query, cursor, privilege) {
                return result;
            }

            match cursor {
                Some(id) => cursor = self.resources.get(id).and_then(|it| it.as_deref()),
                None => return false,
            }
        }
    }

    /// Depth-first search over the role DAG at a fixed resource.
    fn role_dfs(
        &self,
        query: &Query,
        role: &str,
        resource: Option<&str>,
        privilege: Option<&str>,
    ) -> Option<bool> {
        let mut visited: ahash::HashSet<&str> = ahash::HashSet::default();
        let mut stack: Vec<&str> = vec![role];

        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }

            if let Some(result) = self.role_visit(query, Some(node), resource, privilege) {
                return Some(result);
            }

            if let Some(parents) = self.roles.get(node) {
                // pushed in insertion order so the most recently added
                // parent pops first.
                for parent in parents {
                    stack.push(parent);
                }
            }
        }

        None
    }

    fn all_roles_search(
        &self,
        query: &Query,
        resource: Option<&str>,
        privilege: Option<&str>,
    ) -> Option<bool> {
        self.role_visit(query, None, resource, privilege)
    }

    /// Consult the (resource, role) rule bucket. A one-privilege query
    /// falls back to the node's all-privileges slot; an all-privileges
    /// query short-circuits to deny on any per-privilege DENY at this
    /// node before the all-privileges slot applies.
    fn role_visit(
        &self,
        query: &Query,
        role: Option<&str>,
        resource: Option<&str>,
        privilege: Option<&str>,
    ) -> Option<bool> {
        match privilege {
            Some(privilege) => self
                .rule_type(query, resource, role, Some(privilege))
                .or_else(|| self.rule_type(query, resource, role, None))
                .map(|kind| kind == RuleType::Allow),
            None => {
                let rules = self.rules_at(resource, role)?;

                for privilege in rules.by_privilege.keys() {
                    if self.rule_type(query, resource, role, Some(privilege))
                        == Some(RuleType::Deny)
                    {
                        return Some(false);
                    }
                }

                self.rule_type(query, resource, role, None)
                    .map(|kind| kind == RuleType::Allow)
            }
        }
    }

    /// The effective type of the exact rule at (resource, role,
    /// privilege), or `None` when no applicable rule exists.
    ///
    /// A failing assertion makes the rule non-applicable, except on the
    /// global default rule where it inverts the type; that inversion is
    /// the only place an assertion flips a result.
    fn rule_type(
        &self,
        query: &Query,
        resource: Option<&str>,
        role: Option<&str>,
        privilege: Option<&str>,
    ) -> Option<RuleType> {
        let rules = self.rules_at(resource, role)?;
        let rule = match privilege {
            Some(privilege) => rules.by_privilege.get(privilege)?,
            None => rules.all_privileges.as_ref()?,
        };

        if let Some(assert) = &rule.assert {
            if !assert.assert(self, query.role, query.resource, query.privilege) {
                return if resource.is_some() || role.is_some() || privilege.is_some() {
                    None
                } else {
                    Some(match rule.kind {
                        RuleType::Allow => RuleType::Deny,
                        RuleType::Deny => RuleType::Allow,
                    })
                };
            }
        }

        Some(rule.kind)
    }

    fn rules_at(&self, resource: Option<&str>, role: Option<&str>) -> Option<&PrivilegeRules> {
        let node = match resource {
            Some(id) => self.rules.by_resource.get(id)?,
            None => &self.rules.all_resources,
        };

        match role {
            Some(id) => node.by_role.get(id),
            None => Some(&node.all_roles),
        }
    }

    fn existing_rules_mut(
        &mut self,
        resource: Option<&str>,
        role: Option<&str>,
    ) -> Option<&mut PrivilegeRules> {
        let node = match resource {
            Some(id) => self.rules.by_resource.get_mut(id)?,
            None => &mut self.rules.all_resources,
        };

        match role {
            Some(id) => node.by_role.get_mut(id),
            None => Some(&mut node.all_roles),
        }
    }

    fn rules_mut(&mut self, resource: Option<&str>, role: Option<&str>) -> &mut PrivilegeRules {
        let node = match resource {
            Some(id) => self.rules.by_resource.entry(id.to_string()).or_default(),
            None => &mut self.rules.all_resources,
        };

        match role {
            Some(id) => node.by_role.entry(id.to_string()).or_default(),
            None => &mut node.all_roles,
        }
    }
}
