//! Traversal state threaded through query compilation.

/// Immutable state carried through the visitor traversal.
///
/// Wraps the query under construction together with the table aliases and
/// resource type in scope at the current point of the tree. Each visitor
/// step consumes a `QueryData` and produces a new one; nothing is mutated in
/// place, so a step can never corrupt the state seen by a sibling branch.
#[derive(Debug, Clone)]
pub struct QueryData<T> {
    query: T,
    lr_alias: String,
    param_alias: String,
    resource_type: String,
    chain_depth: i32,
}

impl<T> QueryData<T> {
    /// Creates the traversal state for a query root.
    pub fn new(
        query: T,
        lr_alias: impl Into<String>,
        param_alias: impl Into<String>,
        resource_type: impl Into<String>,
        chain_depth: i32,
    ) -> Self {
        Self {
            query,
            lr_alias: lr_alias.into(),
            param_alias: param_alias.into(),
            resource_type: resource_type.into(),
            chain_depth,
        }
    }

    /// Returns the query under construction.
    pub fn query(&self) -> &T {
        &self.query
    }

    /// Consumes the state, returning the query.
    pub fn into_query(self) -> T {
        self.query
    }

    /// Alias of the logical-resource table in scope.
    pub fn lr_alias(&self) -> &str {
        &self.lr_alias
    }

    /// Alias of the parameter table in scope.
    pub fn param_alias(&self) -> &str {
        &self.param_alias
    }

    /// The resource type in scope at this point of the tree. Chain steps
    /// move it to the referenced (or referencing) type.
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Number of chain steps taken to reach this point.
    pub fn chain_depth(&self) -> i32 {
        self.chain_depth
    }

    /// Produces the state for the next chain step: new aliases, the chain's
    /// target resource type, depth increased by one.
    pub fn step(
        &self,
        query: T,
        lr_alias: impl Into<String>,
        param_alias: impl Into<String>,
        resource_type: impl Into<String>,
    ) -> Self {
        Self {
            query,
            lr_alias: lr_alias.into(),
            param_alias: param_alias.into(),
            resource_type: resource_type.into(),
            chain_depth: self.chain_depth + 1,
        }
    }

    /// Produces a new state with the same aliases and scope but a new query
    /// value.
    pub fn with_query(&self, query: T) -> Self {
        Self {
            query,
            lr_alias: self.lr_alias.clone(),
            param_alias: self.param_alias.clone(),
            resource_type: self.resource_type.clone(),
            chain_depth: self.chain_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_advances_scope() {
        let root = QueryData::new(0u32, "LR0", "P0", "Observation", 0);
        let stepped = root.step(1u32, "LR1", "P1", "Patient");

        assert_eq!(stepped.resource_type(), "Patient");
        assert_eq!(stepped.chain_depth(), 1);
        assert_eq!(stepped.lr_alias(), "LR1");
        // the original state is untouched
        assert_eq!(root.resource_type(), "Observation");
        assert_eq!(root.chain_depth(), 0);
    }

    #[test]
    fn test_with_query_keeps_scope() {
        let root = QueryData::new(0u32, "LR0", "P0", "Patient", 0);
        let updated = root.with_query(9u32);
        assert_eq!(*updated.query(), 9);
        assert_eq!(updated.lr_alias(), "LR0");
        assert_eq!(updated.chain_depth(), 0);
    }
}
