//! Builds the query domain model from a parsed search request.
//!
//! The builder decides, per parameter occurrence, which node shape it
//! compiles to. The identity cache supplies resource-type ids for `_type`
//! handling; an unknown type in `_type` is a client error.

use tracing::trace;

use crate::cache::ParameterIdentityCache;
use crate::error::{PersistenceResult, SearchError};
use crate::search::params::{QueryParameter, SearchContext, SearchModifier, SearchParamType};
use crate::search::query::{SearchExtension, SearchQuery};
use crate::search::search_param::{SearchParam, SearchParamKind};

/// Builds [`SearchQuery`] domain models from parsed [`SearchContext`]s.
pub struct SearchQueryBuilder<'a, C> {
    cache: &'a C,
}

impl<'a, C: ParameterIdentityCache> SearchQueryBuilder<'a, C> {
    /// Creates a builder over the given identity cache.
    pub fn new(cache: &'a C) -> Self {
        Self { cache }
    }

    /// Builds the count variant for a type-level search.
    pub fn build_count_query(
        &self,
        resource_type: &str,
        context: &SearchContext,
    ) -> PersistenceResult<SearchQuery> {
        let mut query = SearchQuery::count(resource_type);
        self.add_resource_type_extension(&mut query, context)?;
        self.build_model_common(&mut query, resource_type, context)?;
        Ok(query)
    }

    /// Builds the data variant for a type-level search.
    pub fn build_data_query(
        &self,
        resource_type: &str,
        context: &SearchContext,
    ) -> PersistenceResult<SearchQuery> {
        let mut query = SearchQuery::data(
            resource_type,
            context.sort.clone(),
            context.offset(),
            context.page_size,
        );
        self.build_model_common(&mut query, resource_type, context)?;
        Ok(query)
    }

    /// Builds the whole-system data variant for one resource type.
    ///
    /// The query carries no search parameters by construction; only the
    /// `_type` extension and the fixed resource-type root apply.
    pub fn build_whole_system_data_query(
        &self,
        resource_type: &str,
        context: &SearchContext,
    ) -> PersistenceResult<SearchQuery> {
        let resource_type_id = self.resource_type_id(resource_type)?;
        let mut query = SearchQuery::whole_system_data(resource_type, resource_type_id);
        self.add_resource_type_extension(&mut query, context)?;
        Ok(query)
    }

    fn resource_type_id(&self, resource_type: &str) -> PersistenceResult<i32> {
        self.cache.get_resource_type_id(resource_type).ok_or_else(|| {
            SearchError::UnknownResourceType {
                resource_type: resource_type.to_string(),
            }
            .into()
        })
    }

    fn add_resource_type_extension(
        &self,
        query: &mut SearchQuery,
        context: &SearchContext,
    ) -> PersistenceResult<()> {
        if let Some(types) = &context.resource_types {
            let mut ids = Vec::with_capacity(types.len());
            for name in types {
                ids.push(self.resource_type_id(name)?);
            }
            query.add_extension(SearchExtension::ResourceTypeFilter(ids));
        }
        Ok(())
    }

    fn build_model_common(
        &self,
        query: &mut SearchQuery,
        resource_type: &str,
        context: &SearchContext,
    ) -> PersistenceResult<()> {
        // _id and _lastUpdated filters are the cheapest and most selective;
        // force them ahead of everything else (stable for the rest)
        let mut parameters: Vec<&QueryParameter> = context.parameters.iter().collect();
        parameters.sort_by_key(|p| match p.code.as_str() {
            "_id" => -100i32,
            "_lastUpdated" => -90,
            _ => 0,
        });

        for parm in parameters {
            query.add_param(self.build_search_param(resource_type, parm)?);
        }
        Ok(())
    }

    fn build_search_param(
        &self,
        resource_type: &str,
        parm: &QueryParameter,
    ) -> PersistenceResult<SearchParam> {
        let kind = self.classify(parm)?;
        trace!(code = %parm.code, kind = ?kind, "classified search parameter");
        Ok(SearchParam::new(
            resource_type,
            parm.code.clone(),
            kind,
            parm.clone(),
        ))
    }

    /// Maps one parameter occurrence to its node shape. The `:missing`
    /// modifier wins over everything; chained expressions win over the plain
    /// reference shape.
    fn classify(&self, parm: &QueryParameter) -> PersistenceResult<SearchParamKind> {
        if parm.modifier == Some(SearchModifier::Missing) {
            return Ok(SearchParamKind::Missing);
        }
        let kind = match parm.param_type {
            SearchParamType::String => SearchParamKind::String,
            SearchParamType::Number => SearchParamKind::Number,
            SearchParamType::Date => SearchParamKind::Date,
            SearchParamType::Quantity => SearchParamKind::Quantity,
            SearchParamType::Composite => SearchParamKind::Composite,
            SearchParamType::Reference => {
                if parm.is_chained() {
                    SearchParamKind::Chained
                } else {
                    SearchParamKind::Reference
                }
            }
            SearchParamType::Token => match parm.code.as_str() {
                "_tag" => SearchParamKind::Tag,
                "_security" => SearchParamKind::Security,
                _ => SearchParamKind::Token,
            },
            SearchParamType::Uri => {
                if parm.is_canonical || parm.code == "url" || parm.code == "_profile" {
                    SearchParamKind::Canonical
                } else {
                    // plain URIs compile through the string value table
                    SearchParamKind::String
                }
            }
            SearchParamType::Special => {
                if parm.code == "near" {
                    SearchParamKind::Location
                } else {
                    return Err(SearchError::UnsupportedParameterType {
                        param_type: format!("special parameter '{}'", parm.code),
                    }
                    .into());
                }
            }
        };
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SharedIdentityCache;
    use crate::config::CacheConfig;
    use crate::search::params::{ChainMode, QueryParameterValue};
    use crate::search::query::SearchQueryKind;

    fn primed_cache() -> SharedIdentityCache {
        let cache = SharedIdentityCache::new(&CacheConfig::default());
        cache.prime_resource_types(vec![
            ("Patient".to_string(), 1),
            ("Observation".to_string(), 2),
        ]);
        cache
    }

    #[test]
    fn test_classification() {
        let cache = primed_cache();
        let builder = SearchQueryBuilder::new(&cache);

        let missing = QueryParameter::new("name", SearchParamType::String)
            .with_modifier(SearchModifier::Missing);
        assert_eq!(builder.classify(&missing).unwrap(), SearchParamKind::Missing);

        let tag = QueryParameter::new("_tag", SearchParamType::Token);
        assert_eq!(builder.classify(&tag).unwrap(), SearchParamKind::Tag);

        let security = QueryParameter::new("_security", SearchParamType::Token);
        assert_eq!(builder.classify(&security).unwrap(), SearchParamKind::Security);

        let url = QueryParameter::new("url", SearchParamType::Uri);
        assert_eq!(builder.classify(&url).unwrap(), SearchParamKind::Canonical);

        let plain_uri = QueryParameter::new("system", SearchParamType::Uri);
        assert_eq!(builder.classify(&plain_uri).unwrap(), SearchParamKind::String);

        let chained = QueryParameter::new("subject", SearchParamType::Reference)
            .with_modifier_resource_type("Patient")
            .chained_to(
                ChainMode::Forward,
                QueryParameter::new("name", SearchParamType::String)
                    .with_value(QueryParameterValue::string("Smith")),
            );
        assert_eq!(builder.classify(&chained).unwrap(), SearchParamKind::Chained);

        let near = QueryParameter::new("near", SearchParamType::Special);
        assert_eq!(builder.classify(&near).unwrap(), SearchParamKind::Location);

        let odd = QueryParameter::new("_query", SearchParamType::Special);
        assert!(builder.classify(&odd).is_err());
    }

    #[test]
    fn test_id_and_last_updated_sort_first() {
        let cache = primed_cache();
        let builder = SearchQueryBuilder::new(&cache);

        let context = SearchContext::new()
            .with_parameter(QueryParameter::new("name", SearchParamType::String))
            .with_parameter(QueryParameter::new("_lastUpdated", SearchParamType::Date))
            .with_parameter(QueryParameter::new("_id", SearchParamType::Token));

        let query = builder.build_count_query("Patient", &context).unwrap();
        let names: Vec<_> = query.params().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["_id", "_lastUpdated", "name"]);
    }

    #[test]
    fn test_whole_system_requires_known_type() {
        let cache = primed_cache();
        let builder = SearchQueryBuilder::new(&cache);

        let context = SearchContext::new();
        let query = builder
            .build_whole_system_data_query("Patient", &context)
            .unwrap();
        assert!(matches!(
            query.kind(),
            SearchQueryKind::WholeSystemData { resource_type_id: 1 }
        ));
        assert!(query.params().is_empty());

        let err = builder
            .build_whole_system_data_query("Device", &context)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::PersistenceError::Search(SearchError::UnknownResourceType { .. })
        ));
    }

    #[test]
    fn test_type_extension_resolved_through_cache() {
        let cache = primed_cache();
        let builder = SearchQueryBuilder::new(&cache);

        let context =
            SearchContext::new().with_resource_types(vec!["Patient".to_string(), "Observation".to_string()]);
        let query = builder.build_count_query("Resource", &context).unwrap();
        // extension ids come straight from the resource-type dictionary
        assert!(matches!(query.kind(), SearchQueryKind::Count));

        let bad = SearchContext::new().with_resource_types(vec!["Nope".to_string()]);
        assert!(builder.build_count_query("Resource", &bad).is_err());
    }
}
