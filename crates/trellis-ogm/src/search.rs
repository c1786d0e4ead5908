//! Fluent search builder over one entity type.
//!
//! The builder only accumulates a [`SearchParameter`]; terminals plan a
//! [`NodeQuery`] from it and run inside the caller's session. `list` and
//! `count` share the same predicates, and `Clone` copies the whole state so a
//! clone can be re-windowed independently.

use serde::Serialize;

use trellis_core::metadata::RESERVED_PROPERTIES;
use trellis_core::search::OrderBy;
use trellis_core::{
    from_document, Document, Entity, FieldList, Filter, NodeId, OgmError, Result, SearchParameter, SortOrder, Value,
};
use trellis_graph::{Condition, GraphTxn, NodeQuery};

use crate::hydrate::hydrate;
use crate::repository::Repository;
use crate::session::Session;

/// Result of [`Search::execute`]: the page, and the total when requested.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult<T> {
    pub list: Option<Vec<T>>,
    pub total: Option<usize>,
}

pub struct Search<E: Entity> {
    repository: Repository<E>,
    params: SearchParameter,
}

impl<E: Entity> Clone for Search<E> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            params: self.params.clone(),
        }
    }
}

impl<E: Entity> Search<E> {
    pub(crate) fn new(repository: Repository<E>, limit: usize) -> Self {
        Self {
            repository,
            params: SearchParameter::with_limit(limit),
        }
    }

    pub fn with_params(repository: Repository<E>, params: SearchParameter) -> Self {
        Self { repository, params }
    }

    // ── Builder ──────────────────────────────────────────────────

    pub fn filter(mut self, filter: Filter) -> Self {
        self.params.filters.push(filter);
        self
    }

    pub fn where_eq(self, path: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::equals(path, value))
    }

    /// Add a textual predicate such as `children.name=Morty`.
    pub fn parse_filter(self, input: &str) -> Result<Self> {
        Ok(self.filter(Filter::parse(input)?))
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = NodeId>) -> Self {
        self.params.ids.extend(ids);
        self
    }

    pub fn uuids<S: Into<String>>(mut self, uuids: impl IntoIterator<Item = S>) -> Self {
        self.params.uuids.extend(uuids.into_iter().map(Into::into));
        self
    }

    pub fn fields(mut self, fields: FieldList) -> Self {
        self.params.fields = Some(fields);
        self
    }

    /// Parse and set the field selection, e.g. `"name,children.name"`.
    pub fn select(self, fields: &str) -> Result<Self> {
        Ok(self.fields(FieldList::parse(fields)?))
    }

    pub fn order_by(self, field: &str) -> Self {
        self.order(field, SortOrder::Asc)
    }

    pub fn order_by_desc(self, field: &str) -> Self {
        self.order(field, SortOrder::Desc)
    }

    fn order(mut self, field: &str, order: SortOrder) -> Self {
        self.params.order_by.push(OrderBy {
            field: field.to_string(),
            order,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.params.limit = limit;
        self
    }

    /// 1-based page number.
    pub fn page(mut self, page: usize) -> Self {
        self.params.page = page;
        self
    }

    pub fn start(mut self, start: usize) -> Self {
        self.params.start = Some(start);
        self
    }

    /// Also compute the total in [`Search::execute`].
    pub fn with_count(mut self) -> Self {
        self.params.count = true;
        self
    }

    pub fn params(&self) -> &SearchParameter {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut SearchParameter {
        &mut self.params
    }

    // ── Planning ─────────────────────────────────────────────────

    fn property_of(&self, name: &str) -> Result<String> {
        let descriptor = self.repository.descriptor();
        if RESERVED_PROPERTIES.contains(&name) {
            return Ok(name.to_string());
        }
        descriptor
            .field(name)
            .filter(|f| f.is_scalar())
            .map(|f| f.property.clone())
            .ok_or_else(|| OgmError::invalid_path(descriptor.label, name))
    }

    fn condition(&self, filter: &Filter) -> Result<Condition> {
        let descriptor = self.repository.descriptor();
        let Some((hop, leaf)) = filter.hop() else {
            return Ok(Condition::Property {
                key: self.property_of(&filter.path)?,
                op: filter.op.clone(),
            });
        };

        let invalid = || OgmError::invalid_path(descriptor.label, filter.path.as_str());
        let field = descriptor.field(hop).filter(|f| f.is_relationship()).ok_or_else(invalid)?;
        let rule = field.relationship.as_ref().ok_or_else(invalid)?;
        let target = field.target(self.repository.registry()).ok_or_else(invalid)??;
        let key = if RESERVED_PROPERTIES.contains(&leaf) {
            leaf.to_string()
        } else {
            target
                .field(leaf)
                .filter(|f| f.is_scalar())
                .map(|f| f.property.clone())
                .ok_or_else(invalid)?
        };
        Ok(Condition::Related {
            rel_type: rule.rel_type.clone(),
            direction: rule.direction,
            target_label: rule.restrict_type.then(|| target.label.to_string()),
            key,
            op: filter.op.clone(),
        })
    }

    /// Translate the parameters into a store query. Unknown fields fail with
    /// [`OgmError::InvalidFieldPath`].
    pub fn plan(&self) -> Result<NodeQuery> {
        let params = &self.params;
        let mut query = NodeQuery::label(self.repository.descriptor().label);

        for filter in &params.filters {
            query = query.with(self.condition(filter)?);
        }
        if !params.ids.is_empty() {
            query = query.with(Condition::IdIn(params.ids.iter().copied().collect()));
        }
        if !params.uuids.is_empty() {
            query = query.with(Condition::PropertyIn {
                key: "uuid".to_string(),
                values: params.uuids.iter().map(|u| Value::from(u.as_str())).collect(),
            });
        }
        for order in &params.order_by {
            query = query.order(&self.property_of(&order.field)?, order.order);
        }
        if let Some(fields) = &params.fields {
            fields.resolve(self.repository.descriptor(), self.repository.registry())?;
        }
        Ok(query.window(params.offset(), Some(params.limit)))
    }

    // ── Terminals ────────────────────────────────────────────────

    async fn run<T: GraphTxn>(&self, session: &mut Session<T>, query: NodeQuery) -> Result<Vec<Document>> {
        let empty = FieldList::new();
        let fields = self.params.fields.as_ref().unwrap_or(&empty);
        let txn = session.txn()?;
        let records = txn.find(&query).await?;
        let mut documents = Vec::with_capacity(records.len());
        for record in records {
            let descriptor = self.repository.descriptor().clone();
            documents.push(hydrate(&mut *txn, self.repository.registry(), descriptor, record, fields).await?);
        }
        Ok(documents)
    }

    /// Hydrated documents of the current page.
    pub async fn documents<T: GraphTxn>(&self, session: &mut Session<T>) -> Result<Vec<Document>> {
        let query = self.plan()?;
        self.run(session, query).await
    }

    pub async fn list<T: GraphTxn>(&self, session: &mut Session<T>) -> Result<Vec<E>> {
        Ok(self.documents(session).await?.iter().map(from_document::<E>).collect())
    }

    /// Number of matches, ignoring the page window.
    pub async fn count<T: GraphTxn>(&self, session: &mut Session<T>) -> Result<usize> {
        let query = self.plan()?.unwindowed();
        Ok(session.txn()?.count(&query).await?)
    }

    /// The only match, `None` when nothing matches.
    pub async fn single<T: GraphTxn>(&self, session: &mut Session<T>) -> Result<Option<E>> {
        let query = self.plan()?.window(0, Some(2));
        let mut documents = self.run(session, query).await?;
        if documents.len() > 1 {
            let count = self.count(session).await?;
            return Err(OgmError::AmbiguousResult {
                entity: self.repository.descriptor().label.to_string(),
                count,
            });
        }
        Ok(documents.pop().as_ref().map(from_document::<E>))
    }

    pub async fn first<T: GraphTxn>(&self, session: &mut Session<T>) -> Result<Option<E>> {
        let query = self.plan()?;
        let query = NodeQuery {
            limit: Some(1),
            ..query
        };
        Ok(self.run(session, query).await?.first().map(from_document::<E>))
    }

    /// The page, plus the total when [`Search::with_count`] was requested.
    pub async fn execute<T: GraphTxn>(&self, session: &mut Session<T>) -> Result<SearchResult<E>> {
        let list = self.list(session).await?;
        let total = if self.params.count {
            Some(self.count(session).await?)
        } else {
            None
        };
        Ok(SearchResult {
            list: Some(list),
            total,
        })
    }
}
