use tracing::{debug, info};

use crate::destination::DestinationTransaction;
use crate::error::RestoreResult;
use crate::restorers::base::RestoreBase;
use crate::storage::ObjectStore;

/// Restores an entry by executing the SQL stored with it in the catalog.
///
/// Covers schema objects of the pre-data and post-data sections as well as data entries without
/// a payload, such as sequence values. The session is left untouched.
#[derive(Debug)]
pub struct DefinitionRestorer<S> {
    base: RestoreBase<S>,
}

impl<S> DefinitionRestorer<S>
where
    S: ObjectStore,
{
    pub fn new(base: RestoreBase<S>) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &RestoreBase<S> {
        &self.base
    }

    /// Executes the definition within `tx` and ends the transaction.
    pub async fn restore<T>(&mut self, mut tx: T) -> RestoreResult<()>
    where
        T: DestinationTransaction,
    {
        let result = match self.base.entry().definition.as_deref() {
            Some(definition) if !definition.trim().is_empty() => {
                info!(entry = %self.base.debug_label(), "executing definition");
                tx.execute(definition).await
            }
            _ => {
                debug!(entry = %self.base.debug_label(), "entry has no definition");
                Ok(())
            }
        };

        self.base.finish(tx, result).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use config::shared::RestoreConfig;

    use super::*;
    use crate::catalog::{CatalogEntry, DumpId, Section};
    use crate::destination::Destination;
    use crate::destination::memory::MemoryDestination;
    use crate::error::ErrorKind;
    use crate::restorers::base::SessionState;
    use crate::storage::MemoryStore;

    fn index_entry(definition: Option<&str>) -> CatalogEntry {
        CatalogEntry {
            dump_id: DumpId(12),
            section: Section::PostData,
            desc: "INDEX".to_string(),
            namespace: Some("public".to_string()),
            tag: Some("orders_user_idx".to_string()),
            file_name: None,
            columns: None,
            definition: definition.map(str::to_string),
            dependencies: vec![DumpId(7)],
        }
    }

    fn restorer(entry: CatalogEntry) -> DefinitionRestorer<MemoryStore> {
        DefinitionRestorer::new(RestoreBase::new(
            Arc::new(entry),
            MemoryStore::new(),
            Arc::new(RestoreConfig::default()),
        ))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn executes_and_commits_the_definition() {
        let destination = MemoryDestination::new("non_super_user");
        let mut restorer = restorer(index_entry(Some(
            "CREATE INDEX orders_user_idx ON public.orders (user_id);",
        )));

        restorer
            .restore(destination.begin().await.unwrap())
            .await
            .unwrap();

        assert_eq!(restorer.base().state(), SessionState::Committed);
        let session = &destination.sessions().await[0];
        assert!(session.committed);
        assert_eq!(
            session.statements,
            vec![
                "CREATE INDEX orders_user_idx ON public.orders (user_id)".to_string(),
                "commit".to_string()
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failing_definition_is_rolled_back() {
        let destination = MemoryDestination::new("non_super_user");
        destination.fail_statements_matching("create index").await;
        let mut restorer = restorer(index_entry(Some("CREATE INDEX orders_user_idx ON public.orders (user_id)")));

        let err = restorer
            .restore(destination.begin().await.unwrap())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DestinationQueryFailed);
        assert_eq!(restorer.base().state(), SessionState::Aborted);
        assert!(!destination.sessions().await[0].committed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_definition_commits_nothing() {
        let destination = MemoryDestination::new("non_super_user");
        let mut restorer = restorer(index_entry(None));

        restorer
            .restore(destination.begin().await.unwrap())
            .await
            .unwrap();

        assert_eq!(destination.sessions().await[0].statements, vec!["commit".to_string()]);
    }
}
