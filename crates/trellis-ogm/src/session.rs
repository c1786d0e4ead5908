//! Transaction scope handed to repositories, searches, loaders and patches.

use trellis_core::{OgmError, Result};
use trellis_graph::{GraphStore, GraphTxn};

/// One caller-owned transaction.
///
/// Any failure inside a save batch marks the session rollback-only; `commit`
/// then rolls back and reports [`OgmError::TransactionAborted`]. A session
/// dropped while still open rolls back.
pub struct Session<T: GraphTxn> {
    txn: Option<T>,
    rollback_only: bool,
}

impl<T: GraphTxn> Session<T> {
    pub async fn begin<S>(store: &S) -> Result<Self>
    where
        S: GraphStore<Txn = T>,
    {
        let txn = store.begin().await?;
        Ok(Self {
            txn: Some(txn),
            rollback_only: false,
        })
    }

    /// A session without a transaction. Every store access fails with
    /// [`OgmError::NoActiveTransaction`].
    pub fn detached() -> Self {
        Self {
            txn: None,
            rollback_only: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.txn.is_some()
    }

    pub fn txn(&mut self) -> Result<&mut T> {
        self.txn.as_mut().ok_or(OgmError::NoActiveTransaction)
    }

    pub fn mark_rollback_only(&mut self) {
        if !self.rollback_only {
            tracing::debug!("Transaction marked rollback-only");
        }
        self.rollback_only = true;
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    pub async fn commit(mut self) -> Result<()> {
        let txn = self.txn.take().ok_or(OgmError::NoActiveTransaction)?;
        if self.rollback_only {
            txn.rollback().await?;
            return Err(OgmError::TransactionAborted);
        }
        txn.commit().await?;
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        let txn = self.txn.take().ok_or(OgmError::NoActiveTransaction)?;
        txn.rollback().await?;
        Ok(())
    }
}

impl<T: GraphTxn> Drop for Session<T> {
    fn drop(&mut self) {
        if self.txn.take().is_some() {
            tracing::warn!(rollback_only = self.rollback_only, "Session dropped with an open transaction, rolling back");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{ErrorKind, Properties};
    use trellis_graph::MemoryGraph;

    #[tokio::test]
    async fn commit_and_rollback() {
        let graph = MemoryGraph::new();

        let mut session = Session::begin(&graph).await.unwrap();
        session.txn().unwrap().create_node("Person", Properties::new()).await.unwrap();
        session.commit().await.unwrap();
        assert_eq!(graph.node_count(), 1);

        let mut session = Session::begin(&graph).await.unwrap();
        session.txn().unwrap().create_node("Person", Properties::new()).await.unwrap();
        session.rollback().await.unwrap();
        assert_eq!(graph.node_count(), 1);
    }

    #[tokio::test]
    async fn rollback_only_aborts_commit() {
        let graph = MemoryGraph::new();
        let mut session = Session::begin(&graph).await.unwrap();
        session.txn().unwrap().create_node("Person", Properties::new()).await.unwrap();
        session.mark_rollback_only();
        let err = session.commit().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionAborted);
        assert_eq!(graph.node_count(), 0);
    }

    #[tokio::test]
    async fn detached_session_has_no_transaction() {
        let mut session: Session<<MemoryGraph as GraphStore>::Txn> = Session::detached();
        assert!(!session.is_active());
        assert_eq!(session.txn().unwrap_err().kind(), ErrorKind::NoActiveTransaction);
    }

    #[tokio::test]
    async fn dropped_session_rolls_back() {
        let graph = MemoryGraph::new();
        {
            let mut session = Session::begin(&graph).await.unwrap();
            session.txn().unwrap().create_node("Person", Properties::new()).await.unwrap();
        }
        assert_eq!(graph.node_count(), 0);
    }
}
