use store::UnitOfWork;

use crate::error::Result;

/// Commits the unit of work if `result` is a success, otherwise rolls it back.
///
/// A failed rollback is logged and the original error returned; the backend
/// discards the transaction either way.
pub(crate) async fn settle<T>(uow: Box<dyn UnitOfWork>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = uow.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}
