//! Quarter-level rebate files: the truth set and the combined upload.

use std::path::PathBuf;
use tracing::info;

use crate::config::Layout;
use crate::context::Time;
use crate::error::{StoreError, StoreResult};
use crate::store::{gather, rebates_to_csv, FileBackedStore, Rebate, RebateFile};

async fn load_rebates(root: PathBuf) -> StoreResult<Vec<Rebate>> {
    let mut store: FileBackedStore<RebateFile> = FileBackedStore::new();
    if let Some(failure) = store.load(gather(&root, &["csv"])).await.into_iter().next() {
        return Err(failure.error);
    }
    Ok(store.iter().flat_map(|f| f.rebates().iter().cloned()).collect())
}

/// Every expected rebate of the quarter.
pub async fn load_truth(layout: &Layout, time: &Time) -> StoreResult<Vec<Rebate>> {
    load_rebates(layout.truth(time)).await
}

/// Combine every rebate file of the quarter into the upload file.
///
/// Returns the written path and the number of rebates in it.
pub async fn compile_rebates(layout: &Layout, time: &Time) -> StoreResult<(PathBuf, usize)> {
    let rebates = load_rebates(layout.rebates(time)).await?;
    let target = layout.output(time);

    let bytes = rebates_to_csv(&rebates)?;
    let parent = target.parent().ok_or_else(|| StoreError::Invalid {
        path: target.display().to_string(),
        message: "no parent directory".into(),
    })?;
    tokio::fs::create_dir_all(parent).await?;
    tokio::fs::write(&target, bytes).await?;

    info!(path = %target.display(), rebates = rebates.len(), "compiled rebates");
    Ok((target, rebates.len()))
}
