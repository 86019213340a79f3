use anyhow::{Context, Result};
use tracing::info;

use crate::source::traits::ArchiveSource;

/// Resolve a study into the ordered list of its instance identifiers.
///
/// Instances are listed series by series, in the order the archive returns them.
pub async fn expand_study(source: &dyn ArchiveSource, study_id: &str) -> Result<Vec<String>> {
    let series = source
        .list_series(study_id)
        .await
        .with_context(|| format!("listing series for study {}", study_id))?;

    let instances: Vec<String> = series.into_iter().flat_map(|s| s.instances).collect();

    info!("found {} instances for study {}", instances.len(), study_id);
    Ok(instances)
}
