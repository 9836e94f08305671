use tracing::debug;

use crate::domain::{Accession, Layout, UnknownLayoutPolicy};
use crate::error::KiraError;
use crate::metadata::RunInfoTable;

pub fn resolve_run_layout(run: &Accession, table: &RunInfoTable, forced: Option<Layout>) -> Layout {
    if let Some(layout) = forced {
        return layout;
    }
    table
        .find_run(run)
        .map(|row| Layout::from_runinfo(&row.layout))
        .unwrap_or(Layout::Unknown)
}

pub fn expand_experiment(
    experiment: &Accession,
    table: &RunInfoTable,
    forced: Option<Layout>,
) -> Vec<(Accession, Layout)> {
    table
        .experiment_rows(experiment)
        .filter_map(|row| match row.run.parse::<Accession>() {
            Ok(run) => {
                let layout = forced.unwrap_or_else(|| Layout::from_runinfo(&row.layout));
                Some((run, layout))
            }
            Err(_) => {
                debug!("ignoring runinfo row with unusable run id {:?}", row.run);
                None
            }
        })
        .collect()
}

pub fn apply_unknown_policy(
    run: &Accession,
    layout: Layout,
    policy: UnknownLayoutPolicy,
) -> Result<Layout, KiraError> {
    match (layout, policy) {
        (Layout::Unknown, UnknownLayoutPolicy::AssumeSingle) => Ok(Layout::Single),
        (Layout::Unknown, UnknownLayoutPolicy::AssumePaired) => Ok(Layout::Paired),
        (Layout::Unknown, UnknownLayoutPolicy::Fail) => {
            Err(KiraError::UnresolvedLayout(run.to_string()))
        }
        (known, _) => Ok(known),
    }
}
