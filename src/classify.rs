use crate::domain::{AccessionKind, BatchMode, SpeciesBatch};
use crate::error::KiraError;

pub fn classify_batch(batch: &SpeciesBatch) -> Result<BatchMode, KiraError> {
    let first = batch
        .accessions
        .first()
        .ok_or_else(|| KiraError::EmptyBatch(batch.name.clone()))?;
    let mode = match first.kind() {
        AccessionKind::Run => BatchMode::Run,
        AccessionKind::Experiment => BatchMode::Experiment,
        AccessionKind::Invalid => {
            return Err(KiraError::UnknownAccessionPrefix(first.to_string()));
        }
    };

    if let Some(stray) = batch
        .accessions
        .iter()
        .skip(1)
        .find(|acc| acc.kind() != mode.kind())
    {
        return Err(KiraError::MixedAccessions {
            species: batch.name.clone(),
            accession: stray.to_string(),
            expected: mode.to_string(),
        });
    }
    Ok(mode)
}
