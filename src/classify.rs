use anyhow::Result;

use state::{State, StateStore};

use crate::fs::Fs;
use crate::pipeline::{Pipeline, Readiness, SkipReason};
use crate::unit::WorkUnit;

/// Decide what to do with a candidate unit. The first matching rule wins:
///
/// 1. unit finished -> skip
/// 2. unit started -> skip
/// 3. unit ambiguous, or a job marker exists without a unit marker -> skip, loudly
/// 4. otherwise the pipeline checks inputs and parses the unit's manifest
///
/// Nothing is cached between calls; every rule re-reads the filesystem.
pub fn classify<P: Pipeline>(
    store: &dyn StateStore,
    fs: &Fs,
    pipeline: &P,
    unit: &WorkUnit,
) -> Result<Readiness<P::Inputs>> {
    let id = unit.id.as_str();
    match store.get(id)? {
        State::Finished => return Ok(Readiness::Skip(SkipReason::AlreadyFinished)),
        State::Started => return Ok(Readiness::Skip(SkipReason::InProgress)),
        State::Ambiguous => {
            log::warn!("{id}: submission state is ambiguous; resolve with --resolve {id}=submitted|absent");
            return Ok(Readiness::Skip(SkipReason::Ambiguous));
        }
        State::Absent => {}
    }

    for marker in [fs.job_started(id), fs.job_finished(id)] {
        if fs.exists(&marker) {
            log::warn!(
                "{id}: job marker {marker:?} exists but the unit was never marked started; \
                 resolve with --resolve {id}=submitted|absent"
            );
            return Ok(Readiness::Skip(SkipReason::Ambiguous));
        }
    }

    pipeline.inspect(unit)
}
