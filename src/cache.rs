use crate::error::GridResult;
use crate::flows::OperatingPoint;
use crate::model::GridModel;
use crate::sbus::Injection;
use crate::traits::PowerFlow;

use std::collections::HashMap;
use std::sync::Arc;

/// Identifies one power flow: the grid fingerprint plus the exact bit
/// pattern of the injection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub grid: u64,
    pub injection: Vec<u64>,
}

impl CacheKey {
    pub fn new(model: &GridModel, injection: &Injection) -> Self {
        let injection = injection
            .wye
            .iter()
            .chain(injection.delta.iter())
            .flat_map(|s| [s.re.to_bits(), s.im.to_bits()])
            .collect();
        CacheKey {
            grid: model.fingerprint(),
            injection,
        }
    }
}

/// Caller-owned cache of solved operating points.
///
/// Results are stored as `Arc` so hits are cheap to hand out. Entries of a
/// grid must be invalidated by the caller when that grid is rebuilt with a
/// different definition (the fingerprint changes, so stale entries are
/// never returned, only kept).
#[derive(Debug, Default)]
pub struct OperatingPointCache {
    entries: HashMap<CacheKey, Arc<OperatingPoint>>,
}

impl OperatingPointCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, model: &GridModel, injection: &Injection) -> Option<Arc<OperatingPoint>> {
        self.entries.get(&CacheKey::new(model, injection)).cloned()
    }

    pub fn insert(&mut self, model: &GridModel, op: OperatingPoint) -> Arc<OperatingPoint> {
        let key = CacheKey::new(model, &op.injection);
        let op = Arc::new(op);
        self.entries.insert(key, op.clone());
        op
    }

    /// Returns the cached operating point or solves and stores it. Failed
    /// solves are not cached.
    pub fn get_or_solve(
        &mut self,
        model: &GridModel,
        injection: &Injection,
        pf: &dyn PowerFlow,
    ) -> GridResult<Arc<OperatingPoint>> {
        if let Some(op) = self.get(model, injection) {
            log::trace!("operating point cache hit for '{}'", model.name());
            return Ok(op);
        }
        let op = pf.solve(model, injection)?;
        Ok(self.insert(model, op))
    }

    /// Drops all entries of the grid with fingerprint `grid`.
    pub fn invalidate(&mut self, grid: u64) {
        self.entries.retain(|key, _| key.grid != grid);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
