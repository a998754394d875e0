use crate::error::{GridError, GridResult};
use crate::flows::OperatingPoint;
use crate::linear::{linearize, LinearModel};
use crate::model::GridModel;
use crate::sbus::Injection;
use crate::traits::{LinearSolver, PowerFlow};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

fn thread_pool(threads: Option<usize>) -> GridResult<ThreadPool> {
    let mut builder = ThreadPoolBuilder::new();
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|err| GridError::Options(format!("building thread pool: {}", err)))
}

/// Solves power flow for every injection in parallel.
///
/// `new_pf` creates one backend per worker thread, so backends need not be
/// shareable. The model is shared by reference. Results keep input order;
/// `threads` of `None` uses rayon's default pool size.
pub fn solve_all<P, F>(
    model: &GridModel,
    injections: &[Injection],
    threads: Option<usize>,
    new_pf: F,
) -> GridResult<Vec<GridResult<OperatingPoint>>>
where
    P: PowerFlow,
    F: Fn() -> P + Sync + Send,
{
    let pool = thread_pool(threads)?;
    log::debug!(
        "solving {} power flows on {} threads",
        injections.len(),
        pool.current_num_threads()
    );
    Ok(pool.install(|| {
        injections
            .par_iter()
            .map_init(&new_pf, |pf, s| pf.solve(model, s))
            .collect()
    }))
}

/// Linearizes the grid around every operating point in parallel.
pub fn linearize_all<S, F>(
    model: &GridModel,
    points: &[OperatingPoint],
    threads: Option<usize>,
    new_solver: F,
) -> GridResult<Vec<GridResult<LinearModel>>>
where
    S: LinearSolver,
    F: Fn() -> S + Sync + Send,
{
    let pool = thread_pool(threads)?;
    Ok(pool.install(|| {
        points
            .par_iter()
            .map_init(&new_solver, |solver, op| linearize(model, op, &*solver))
            .collect()
    }))
}
