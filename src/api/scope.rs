//! Scope composition over the driver.

use crate::config::Model;
use crate::driver::Driver;
use crate::error::AppError;
use std::sync::Arc;

/// Narrows a driver. Must hand back a driver over the same table.
pub type ScopeFn = Arc<dyn Fn(Driver) -> Result<Driver, AppError> + Send + Sync>;

/// Wrap an infallible driver transform.
pub fn scope<F>(f: F) -> ScopeFn
where
    F: Fn(Driver) -> Driver + Send + Sync + 'static,
{
    Arc::new(move |driver| Ok(f(driver)))
}

/// Wrap a fallible driver transform.
pub fn try_scope<F>(f: F) -> ScopeFn
where
    F: Fn(Driver) -> Result<Driver, AppError> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) fn apply_scope(model: &Model, driver: Driver, name: &str, scope: &ScopeFn) -> Result<Driver, AppError> {
    if !driver.is_driver_of(model) {
        return Err(AppError::Validation(format!(
            "scope '{}' was given a query over {}, expected {}",
            name,
            driver.model().qualified_table(),
            model.qualified_table()
        )));
    }
    let result = scope(driver)?;
    if !result.is_driver_of(model) {
        return Err(AppError::Validation(format!(
            "scope '{}' did not return a query over {}",
            name,
            model.qualified_table()
        )));
    }
    tracing::debug!(scope = %name, table = %model.table, "scope applied");
    Ok(result)
}

/// Left-fold `scopes` over `base`, stopping at the first failure.
pub(crate) fn compose<'a, I>(model: &Model, base: Driver, scopes: I) -> Result<Driver, AppError>
where
    I: IntoIterator<Item = (&'a String, &'a ScopeFn)>,
{
    scopes
        .into_iter()
        .try_fold(base, |driver, (name, f)| apply_scope(model, driver, name, f))
}

/// Memoized driver, keyed by the default-scope switch it was built under.
#[derive(Clone, Debug)]
pub(crate) struct CachedDriver {
    pub defaults_disabled: bool,
    pub driver: Driver,
}
