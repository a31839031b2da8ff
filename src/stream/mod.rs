//! Stream combinators used by subscription sessions

mod coalesce;

pub use coalesce::{Coalesce, CoalesceExt};
