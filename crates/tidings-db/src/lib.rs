//! Database layer for Tidings.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! embedded SQL migrations, the [`UnitOfWork`] transactional context that
//! resource events are gated on, and the small record store the HTTP surface
//! reads and writes.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: no external database process. WAL mode allows
//!   concurrent readers with a single writer.
//! - **`r2d2` connection pool**: bounded connection reuse without manual
//!   lifetime management.
//! - **Before-commit hooks**: a [`UnitOfWork`] runs its hooks synchronously,
//!   before the SQLite `COMMIT`, so a hook can still doom and abort the unit.

mod migrations;
mod pool;
pub mod records;
mod unit;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
pub use records::StoreError;
pub use unit::{BeforeCommitHook, CommitError, DoomFlag, UnitOfWork};
