//! The transactional unit of work.
//!
//! A [`UnitOfWork`] wraps one SQLite transaction and adds the two things
//! the event layer needs from its host: before-commit hooks and a doom flag.
//!
//! Hooks run in registration order inside [`UnitOfWork::commit`], before the
//! SQLite `COMMIT` is issued. A hook that fails, or leaves the unit doomed,
//! turns the commit into a rollback. Rolling back (explicitly or by dropping
//! the unit) never runs the hooks; they are dropped instead.

use std::cell::Cell;
use std::ops::Deref;

use rusqlite::{Connection, Transaction};
use thiserror::Error;

/// Marks a unit of work as failed.
///
/// Once doomed, a unit of work can only roll back. Hooks receive the flag so
/// they can veto a commit that is already in progress.
#[derive(Debug, Default)]
pub struct DoomFlag(Cell<bool>);

impl DoomFlag {
    /// Requests that the unit of work abort instead of committing.
    pub fn doom(&self) {
        self.0.set(true);
    }

    /// Whether [`doom`](Self::doom) has been called.
    pub fn is_doomed(&self) -> bool {
        self.0.get()
    }
}

/// A callback run just before the unit of work commits.
pub type BeforeCommitHook<'conn, E> = Box<dyn FnOnce(&DoomFlag) -> Result<(), E> + 'conn>;

/// Errors returned by [`UnitOfWork::commit`].
#[derive(Debug, Error)]
pub enum CommitError<E> {
    /// A before-commit hook failed; the unit of work was rolled back.
    #[error("before-commit hook aborted the unit of work: {0}")]
    Hook(E),

    /// The unit of work was doomed; it was rolled back.
    #[error("unit of work was doomed and rolled back")]
    Doomed,

    /// The underlying SQLite commit failed.
    #[error("commit failed: {0}")]
    Database(#[from] rusqlite::Error),
}

/// One transaction plus its before-commit hooks.
///
/// Derefs to [`Connection`] so store functions run inside the transaction.
pub struct UnitOfWork<'conn, E> {
    tx: Transaction<'conn>,
    hooks: Vec<BeforeCommitHook<'conn, E>>,
    doom: DoomFlag,
}

impl<'conn, E> UnitOfWork<'conn, E> {
    /// Begins a new unit of work on the given connection.
    ///
    /// # Errors
    ///
    /// Returns the SQLite error if `BEGIN` fails.
    pub fn begin(conn: &'conn mut Connection) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            tx: conn.transaction()?,
            hooks: Vec::new(),
            doom: DoomFlag::default(),
        })
    }

    /// Registers a hook to run before the commit is finalized.
    pub fn add_before_commit_hook<F>(&mut self, hook: F)
    where
        F: FnOnce(&DoomFlag) -> Result<(), E> + 'conn,
    {
        self.hooks.push(Box::new(hook));
    }

    /// Number of hooks waiting for commit.
    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// Marks the unit of work so that [`commit`](Self::commit) rolls back.
    pub fn doom(&self) {
        self.doom.doom();
    }

    /// Whether the unit of work has been doomed.
    pub fn is_doomed(&self) -> bool {
        self.doom.is_doomed()
    }

    /// Runs the before-commit hooks, then commits.
    ///
    /// The first failing hook dooms the unit; the remaining hooks are dropped
    /// without running.
    ///
    /// # Errors
    ///
    /// - `CommitError::Hook` if a hook failed (the unit was rolled back),
    /// - `CommitError::Doomed` if the unit was doomed (rolled back),
    /// - `CommitError::Database` if SQLite refused the commit.
    pub fn commit(mut self) -> Result<(), CommitError<E>> {
        let hooks = std::mem::take(&mut self.hooks);
        let mut failure = None;

        for hook in hooks {
            if let Err(err) = hook(&self.doom) {
                self.doom.doom();
                failure = Some(err);
                break;
            }
        }

        if self.doom.is_doomed() {
            if let Err(e) = self.tx.rollback() {
                tracing::error!(error = %e, "rollback of doomed unit of work failed");
            }
            return Err(failure.map_or(CommitError::Doomed, CommitError::Hook));
        }

        self.tx.commit()?;
        Ok(())
    }

    /// Rolls back without running any hook.
    ///
    /// # Errors
    ///
    /// Returns the SQLite error if `ROLLBACK` fails.
    pub fn rollback(self) -> Result<(), rusqlite::Error> {
        tracing::debug!(
            dropped_hooks = self.hooks.len(),
            "rolling back unit of work"
        );
        self.tx.rollback()
    }
}

impl<E> Deref for UnitOfWork<'_, E> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn scratch() -> Connection {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        conn.execute_batch("CREATE TABLE sample (value INTEGER NOT NULL);")
            .expect("should create sample table");
        conn
    }

    fn sample_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM sample", [], |row| row.get(0))
            .expect("should count sample rows")
    }

    #[test]
    fn commit_runs_hooks_in_order_then_persists() {
        let mut conn = scratch();
        let calls = Rc::new(std::cell::RefCell::new(Vec::new()));

        let mut uow: UnitOfWork<'_, String> = UnitOfWork::begin(&mut conn).expect("begin");
        uow.execute("INSERT INTO sample (value) VALUES (1)", [])
            .expect("insert");
        for n in 1..=3 {
            let calls = Rc::clone(&calls);
            uow.add_before_commit_hook(move |_| {
                calls.borrow_mut().push(n);
                Ok(())
            });
        }
        assert_eq!(uow.hook_count(), 3);

        uow.commit().expect("commit should succeed");
        assert_eq!(*calls.borrow(), vec![1, 2, 3]);
        assert_eq!(sample_count(&conn), 1);
    }

    #[test]
    fn failing_hook_rolls_back_and_skips_later_hooks() {
        let mut conn = scratch();
        let later_ran = Rc::new(Cell::new(false));

        let mut uow: UnitOfWork<'_, String> = UnitOfWork::begin(&mut conn).expect("begin");
        uow.execute("INSERT INTO sample (value) VALUES (1)", [])
            .expect("insert");
        uow.add_before_commit_hook(|_| Err("vetoed".to_string()));
        let flag = Rc::clone(&later_ran);
        uow.add_before_commit_hook(move |_| {
            flag.set(true);
            Ok(())
        });

        match uow.commit() {
            Err(CommitError::Hook(msg)) => assert_eq!(msg, "vetoed"),
            other => panic!("expected hook failure, got {other:?}"),
        }
        assert!(!later_ran.get());
        assert_eq!(sample_count(&conn), 0);
    }

    #[test]
    fn hook_can_doom_without_failing() {
        let mut conn = scratch();

        let mut uow: UnitOfWork<'_, String> = UnitOfWork::begin(&mut conn).expect("begin");
        uow.execute("INSERT INTO sample (value) VALUES (1)", [])
            .expect("insert");
        uow.add_before_commit_hook(|doom| {
            doom.doom();
            Ok(())
        });

        assert!(matches!(uow.commit(), Err(CommitError::Doomed)));
        assert_eq!(sample_count(&conn), 0);
    }

    #[test]
    fn rollback_never_runs_hooks() {
        let mut conn = scratch();
        let ran = Rc::new(Cell::new(false));

        let mut uow: UnitOfWork<'_, String> = UnitOfWork::begin(&mut conn).expect("begin");
        uow.execute("INSERT INTO sample (value) VALUES (1)", [])
            .expect("insert");
        let flag = Rc::clone(&ran);
        uow.add_before_commit_hook(move |_| {
            flag.set(true);
            Ok(())
        });

        uow.rollback().expect("rollback should succeed");
        assert!(!ran.get());
        assert_eq!(sample_count(&conn), 0);
    }

    #[test]
    fn dropping_an_open_unit_rolls_back() {
        let mut conn = scratch();
        {
            let uow: UnitOfWork<'_, String> = UnitOfWork::begin(&mut conn).expect("begin");
            uow.execute("INSERT INTO sample (value) VALUES (1)", [])
                .expect("insert");
        }
        assert_eq!(sample_count(&conn), 0);
    }

    #[test]
    fn doomed_unit_refuses_to_commit() {
        let mut conn = scratch();
        let uow: UnitOfWork<'_, String> = UnitOfWork::begin(&mut conn).expect("begin");
        uow.doom();
        assert!(uow.is_doomed());
        assert!(matches!(uow.commit(), Err(CommitError::Doomed)));
    }
}
