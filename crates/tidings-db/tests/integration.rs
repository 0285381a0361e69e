use serde_json::json;
use tidings_db::records::{create_record, list_records};
use tidings_db::{create_pool, run_migrations, CommitError, DbRuntimeSettings, UnitOfWork};

fn file_pool(dir: &tempfile::TempDir) -> tidings_db::DbPool {
    let path = dir.path().join("records.db");
    let pool = create_pool(
        path.to_str().expect("utf-8 path"),
        DbRuntimeSettings::default(),
    )
    .expect("failed to create pool");
    let conn = pool.get().expect("failed to get connection");
    run_migrations(&conn).expect("failed to run migrations");
    pool
}

#[test]
fn committed_unit_is_visible_from_another_connection() {
    let dir = tempfile::tempdir().expect("temp dir");
    let pool = file_pool(&dir);

    {
        let mut conn = pool.get().expect("writer connection");
        let uow: UnitOfWork<'_, String> = UnitOfWork::begin(&mut conn).expect("begin");
        create_record(&uow, "widgets", &json!({"id": "1"})).expect("create");
        uow.commit().expect("commit");
    }

    let reader = pool.get().expect("reader connection");
    let records = list_records(&reader, "widgets").expect("list");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["id"], "1");
}

#[test]
fn vetoed_unit_leaves_nothing_behind() {
    let dir = tempfile::tempdir().expect("temp dir");
    let pool = file_pool(&dir);

    {
        let mut conn = pool.get().expect("writer connection");
        let mut uow: UnitOfWork<'_, String> = UnitOfWork::begin(&mut conn).expect("begin");
        create_record(&uow, "widgets", &json!({"id": "1"})).expect("create");
        uow.add_before_commit_hook(|doom| {
            doom.doom();
            Err("listener refused".to_string())
        });
        assert!(matches!(uow.commit(), Err(CommitError::Hook(_))));
    }

    let reader = pool.get().expect("reader connection");
    assert!(list_records(&reader, "widgets").expect("list").is_empty());
}
