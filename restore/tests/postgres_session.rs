#![cfg(feature = "test-utils")]

use std::sync::Arc;

use config::shared::{PgConnectionConfig, RestoreConfig, TransformerConfig};
use pg_escape::{quote_identifier, quote_literal};
use postgres::schema::TableName;
use postgres::tokio::test_utils::PgDatabase;
use restore::catalog::CatalogEntry;
use restore::concurrency::shutdown::create_shutdown_channel;
use restore::destination::postgres::PgDestination;
use restore::destination::{Destination, DestinationTransaction};
use restore::error::ErrorKind;
use restore::restorers::{RestoreBase, SessionState, TableDataRestorer};
use restore::storage::LocalStore;
use restore::test_utils::database::spawn_destination_database;
use restore::test_utils::fixtures::{gzip, table_data_entry};
use restore::transformers::{RANDOM_INT_TRANSFORMER_NAME, TransformerRegistry};
use telemetry::tracing::init_test_tracing;

const TRIGGER: &str = "trg_set_order_date";

const TRIGGER_STATE_QUERY: &str = "select t.tgenabled::text from pg_trigger t \
     join pg_class c on c.oid = t.tgrelid \
     where c.relname = 'orders' and t.tgname = 'trg_set_order_date'";

fn orders() -> TableName {
    TableName::new("public", "orders")
}

/// Creates `public.orders` with a trigger that fills `order_date` on insert.
async fn create_orders(database: &PgDatabase) {
    database
        .create_table(
            &orders(),
            &[
                ("id", "integer primary key"),
                ("user_id", "integer"),
                ("order_date", "date"),
            ],
        )
        .await
        .unwrap();

    database
        .run_sql(
            "create function set_order_date() returns trigger language plpgsql as $$
             begin
                 new.order_date := current_date;
                 return new;
             end;
             $$;
             create trigger trg_set_order_date before insert on public.orders
                 for each row execute function set_order_date();",
        )
        .await
        .unwrap();
}

fn session_config(database: &PgDatabase) -> RestoreConfig {
    RestoreConfig {
        superuser: Some(database.config.username.clone()),
        disable_triggers: true,
        use_session_replication_role_replica: true,
        ..RestoreConfig::default()
    }
}

/// A login role without superuser rights that may `SET ROLE` to the test superuser but does
/// not inherit its privileges.
struct LoginRole {
    name: String,
    config: PgConnectionConfig,
}

impl LoginRole {
    async fn create(database: &PgDatabase) -> Self {
        let name = format!("non_super_user_{}", database.config.name.replace('-', "_"));
        let password = "restore_test_password";

        database
            .run_sql(&format!(
                "create role {role} login noinherit password {password};
                 grant {superuser} to {role};
                 grant usage on schema public to {role};
                 grant select, insert on public.orders to {role};",
                role = quote_identifier(&name),
                password = quote_literal(password),
                superuser = quote_identifier(&database.config.username),
            ))
            .await
            .unwrap();

        let config = PgConnectionConfig {
            username: name.clone(),
            password: Some(password.to_string().into()),
            ..database.config.clone()
        };

        Self { name, config }
    }

    async fn drop(self, database: &PgDatabase) {
        database
            .run_sql(&format!(
                "drop owned by {role}; drop role {role};",
                role = quote_identifier(&self.name)
            ))
            .await
            .unwrap();
    }
}

fn orders_entry() -> Arc<CatalogEntry> {
    let mut entry = table_data_entry(12, "public", "orders", &[]);
    entry.columns = Some(vec!["id".to_string(), "user_id".to_string()]);
    Arc::new(entry)
}

#[tokio::test(flavor = "multi_thread")]
async fn session_changes_are_undone_before_commit() {
    init_test_tracing();

    let database = spawn_destination_database().await;
    create_orders(&database).await;

    let destination = PgDestination::new(database.config.clone());
    let store = LocalStore::new(std::env::temp_dir());
    let mut base = RestoreBase::new(orders_entry(), store, Arc::new(session_config(&database)));

    let mut tx = destination.begin().await.unwrap();
    base.setup_session(&mut tx).await.unwrap();

    assert_eq!(base.state(), SessionState::ReplicaModeSet);
    assert_eq!(base.applied_steps().len(), 3);
    assert_eq!(
        tx.query_scalar(TRIGGER_STATE_QUERY).await.unwrap().as_deref(),
        Some("D")
    );
    assert_eq!(
        tx.query_scalar("show session_replication_role")
            .await
            .unwrap()
            .as_deref(),
        Some("replica")
    );

    base.teardown_session(&mut tx).await.unwrap();

    assert_eq!(base.state(), SessionState::RoleReset);
    assert!(base.applied_steps().is_empty());
    assert_eq!(
        tx.query_scalar(TRIGGER_STATE_QUERY).await.unwrap().as_deref(),
        Some("O")
    );
    assert_eq!(
        tx.query_scalar("show session_replication_role")
            .await
            .unwrap()
            .as_deref(),
        Some("origin")
    );
    assert_eq!(
        tx.query_scalar("select current_user").await.unwrap(),
        Some(database.config.username.clone())
    );

    tx.commit().await.unwrap();

    assert_eq!(database.trigger_state(&orders(), TRIGGER).await.unwrap(), "O");
}

#[tokio::test(flavor = "multi_thread")]
async fn table_data_is_loaded_without_firing_triggers() {
    init_test_tracing();

    let database = spawn_destination_database().await;
    create_orders(&database).await;

    let dump_dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dump_dir.path().join("12.dat.gz"),
        gzip(b"1\t10\n2\t\\N\n3\t30\n\\.\n"),
    )
    .unwrap();

    let destination = PgDestination::new(database.config.clone());
    let store = LocalStore::new(dump_dir.path());
    let base = RestoreBase::new(orders_entry(), store, Arc::new(session_config(&database)));

    let masking = TransformerConfig::new(RANDOM_INT_TRANSFORMER_NAME)
        .with_param("column", "user_id")
        .with_param("min", 100i64)
        .with_param("max", 200i64);
    let registry = Arc::new(TransformerRegistry::with_builtin().unwrap());
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let mut restorer = TableDataRestorer::new(base, registry, vec![masking], shutdown_rx);

    let tx = destination.begin().await.unwrap();
    let stats = restorer.restore(tx).await.unwrap();

    assert_eq!(stats.rows_loaded, 3);
    assert_eq!(restorer.base().state(), SessionState::Committed);

    let rows = database
        .client()
        .query("select id, user_id, order_date is null from public.orders order by id", &[])
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    for row in &rows {
        let id: i32 = row.get(0);
        let user_id: Option<i32> = row.get(1);
        let order_date_is_null: bool = row.get(2);

        match id {
            2 => assert_eq!(user_id, None),
            _ => assert!((100..=200).contains(&user_id.unwrap())),
        }
        assert!(order_date_is_null);
    }

    assert_eq!(database.trigger_state(&orders(), TRIGGER).await.unwrap(), "O");
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_load_leaves_the_table_and_triggers_untouched() {
    init_test_tracing();

    let database = spawn_destination_database().await;
    create_orders(&database).await;

    let dump_dir = tempfile::tempdir().unwrap();
    // The duplicated primary key fails the COPY.
    std::fs::write(
        dump_dir.path().join("12.dat.gz"),
        gzip(b"1\t10\n1\t11\n\\.\n"),
    )
    .unwrap();

    let destination = PgDestination::new(database.config.clone());
    let store = LocalStore::new(dump_dir.path());
    let base = RestoreBase::new(orders_entry(), store, Arc::new(session_config(&database)));

    let registry = Arc::new(TransformerRegistry::with_builtin().unwrap());
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let mut restorer = TableDataRestorer::new(base, registry, Vec::new(), shutdown_rx);

    let tx = destination.begin().await.unwrap();
    restorer.restore(tx).await.unwrap_err();

    assert_eq!(restorer.base().state(), SessionState::Aborted);

    let count: i64 = database
        .client()
        .query_one("select count(*) from public.orders", &[])
        .await
        .unwrap()
        .get(0);
    assert_eq!(count, 0);
    assert_eq!(database.trigger_state(&orders(), TRIGGER).await.unwrap(), "O");
}

#[tokio::test(flavor = "multi_thread")]
async fn unprivileged_login_switches_role_for_the_session() {
    init_test_tracing();

    let database = spawn_destination_database().await;
    create_orders(&database).await;
    let login = LoginRole::create(&database).await;

    let destination = PgDestination::new(login.config.clone());
    let store = LocalStore::new(std::env::temp_dir());
    let mut base = RestoreBase::new(orders_entry(), store, Arc::new(session_config(&database)));

    let mut tx = destination.begin().await.unwrap();
    assert_eq!(
        tx.query_scalar("select current_user").await.unwrap(),
        Some(login.name.clone())
    );

    base.setup_session(&mut tx).await.unwrap();

    assert_eq!(
        tx.query_scalar("select current_user").await.unwrap(),
        Some(database.config.username.clone())
    );
    assert_eq!(
        tx.query_scalar(TRIGGER_STATE_QUERY).await.unwrap().as_deref(),
        Some("D")
    );

    base.teardown_session(&mut tx).await.unwrap();

    assert_eq!(base.state(), SessionState::RoleReset);
    assert_eq!(
        tx.query_scalar(TRIGGER_STATE_QUERY).await.unwrap().as_deref(),
        Some("O")
    );
    assert_eq!(
        tx.query_scalar("select current_user").await.unwrap(),
        Some(login.name.clone())
    );

    tx.commit().await.unwrap();
    drop(destination);

    assert_eq!(database.trigger_state(&orders(), TRIGGER).await.unwrap(), "O");
    login.drop(&database).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unprivileged_login_without_role_switch_is_denied() {
    init_test_tracing();

    let database = spawn_destination_database().await;
    create_orders(&database).await;
    let login = LoginRole::create(&database).await;

    let destination = PgDestination::new(login.config.clone());
    let store = LocalStore::new(std::env::temp_dir());
    let config = RestoreConfig {
        superuser: None,
        ..session_config(&database)
    };
    let mut base = RestoreBase::new(orders_entry(), store, Arc::new(config));

    let mut tx = destination.begin().await.unwrap();
    let err = base.setup_session(&mut tx).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SessionSetupFailed);
    assert!(err.kinds().contains(&ErrorKind::PermissionDenied));
    assert_eq!(base.state(), SessionState::Aborted);
    assert!(base.applied_steps().is_empty());

    // The setup savepoint was rolled back, so the transaction is still usable.
    assert_eq!(
        tx.query_scalar(TRIGGER_STATE_QUERY).await.unwrap().as_deref(),
        Some("O")
    );

    tx.rollback().await.unwrap();
    drop(destination);

    assert_eq!(database.trigger_state(&orders(), TRIGGER).await.unwrap(), "O");
    login.drop(&database).await;
}
