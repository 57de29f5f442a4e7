use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use slotkeeper::auth::Credentials;
use slotkeeper::tenant::TenantManager;
use slotkeeper::wire;

// 2026-01-01T00:00:00Z
const DAY: i64 = 1_767_225_600_000;
const HOUR: i64 = 3_600_000;

// ── Test infrastructure ──────────────────────────────────────

fn credentials() -> Arc<Credentials> {
    Arc::new(Credentials {
        admin_user: "admin".into(),
        guest_user: "guest".into(),
        password: "slotkeeper".into(),
        guest_password: "guest".into(),
    })
}

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("slotkeeper_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000));

    let tm2 = tm.clone();
    let creds = credentials();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            let creds = creds.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, creds, None).await;
            });
        }
    });

    (addr, tm)
}

async fn try_connect(
    addr: SocketAddr,
    user: &str,
    password: &str,
) -> Result<Client, tokio_postgres::Error> {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("clinic")
        .user(user)
        .password(password);

    let (client, conn) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        let _ = conn.await;
    });
    Ok(client)
}

async fn connect(addr: SocketAddr, user: &str) -> Client {
    let password = if user == "guest" { "guest" } else { "slotkeeper" };
    try_connect(addr, user, password).await.unwrap()
}

fn rows(messages: Vec<SimpleQueryMessage>) -> Vec<SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn query_rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    rows(client.simple_query(sql).await.unwrap())
}

fn sqlstate(err: &tokio_postgres::Error) -> &str {
    err.code().map(|c| c.code()).unwrap_or("")
}

async fn expect_sqlstate(client: &Client, sql: &str, code: &str) {
    let err = client.simple_query(sql).await.unwrap_err();
    assert_eq!(sqlstate(&err), code, "{sql}: {err:?}");
}

/// Admin creates `alice`; returns (admin, alice, guest) clients.
async fn clinic_with_alice(addr: SocketAddr) -> (Client, Client, Client) {
    let admin = connect(addr, "admin").await;
    admin
        .batch_execute("INSERT INTO hosts (slug, email) VALUES ('alice', 'alice@example.com')")
        .await
        .unwrap();
    let alice = connect(addr, "alice").await;
    let guest = connect(addr, "guest").await;
    (admin, alice, guest)
}

fn booking_sql(start: i64, end: i64, name: &str) -> String {
    format!(
        r#"INSERT INTO bookings (slug, start, "end", guest_name, guest_email) VALUES ('alice', {start}, {end}, '{name}', 'guest@example.com')"#
    )
}

fn block_sql(start: i64, end: i64) -> String {
    format!(r#"INSERT INTO blocks (slug, start, "end") VALUES ('alice', {start}, {end})"#)
}

fn availability_sql(start: i64, end: i64) -> String {
    format!(
        r#"SELECT * FROM availability WHERE slug = 'alice' AND start >= {start} AND "end" <= {end}"#
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn admin_creates_and_lists_hosts() {
    let (addr, _tm) = start_test_server().await;
    let admin = connect(addr, "admin").await;

    let created = query_rows(
        &admin,
        "INSERT INTO hosts (slug, email) VALUES ('bob', 'bob@example.com')",
    )
    .await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].get("slug"), Some("bob"));
    assert_eq!(created[0].get("email"), Some("bob@example.com"));

    admin.batch_execute("INSERT INTO hosts (slug) VALUES ('alice')").await.unwrap();

    let guest = connect(addr, "guest").await;
    let hosts = query_rows(&guest, "SELECT * FROM hosts").await;
    let slugs: Vec<_> = hosts.iter().map(|r| r.get("slug").unwrap()).collect();
    assert_eq!(slugs, vec!["alice", "bob"]);
    assert_eq!(hosts[0].get("email"), None);

    expect_sqlstate(&admin, "INSERT INTO hosts (slug) VALUES ('bob')", "23505").await;
    expect_sqlstate(&admin, "INSERT INTO hosts (slug) VALUES ('no spaces')", "22023").await;
}

#[tokio::test]
async fn only_admin_manages_hosts() {
    let (addr, _tm) = start_test_server().await;
    let (admin, alice, guest) = clinic_with_alice(addr).await;

    expect_sqlstate(&guest, "INSERT INTO hosts (slug) VALUES ('mallory')", "42501").await;
    expect_sqlstate(&alice, "DELETE FROM hosts WHERE slug = 'alice'", "42501").await;

    admin.batch_execute("DELETE FROM hosts WHERE slug = 'alice'").await.unwrap();
    assert!(query_rows(&guest, "SELECT * FROM hosts").await.is_empty());
    expect_sqlstate(&guest, &availability_sql(DAY, DAY + 24 * HOUR), "P0002").await;
}

#[tokio::test]
async fn guest_books_and_second_booking_conflicts() {
    let (addr, _tm) = start_test_server().await;
    let (_admin, alice, guest) = clinic_with_alice(addr).await;

    let booked = query_rows(&guest, &booking_sql(DAY + 9 * HOUR, DAY + 10 * HOUR, "Ann")).await;
    assert_eq!(booked.len(), 1);
    assert_eq!(booked[0].get("status"), Some("CONFIRMED"));
    assert_eq!(booked[0].get("start"), Some("2026-01-01T09:00:00.000Z"));
    assert_eq!(booked[0].get("end"), Some("2026-01-01T10:00:00.000Z"));

    // Same slot from another guest connection
    let other = connect(addr, "guest").await;
    expect_sqlstate(
        &other,
        &booking_sql(DAY + 9 * HOUR + 30 * 60_000, DAY + 10 * HOUR + 30 * 60_000, "Bo"),
        "23P01",
    )
    .await;

    // Back-to-back is fine
    other
        .batch_execute(&booking_sql(DAY + 10 * HOUR, DAY + 11 * HOUR, "Bo"))
        .await
        .unwrap();

    let bookings = query_rows(&alice, "SELECT * FROM bookings WHERE slug = 'alice'").await;
    let names: Vec<_> = bookings.iter().map(|r| r.get("guest_name").unwrap()).collect();
    assert_eq!(names, vec!["Ann", "Bo"]);
}

#[tokio::test]
async fn concurrent_guests_get_exactly_one_booking() {
    let (addr, _tm) = start_test_server().await;
    let (_admin, alice, _guest) = clinic_with_alice(addr).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        handles.push(tokio::spawn(async move {
            let client = connect(addr, "guest").await;
            client
                .simple_query(&booking_sql(DAY + 14 * HOUR, DAY + 15 * HOUR, &format!("g{i}")))
                .await
                .map(|_| ())
        }));
    }

    let mut admitted = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(()) => admitted += 1,
            Err(e) => assert_eq!(sqlstate(&e), "23P01"),
        }
    }
    assert_eq!(admitted, 1);

    let bookings = query_rows(&alice, "SELECT * FROM bookings WHERE slug = 'alice'").await;
    assert_eq!(bookings.len(), 1);
}

#[tokio::test]
async fn host_blocks_time_and_guests_see_it() {
    let (addr, _tm) = start_test_server().await;
    let (_admin, alice, guest) = clinic_with_alice(addr).await;

    let block = query_rows(&alice, &block_sql(DAY + 12 * HOUR, DAY + 13 * HOUR)).await;
    assert_eq!(block.len(), 1);
    assert_eq!(block[0].get("kind"), Some("blocked"));
    let block_id = block[0].get("id").unwrap().to_string();

    expect_sqlstate(&guest, &booking_sql(DAY + 12 * HOUR, DAY + 12 * HOUR + 1, "Ann"), "23P01")
        .await;

    guest
        .batch_execute(&booking_sql(DAY + 9 * HOUR, DAY + 10 * HOUR, ""))
        .await
        .unwrap();

    let slots = query_rows(&guest, &availability_sql(DAY, DAY + 24 * HOUR)).await;
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0].get("kind"), Some("booking"));
    assert_eq!(slots[0].get("label"), Some("Booked"));
    assert_eq!(slots[1].get("kind"), Some("blocked"));
    assert_eq!(slots[1].get("label"), Some("Unavailable"));
    assert_eq!(slots[1].get("id"), Some(block_id.as_str()));

    alice
        .batch_execute(&format!("DELETE FROM blocks WHERE id = '{block_id}'"))
        .await
        .unwrap();
    expect_sqlstate(&alice, &format!("DELETE FROM blocks WHERE id = '{block_id}'"), "P0002")
        .await;

    guest
        .batch_execute(&booking_sql(DAY + 12 * HOUR, DAY + 13 * HOUR, "Ann"))
        .await
        .unwrap();
}

#[tokio::test]
async fn nested_block_replaces_existing() {
    let (addr, _tm) = start_test_server().await;
    let (_admin, alice, _guest) = clinic_with_alice(addr).await;

    alice.batch_execute(&block_sql(DAY + 10 * HOUR, DAY + 11 * HOUR)).await.unwrap();
    alice.batch_execute(&block_sql(DAY + 9 * HOUR, DAY + 12 * HOUR)).await.unwrap();

    let blocks = query_rows(&alice, "SELECT * FROM blocks WHERE slug = 'alice'").await;
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].get("start"), Some("2026-01-01T09:00:00.000Z"));
    assert_eq!(blocks[0].get("end"), Some("2026-01-01T12:00:00.000Z"));
}

#[tokio::test]
async fn dashboard_is_private_to_the_host() {
    let (addr, _tm) = start_test_server().await;
    let (admin, alice, guest) = clinic_with_alice(addr).await;
    admin.batch_execute("INSERT INTO hosts (slug) VALUES ('bob')").await.unwrap();
    let bob = connect(addr, "bob").await;

    let block = query_rows(&alice, &block_sql(DAY, DAY + HOUR)).await;
    let block_id = block[0].get("id").unwrap().to_string();

    expect_sqlstate(&guest, "SELECT * FROM bookings WHERE slug = 'alice'", "42501").await;
    expect_sqlstate(&bob, "SELECT * FROM blocks WHERE slug = 'alice'", "42501").await;
    expect_sqlstate(&bob, &block_sql(DAY, DAY + HOUR), "42501").await;
    expect_sqlstate(&bob, &format!("DELETE FROM blocks WHERE id = '{block_id}'"), "42501").await;
    expect_sqlstate(&guest, &block_sql(DAY + HOUR, DAY + 2 * HOUR), "42501").await;

    // The block survives the rejected deletes
    assert_eq!(query_rows(&alice, "SELECT * FROM blocks WHERE slug = 'alice'").await.len(), 1);
}

#[tokio::test]
async fn invalid_requests_report_sqlstates() {
    let (addr, _tm) = start_test_server().await;
    let (_admin, _alice, guest) = clinic_with_alice(addr).await;

    expect_sqlstate(&guest, "SELEC * FROM hosts", "42601").await;
    expect_sqlstate(&guest, "SELECT * FROM rooms", "42601").await;
    expect_sqlstate(&guest, "SELECT * FROM availability WHERE slug = 'alice'", "42601").await;
    expect_sqlstate(&guest, &booking_sql(DAY + HOUR, DAY, "Ann"), "22023").await;
    expect_sqlstate(&guest, &availability_sql(DAY + HOUR, DAY), "22023").await;
    expect_sqlstate(
        &guest,
        r#"SELECT * FROM availability WHERE slug = 'nobody' AND start >= 0 AND "end" <= 1000"#,
        "P0002",
    )
    .await;
}

#[tokio::test]
async fn extended_protocol_with_parameters() {
    let (addr, _tm) = start_test_server().await;
    let (_admin, _alice, guest) = clinic_with_alice(addr).await;

    let rows = guest
        .query(
            r#"INSERT INTO bookings (slug, start, "end", guest_name, guest_email, note) VALUES ($1, $2, $3, $4, $5, $6)"#,
            &[
                &"alice",
                &"2026-01-01T15:00:00Z",
                &"2026-01-01T16:00:00Z",
                &"O'Brien",
                &"ob@example.com",
                &"first visit, deposit $15 paid",
            ],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let name: String = rows[0].get("guest_name");
    assert_eq!(name, "O'Brien");
    let note: Option<String> = rows[0].get("note");
    assert_eq!(note.as_deref(), Some("first visit, deposit $15 paid"));

    let slots = guest
        .query(
            r#"SELECT * FROM availability WHERE slug = $1 AND start >= $2 AND "end" <= $3"#,
            &[&"alice", &"2026-01-01", &"2026-01-02"],
        )
        .await
        .unwrap();
    assert_eq!(slots.len(), 1);
    let start: String = slots[0].get("start");
    assert_eq!(start, "2026-01-01T15:00:00.000Z");
    let label: String = slots[0].get("label");
    assert_eq!(label, "O'Brien");
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let (addr, _tm) = start_test_server().await;
    assert!(try_connect(addr, "admin", "guest").await.is_err());
    assert!(try_connect(addr, "guest", "slotkeeper").await.is_err());
    assert!(try_connect(addr, "alice", "slotkeeper").await.is_ok());
}

#[tokio::test]
async fn tenants_are_separate_databases() {
    let (addr, tm) = start_test_server().await;
    let (_admin, _alice, _guest) = clinic_with_alice(addr).await;

    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("other_clinic")
        .user("guest")
        .password("guest");
    let (client, conn) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = conn.await;
    });

    assert!(query_rows(&client, "SELECT * FROM hosts").await.is_empty());
    assert_eq!(tm.tenant_count(), 2);
}
