//! Integration tests against a real MySQL instance.
//!
//! Run with `cargo test -p klaxon-db --features integration` and a
//! `KLAXON_TEST_DATABASE_URL` pointing at a disposable database.
#![cfg(feature = "integration")]

use klaxon_db::{Db, DbConfig};

async fn test_db() -> Db {
    let url = std::env::var("KLAXON_TEST_DATABASE_URL")
        .expect("KLAXON_TEST_DATABASE_URL must point at a disposable database");
    let mut config = DbConfig::new(url);
    config.run_migrations = true;
    Db::connect(&config).await.expect("connect")
}

async fn seed_reference_data(db: &Db) {
    for statement in [
        "INSERT IGNORE INTO `mode` (`id`, `name`) VALUES (1, 'email'), (2, 'sms'), (3, 'call'), (4, 'im')",
        "INSERT IGNORE INTO `priority` (`id`, `name`, `mode_id`) VALUES (1, 'low', 1), (2, 'high', 2), (3, 'urgent', 3)",
        "INSERT IGNORE INTO `target_type` (`id`, `name`) VALUES (1, 'user'), (2, 'team')",
        "INSERT IGNORE INTO `target` (`id`, `name`, `type_id`, `active`) VALUES (1, 'alice', 1, 1), (2, 'bob', 1, 1), (3, 'payments', 2, 1)",
        "INSERT IGNORE INTO `user_team` (`user_id`, `team_id`) VALUES (1, 3), (2, 3)",
        "INSERT IGNORE INTO `target_role` (`id`, `name`, `type_id`) VALUES (1, 'user', 1), (2, 'team', 2)",
        "INSERT IGNORE INTO `target_contact` (`target_id`, `mode_id`, `destination`)
         VALUES (1, 1, 'alice@example.com'), (1, 2, '+15550000001'), (2, 1, 'bob@example.com')",
        "INSERT IGNORE INTO `application` (`id`, `name`, `key`) VALUES (1, 'grafana', 'app-key')",
        "INSERT IGNORE INTO `plan` (`id`, `name`, `creator`, `created`, `step_count`,
            `threshold_window`, `threshold_count`, `aggregation_window`, `aggregation_reset`)
         VALUES (1, 'db-plan', 'alice', NOW(), 2, 900, 10, 300, 300)",
        "INSERT IGNORE INTO `plan_active` (`name`, `plan_id`) VALUES ('db-plan', 1)",
        "INSERT IGNORE INTO `plan_notification` (`id`, `plan_id`, `step`, `priority_id`,
            `target_id`, `role_id`, `template`, `repeat`, `wait`)
         VALUES (1, 1, 1, 2, 1, 1, 'outage', 0, 30), (2, 1, 2, 2, 2, 1, 'outage', 1, 10)",
    ] {
        sqlx::query(statement).execute(db.pool()).await.expect(statement);
    }
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let db = test_db().await;
    klaxon_db::migrations::run_migrations(db.pool()).await.unwrap();
    klaxon_db::migrations::run_migrations(db.pool()).await.unwrap();
}

#[tokio::test]
async fn new_incident_flows_through_message_lifecycle() {
    let db = test_db().await;
    seed_reference_data(&db).await;

    sqlx::query(
        "INSERT INTO `incident` (`plan_id`, `application_id`, `context`, `created`, `current_step`, `active`)
         VALUES (1, 1, '{\"service\": \"api\"}', NOW(), 0, 1)",
    )
    .execute(db.pool())
    .await
    .unwrap();

    let new = db.new_incidents().await.unwrap();
    let incident = new.iter().find(|row| row.plan_id == 1).expect("new incident visible");
    assert_eq!(incident.application, "grafana");

    let message_id = db
        .insert_message(1, 1, incident.id, 1, 1, 2, "")
        .await
        .unwrap();
    db.set_incident_step(incident.id, 1).await.unwrap();

    let unsent = db.unsent_messages(&[]).await.unwrap();
    let row = unsent
        .iter()
        .find(|row| row.message_id == message_id)
        .expect("inserted message polled");
    assert_eq!(row.target, "alice");
    assert_eq!(row.priority, "high");
    assert_eq!(row.template.as_deref(), Some("outage"));

    // Excluding the id hides it from the poll.
    let excluded = db.unsent_messages(&[message_id]).await.unwrap();
    assert!(excluded.iter().all(|row| row.message_id != message_id));

    let mut payload = row.clone().into_payload();
    payload.destination = Some("alice@example.com".to_owned());
    payload.mode_id = Some(1);
    payload.subject = Some("api down".to_owned());
    db.mark_message_sent(&payload).await.unwrap();

    let active = db.active_message_ids(&[message_id]).await.unwrap();
    assert!(active.is_empty(), "sent message is inactive");
}

#[tokio::test]
async fn contact_cascade_and_fallback() {
    let db = test_db().await;
    seed_reference_data(&db).await;

    // Priority `high` defaults to sms; alice has an sms contact.
    let contact = db
        .contact_by_priority("alice", "grafana", 2)
        .await
        .unwrap()
        .expect("alice resolvable");
    assert_eq!(contact.mode, "sms");
    assert_eq!(contact.destination, "+15550000001");

    // Bob has no sms contact: the cascade finds nothing and the caller
    // falls back by mode name.
    assert!(db.contact_by_priority("bob", "grafana", 2).await.unwrap().is_none());
    let fallback = db
        .contact_for_mode_name("bob", "email")
        .await
        .unwrap()
        .expect("bob has email");
    assert_eq!(fallback.destination, "bob@example.com");
}

#[tokio::test]
async fn reference_loads_shape() {
    let db = test_db().await;
    seed_reference_data(&db).await;

    let plans = db.load_plans().await.unwrap();
    assert!(plans.iter().any(|plan| plan.name == "db-plan"));

    let notifications = db.load_plan_notifications().await.unwrap();
    assert!(notifications.iter().any(|n| n.plan_id == 1 && n.step == 2 && n.repeat == 1));

    let memberships = db.load_team_memberships().await.unwrap();
    assert!(memberships.contains(&("payments".to_owned(), "alice".to_owned())));
}
