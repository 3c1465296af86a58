use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use codecollab::errors::AppError;
use codecollab::models::CollaboratorRole;
use codecollab::realtime::hub::EventReceiver;
use codecollab::realtime::{Hub, ServerEvent};
use codecollab::services::{AccessOracle, ChatRetention, ChatService};
use codecollab::test_utils::{add_test_collaborator, create_test_database, create_test_project, create_test_user};
use sqlx::SqlitePool;

async fn message_count(pool: &SqlitePool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages").fetch_one(pool).await?)
}

fn drain(receiver: &mut EventReceiver) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_message_is_sanitized_persisted_and_echoed_to_sender() -> Result<()> {
    let pool = create_test_database().await?;
    let hub = Arc::new(Hub::new());
    let chat = ChatService::new(pool.clone(), AccessOracle::new(pool.clone()), hub.clone(), Duration::from_millis(500));

    let alice = create_test_user(&pool, "alice").await?;
    let bob = create_test_user(&pool, "bob").await?;
    let project = create_test_project(&pool, &alice, "Chatty").await?;
    add_test_collaborator(&pool, &project, &bob, CollaboratorRole::Viewer).await?;

    let (alice_conn, mut alice_rx) = hub.register(alice.id, "alice").await;
    let (bob_conn, mut bob_rx) = hub.register(bob.id, "bob").await;
    hub.join(alice_conn, project.id).await;
    hub.join(bob_conn, project.id).await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    let message = chat.send(alice.id, project.id, "  <script>hi</script>  ").await?;
    assert_eq!(message.message, "scripthi/script");
    assert_eq!(message.username, "alice");

    for rx in [&mut alice_rx, &mut bob_rx] {
        assert!(matches!(&drain(rx)[..], [ServerEvent::ChatMessage(m)] if m.id == message.id));
    }
    assert_eq!(message_count(&pool).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_rate_limit_rejects_fast_second_message() -> Result<()> {
    let pool = create_test_database().await?;
    let hub = Arc::new(Hub::new());
    let chat = ChatService::new(pool.clone(), AccessOracle::new(pool.clone()), hub, Duration::from_millis(200));

    let alice = create_test_user(&pool, "alice").await?;
    let project = create_test_project(&pool, &alice, "Chatty").await?;

    chat.send(alice.id, project.id, "first").await?;
    let second = chat.send(alice.id, project.id, "second").await;
    assert!(matches!(second, Err(AppError::RateLimited)));
    assert_eq!(message_count(&pool).await?, 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    chat.send(alice.id, project.id, "third").await?;
    assert_eq!(message_count(&pool).await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_failed_insert_does_not_consume_rate_limit() -> Result<()> {
    let pool = create_test_database().await?;
    let hub = Arc::new(Hub::new());
    let chat = ChatService::new(pool.clone(), AccessOracle::new(pool.clone()), hub, Duration::from_secs(60));

    let alice = create_test_user(&pool, "alice").await?;
    let project = create_test_project(&pool, &alice, "Chatty").await?;

    sqlx::query(
        "CREATE TRIGGER reject_chat BEFORE INSERT ON chat_messages BEGIN SELECT RAISE(ABORT, 'disk full'); END",
    )
    .execute(&pool)
    .await?;
    let failed = chat.send(alice.id, project.id, "lost").await;
    assert!(matches!(failed, Err(AppError::Database(_))));
    assert_eq!(message_count(&pool).await?, 0);

    sqlx::query("DROP TRIGGER reject_chat").execute(&pool).await?;
    chat.send(alice.id, project.id, "retry").await?;
    assert_eq!(message_count(&pool).await?, 1);
    assert!(matches!(chat.send(alice.id, project.id, "again").await, Err(AppError::RateLimited)));
    Ok(())
}

#[tokio::test]
async fn test_outsiders_and_empty_messages_are_rejected() -> Result<()> {
    let pool = create_test_database().await?;
    let hub = Arc::new(Hub::new());
    let chat = ChatService::new(pool.clone(), AccessOracle::new(pool.clone()), hub, Duration::from_millis(500));

    let alice = create_test_user(&pool, "alice").await?;
    let carol = create_test_user(&pool, "carol").await?;
    let project = create_test_project(&pool, &alice, "Chatty").await?;

    assert!(matches!(chat.send(carol.id, project.id, "let me in").await, Err(AppError::Forbidden(_))));
    assert!(matches!(chat.send(alice.id, project.id, "  <>  ").await, Err(AppError::Validation(_))));
    // neither failure used up alice's slot
    chat.send(alice.id, project.id, "hello").await?;
    assert_eq!(message_count(&pool).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_history_pages_oldest_first() -> Result<()> {
    let pool = create_test_database().await?;
    let hub = Arc::new(Hub::new());
    let chat = ChatService::new(pool.clone(), AccessOracle::new(pool.clone()), hub, Duration::ZERO);

    let alice = create_test_user(&pool, "alice").await?;
    let project = create_test_project(&pool, &alice, "Chatty").await?;
    for i in 1..=5 {
        chat.send(alice.id, project.id, &format!("message {i}")).await?;
    }

    let latest = chat.history(alice.id, project.id, None, Some(3)).await?;
    let texts: Vec<_> = latest.iter().map(|m| m.message.as_str()).collect();
    assert_eq!(texts, ["message 3", "message 4", "message 5"]);

    let older = chat.history(alice.id, project.id, Some(latest[0].id), None).await?;
    let texts: Vec<_> = older.iter().map(|m| m.message.as_str()).collect();
    assert_eq!(texts, ["message 1", "message 2"]);
    Ok(())
}

#[tokio::test]
async fn test_retention_removes_only_expired_messages() -> Result<()> {
    let pool = create_test_database().await?;
    let alice = create_test_user(&pool, "alice").await?;
    let project = create_test_project(&pool, &alice, "Chatty").await?;

    for (text, age_days) in [("ancient", 45), ("old", 31), ("recent", 2)] {
        sqlx::query("INSERT INTO chat_messages (project_id, user_id, message, created_at) VALUES (?, ?, ?, ?)")
            .bind(project.id)
            .bind(alice.id)
            .bind(text)
            .bind(Utc::now() - chrono::Duration::days(age_days))
            .execute(&pool)
            .await?;
    }

    let retention = ChatRetention::new(pool.clone(), 30, Duration::from_secs(3600));
    assert_eq!(retention.run_once().await?, 2);
    assert_eq!(message_count(&pool).await?, 1);
    assert_eq!(retention.run_once().await?, 0);
    Ok(())
}
