use std::sync::Arc;

use anyhow::Result;
use codecollab::errors::AppError;
use codecollab::models::{CollaboratorRole, InvitationStatus, ProjectRole};
use codecollab::realtime::hub::EventReceiver;
use codecollab::realtime::{Hub, ServerEvent};
use codecollab::repositories::CollaboratorRepository;
use codecollab::services::{AccessOracle, InvitationService};
use codecollab::test_utils::{add_test_collaborator, create_test_database, create_test_project, create_test_user};
use sqlx::SqlitePool;

async fn setup() -> Result<(SqlitePool, Arc<Hub>, InvitationService)> {
    let pool = create_test_database().await?;
    let hub = Arc::new(Hub::new());
    let service = InvitationService::new(pool.clone(), hub.clone());
    Ok((pool, hub, service))
}

fn drain(receiver: &mut EventReceiver) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

async fn active_count(pool: &SqlitePool, project_id: i64) -> Result<i64> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM invitations WHERE project_id = ? AND status IN ('pending', 'accepted')",
    )
    .bind(project_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

#[tokio::test]
async fn test_send_and_accept_creates_collaborator() -> Result<()> {
    let (pool, hub, service) = setup().await?;
    let alice = create_test_user(&pool, "alice").await?;
    let bob = create_test_user(&pool, "bob").await?;
    let project = create_test_project(&pool, &alice, "Shared").await?;

    let (_, mut alice_rx) = hub.register(alice.id, "alice").await;
    let (_, mut bob_rx) = hub.register(bob.id, "bob").await;

    let invitation = service.send(alice.id, project.id, "bob", CollaboratorRole::Editor).await?;
    assert_eq!(invitation.status, InvitationStatus::Pending);
    assert_eq!(invitation.project_name, "Shared");
    assert_eq!(invitation.from_username, "alice");
    assert!(matches!(&drain(&mut bob_rx)[..], [ServerEvent::InvitationReceived(v)] if v.id == invitation.id));

    let incoming = service.list_incoming(bob.id).await?;
    assert_eq!(incoming.len(), 1);

    let accepted = service.accept(bob.id, invitation.id).await?;
    assert_eq!(accepted.status, InvitationStatus::Accepted);
    assert!(matches!(
        &drain(&mut alice_rx)[..],
        [ServerEvent::InvitationUpdated(v)] if v.status == InvitationStatus::Accepted
    ));

    let role = AccessOracle::new(pool.clone()).role_of(project.id, bob.id).await?;
    assert_eq!(role, Some(ProjectRole::Editor));
    let collaborators = CollaboratorRepository::new(pool.clone()).list_for_project(project.id).await?;
    assert_eq!(collaborators.len(), 1);
    assert!(service.list_incoming(bob.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_double_accept_fails() -> Result<()> {
    let (pool, _hub, service) = setup().await?;
    let alice = create_test_user(&pool, "alice").await?;
    let bob = create_test_user(&pool, "bob").await?;
    let project = create_test_project(&pool, &alice, "Shared").await?;

    let invitation = service.send(alice.id, project.id, "bob", CollaboratorRole::Viewer).await?;
    service.accept(bob.id, invitation.id).await?;

    let second = service.accept(bob.id, invitation.id).await;
    assert!(matches!(second, Err(AppError::Conflict(_))));

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collaborators WHERE project_id = ? AND user_id = ?")
        .bind(project.id)
        .bind(bob.id)
        .fetch_one(&pool)
        .await?;
    assert_eq!(rows, 1);
    Ok(())
}

#[tokio::test]
async fn test_capacity_guard_rejects_third_invite() -> Result<()> {
    let (pool, _hub, service) = setup().await?;
    let alice = create_test_user(&pool, "alice").await?;
    let bob = create_test_user(&pool, "bob").await?;
    create_test_user(&pool, "dave").await?;
    create_test_user(&pool, "erin").await?;
    let project = create_test_project(&pool, &alice, "Shared").await?;

    let to_bob = service.send(alice.id, project.id, "bob", CollaboratorRole::Editor).await?;
    service.accept(bob.id, to_bob.id).await?;
    service.send(alice.id, project.id, "dave", CollaboratorRole::Editor).await?;

    let third = service.send(alice.id, project.id, "erin", CollaboratorRole::Editor).await;
    assert!(matches!(third, Err(AppError::CapacityReached)));

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invitations WHERE project_id = ?")
        .bind(project.id)
        .fetch_one(&pool)
        .await?;
    assert_eq!(total, 2);
    assert_eq!(active_count(&pool, project.id).await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_invites_respect_cap() -> Result<()> {
    let (pool, _hub, service) = setup().await?;
    let alice = create_test_user(&pool, "alice").await?;
    for name in ["bob", "dave", "erin"] {
        create_test_user(&pool, name).await?;
    }
    let project = create_test_project(&pool, &alice, "Race").await?;
    service.send(alice.id, project.id, "bob", CollaboratorRole::Editor).await?;

    let (first, second) = tokio::join!(
        service.send(alice.id, project.id, "dave", CollaboratorRole::Editor),
        service.send(alice.id, project.id, "erin", CollaboratorRole::Editor),
    );
    assert_eq!([first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(), 1);
    assert_eq!(active_count(&pool, project.id).await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_send_guards() -> Result<()> {
    let (pool, _hub, service) = setup().await?;
    let alice = create_test_user(&pool, "alice").await?;
    let bob = create_test_user(&pool, "bob").await?;
    let carol = create_test_user(&pool, "carol").await?;
    create_test_user(&pool, "dave").await?;
    let project = create_test_project(&pool, &alice, "Guarded").await?;
    add_test_collaborator(&pool, &project, &carol, CollaboratorRole::Viewer).await?;

    assert!(matches!(
        service.send(alice.id, project.id, "alice", CollaboratorRole::Editor).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        service.send(alice.id, project.id, "nobody", CollaboratorRole::Editor).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        service.send(alice.id, project.id, "carol", CollaboratorRole::Editor).await,
        Err(AppError::Conflict(_))
    ));
    assert!(matches!(
        service.send(bob.id, project.id, "dave", CollaboratorRole::Editor).await,
        Err(AppError::Forbidden(_))
    ));

    service.send(alice.id, project.id, "bob", CollaboratorRole::Editor).await?;
    assert!(matches!(
        service.send(alice.id, project.id, "bob", CollaboratorRole::Viewer).await,
        Err(AppError::Conflict(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_reject_and_cancel_free_the_slot() -> Result<()> {
    let (pool, hub, service) = setup().await?;
    let alice = create_test_user(&pool, "alice").await?;
    let bob = create_test_user(&pool, "bob").await?;
    let dave = create_test_user(&pool, "dave").await?;
    create_test_user(&pool, "erin").await?;
    let project = create_test_project(&pool, &alice, "Churn").await?;

    let to_bob = service.send(alice.id, project.id, "bob", CollaboratorRole::Editor).await?;
    let to_dave = service.send(alice.id, project.id, "dave", CollaboratorRole::Editor).await?;

    let (_, mut alice_rx) = hub.register(alice.id, "alice").await;
    let (_, mut dave_rx) = hub.register(dave.id, "dave").await;

    let rejected = service.reject(bob.id, to_bob.id).await?;
    assert_eq!(rejected.status, InvitationStatus::Rejected);
    assert!(matches!(&drain(&mut alice_rx)[..], [ServerEvent::InvitationUpdated(_)]));

    // only the invitee may answer, only the owner may cancel
    assert!(matches!(service.accept(bob.id, to_dave.id).await, Err(AppError::Forbidden(_))));
    assert!(matches!(service.cancel(dave.id, to_dave.id).await, Err(AppError::Forbidden(_))));

    let cancelled = service.cancel(alice.id, to_dave.id).await?;
    assert_eq!(cancelled.status, InvitationStatus::Cancelled);
    assert!(matches!(&drain(&mut dave_rx)[..], [ServerEvent::InvitationUpdated(_)]));
    assert!(matches!(service.accept(dave.id, to_dave.id).await, Err(AppError::Conflict(_))));

    assert_eq!(active_count(&pool, project.id).await?, 0);
    service.send(alice.id, project.id, "erin", CollaboratorRole::Editor).await?;
    service.send(alice.id, project.id, "bob", CollaboratorRole::Editor).await?;
    assert_eq!(service.list_for_project(alice.id, project.id).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_owner_cannot_leave_and_collaborator_leave_flips_status() -> Result<()> {
    let (pool, hub, service) = setup().await?;
    let alice = create_test_user(&pool, "alice").await?;
    let bob = create_test_user(&pool, "bob").await?;
    let project = create_test_project(&pool, &alice, "Shared").await?;

    let invitation = service.send(alice.id, project.id, "bob", CollaboratorRole::Editor).await?;
    service.accept(bob.id, invitation.id).await?;

    assert!(matches!(service.leave(alice.id, project.id).await, Err(AppError::Forbidden(_))));

    let (alice_conn, mut alice_rx) = hub.register(alice.id, "alice").await;
    let (bob_conn, _bob_rx) = hub.register(bob.id, "bob").await;
    hub.join(alice_conn, project.id).await;
    hub.join(bob_conn, project.id).await;
    drain(&mut alice_rx);

    service.leave(bob.id, project.id).await?;

    assert!(!AccessOracle::new(pool.clone()).has_access(project.id, bob.id).await?);
    let status: InvitationStatus = sqlx::query_scalar("SELECT status FROM invitations WHERE id = ?")
        .bind(invitation.id)
        .fetch_one(&pool)
        .await?;
    assert_eq!(status, InvitationStatus::Left);
    assert!(!hub.is_present(project.id, bob.id).await);
    assert!(!hub.is_subscribed(bob_conn, project.id).await);

    let events = drain(&mut alice_rx);
    assert!(events.iter().any(|e| matches!(e, ServerEvent::CollaboratorsUpdate(u) if u.collaborators.len() == 1)));
    assert!(events
        .iter()
        .any(|e| matches!(e, ServerEvent::InvitationUpdated(v) if v.status == InvitationStatus::Left)));
    Ok(())
}

#[tokio::test]
async fn test_removed_collaborator_is_kicked() -> Result<()> {
    let (pool, hub, service) = setup().await?;
    let alice = create_test_user(&pool, "alice").await?;
    let bob = create_test_user(&pool, "bob").await?;
    let project = create_test_project(&pool, &alice, "Shared").await?;

    let invitation = service.send(alice.id, project.id, "bob", CollaboratorRole::Editor).await?;
    service.accept(bob.id, invitation.id).await?;

    let (bob_conn, mut bob_rx) = hub.register(bob.id, "bob").await;
    hub.join(bob_conn, project.id).await;
    drain(&mut bob_rx);

    assert!(matches!(
        service.remove_collaborator(bob.id, project.id, bob.id).await,
        Err(AppError::Forbidden(_))
    ));
    service.remove_collaborator(alice.id, project.id, bob.id).await?;

    match &drain(&mut bob_rx)[..] {
        [ServerEvent::KickedFromProject(notice)] => {
            assert_eq!(notice.project_id, project.id);
            assert_eq!(notice.project_name, "Shared");
            assert_eq!(notice.reason, "Removed by owner");
        }
        other => panic!("unexpected events {other:?}"),
    }
    assert!(!hub.is_subscribed(bob_conn, project.id).await);
    assert_eq!(active_count(&pool, project.id).await?, 0);

    // the freed slot can be used again
    service.send(alice.id, project.id, "bob", CollaboratorRole::Viewer).await?;
    Ok(())
}
