use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use codecollab::client::{EditorBuffer, FileSink, SyncSession, TextBuffer};
use codecollab::models::{FileId, FileSummary, ProjectId};
use codecollab::realtime::protocol::{FileRemoved, FileUpdated};
use codecollab::realtime::{ClientEvent, ServerEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingSink {
    saves: Mutex<Vec<(ProjectId, FileId, String)>>,
    files: Vec<FileSummary>,
}

impl RecordingSink {
    fn saves(&self) -> Vec<(ProjectId, FileId, String)> {
        self.saves.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileSink for RecordingSink {
    async fn save(&self, project_id: ProjectId, file_id: FileId, content: &str) -> Result<()> {
        self.saves.lock().unwrap().push((project_id, file_id, content.to_string()));
        Ok(())
    }

    async fn list_files(&self, _project_id: ProjectId) -> Result<Vec<FileSummary>> {
        Ok(self.files.clone())
    }
}

type Session = SyncSession<TextBuffer, RecordingSink>;

fn session_with(sink: RecordingSink) -> (Arc<Session>, Arc<RecordingSink>, mpsc::UnboundedReceiver<ClientEvent>) {
    let sink = Arc::new(sink);
    let (tx, rx) = mpsc::unbounded_channel();
    let session = Arc::new(SyncSession::with_quiescence(
        TextBuffer::default(),
        sink.clone(),
        tx,
        Duration::from_secs(1),
    ));
    (session, sink, rx)
}

fn remote(content: &str, is_typing: bool) -> ServerEvent {
    ServerEvent::FileUpdated(FileUpdated {
        project_id: 1,
        file_id: 7,
        content: content.to_string(),
        user_id: 2,
        username: "bob".to_string(),
        cursor_position: None,
        is_typing,
    })
}

async fn content(session: &Session) -> String {
    session.engine().lock().await.buffer().content().to_string()
}

#[tokio::test(start_paused = true)]
async fn test_remote_typing_is_played_back_per_character() -> Result<()> {
    let (session, _sink, _rx) = session_with(RecordingSink::default());
    session.open_file(1, 7, "hel").await?;

    session.handle_server_event(remote("hello", true)).await?;
    assert_eq!(content(&session).await, "hel");

    tokio::time::sleep(Duration::from_millis(31)).await;
    assert_eq!(content(&session).await, "hell");

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(content(&session).await, "hello");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_newer_update_cancels_running_animation() -> Result<()> {
    let (session, _sink, _rx) = session_with(RecordingSink::default());
    session.open_file(1, 7, "a").await?;

    session.handle_server_event(remote("abcdef", true)).await?;
    tokio::time::sleep(Duration::from_millis(45)).await;
    assert_eq!(content(&session).await, "ab");

    session.handle_server_event(remote("something else entirely", false)).await?;
    assert_eq!(content(&session).await, "something else entirely");

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(content(&session).await, "something else entirely");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_remote_replace_is_not_echoed() -> Result<()> {
    let (session, sink, mut rx) = session_with(RecordingSink::default());
    session.open_file(1, 7, "fn main() {}").await?;

    session.handle_server_event(remote("fn main() { println!(\"hi\"); }", false)).await?;
    assert!(session.engine().lock().await.flush_deadline().is_none());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(!session.tick().await?);
    assert!(sink.saves().is_empty());
    assert!(rx.try_recv().is_err());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_local_edits_are_debounced_into_one_save() -> Result<()> {
    let (session, sink, mut rx) = session_with(RecordingSink::default());
    session.open_file(1, 7, "").await?;

    let shutdown = CancellationToken::new();
    let autosave = {
        let session = session.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { session.run_autosave(shutdown).await })
    };

    for chunk in ["let", " x", " = 1;"] {
        assert!(session.local_edit(|buffer| buffer.insert(chunk)).await);
        tokio::time::sleep(Duration::from_millis(400)).await;
    }
    assert!(sink.saves().is_empty());

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(sink.saves(), vec![(1, 7, "let x = 1;".to_string())]);
    match rx.try_recv()? {
        ClientEvent::FileChange(change) => {
            assert_eq!(change.content, "let x = 1;");
            assert_eq!(change.file_id, 7);
        }
        other => panic!("unexpected event {other:?}"),
    }

    shutdown.cancel();
    autosave.await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_switching_files_flushes_pending_edit() -> Result<()> {
    let (session, sink, _rx) = session_with(RecordingSink::default());
    session.open_file(1, 7, "draft").await?;
    session
        .local_edit(|buffer| {
            buffer.set_cursor_offset(5);
            buffer.insert(" two");
        })
        .await;

    session.open_file(1, 8, "other").await?;
    assert_eq!(sink.saves(), vec![(1, 7, "draft two".to_string())]);
    assert_eq!(content(&session).await, "other");
    Ok(())
}

#[tokio::test]
async fn test_removed_file_reloads_list_and_closes_editor() -> Result<()> {
    let remaining = FileSummary {
        id: 8,
        path: "README.md".to_string(),
        name: "README.md".to_string(),
        language: "markdown".to_string(),
        is_media: false,
        size: 10,
    };
    let (session, _sink, _rx) = session_with(RecordingSink { files: vec![remaining.clone()], ..Default::default() });
    session.open_file(1, 7, "bye").await?;

    session
        .handle_server_event(ServerEvent::FileRemoved(FileRemoved {
            project_id: 1,
            file_id: 7,
            user_id: 2,
            username: "bob".to_string(),
        }))
        .await?;

    assert_eq!(session.files().await, vec![remaining]);
    assert_eq!(session.engine().lock().await.active_file(), None);
    Ok(())
}
