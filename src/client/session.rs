//! Async driver around [`ReconcileEngine`]: autosave, outgoing signals and the
//! typewriter animation for remote typing.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::debounce::DEFAULT_QUIESCENCE;
use super::reconcile::{EditorBuffer, FileListAction, ReconcileEngine, RemotePlan};
use crate::models::{FileId, FileSummary, ProjectId};
use crate::realtime::{ClientEvent, ServerEvent};

/// Delay between characters of a remote typing playback.
pub const TYPEWRITER_STEP: Duration = Duration::from_millis(30);

/// Persistence collaborator: the file endpoints of the HTTP API.
#[async_trait]
pub trait FileSink: Send + Sync {
    async fn save(&self, project_id: ProjectId, file_id: FileId, content: &str) -> Result<()>;
    async fn list_files(&self, project_id: ProjectId) -> Result<Vec<FileSummary>>;
}

struct Animation {
    file_id: FileId,
    target: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct SyncSession<B: EditorBuffer + Send + 'static, S: FileSink> {
    engine: Arc<Mutex<ReconcileEngine<B>>>,
    sink: Arc<S>,
    outgoing: mpsc::UnboundedSender<ClientEvent>,
    animation: Mutex<Option<Animation>>,
    files: Mutex<Vec<FileSummary>>,
    edited: Notify,
}

impl<B: EditorBuffer + Send + 'static, S: FileSink> SyncSession<B, S> {
    pub fn new(buffer: B, sink: Arc<S>, outgoing: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self::with_quiescence(buffer, sink, outgoing, DEFAULT_QUIESCENCE)
    }

    pub fn with_quiescence(
        buffer: B,
        sink: Arc<S>,
        outgoing: mpsc::UnboundedSender<ClientEvent>,
        quiescence: Duration,
    ) -> Self {
        Self {
            engine: Arc::new(Mutex::new(ReconcileEngine::new(buffer, quiescence))),
            sink,
            outgoing,
            animation: Mutex::new(None),
            files: Mutex::new(Vec::new()),
            edited: Notify::new(),
        }
    }

    pub fn engine(&self) -> &Arc<Mutex<ReconcileEngine<B>>> {
        &self.engine
    }

    pub async fn files(&self) -> Vec<FileSummary> {
        self.files.lock().await.clone()
    }

    /// Switch the editor to a file, saving whatever is still pending for the old one.
    pub async fn open_file(&self, project_id: ProjectId, file_id: FileId, content: &str) -> Result<()> {
        self.cancel_animation().await;
        let pending = self.engine.lock().await.flush_now();
        if let Some(flush) = pending {
            self.sink.save(flush.project_id, flush.file_id, &flush.content).await?;
            self.send(flush.into_event());
        }
        self.engine.lock().await.open_file(project_id, file_id, content);
        Ok(())
    }

    /// Apply a local edit to the buffer and schedule the debounced save.
    pub async fn local_edit(&self, edit: impl FnOnce(&mut B)) -> bool {
        let scheduled = {
            let mut engine = self.engine.lock().await;
            edit(engine.buffer_mut());
            engine.on_local_change(Instant::now())
        };
        if scheduled {
            self.edited.notify_one();
        }
        scheduled
    }

    /// Persist and relay the pending change if the quiet window has elapsed.
    pub async fn tick(&self) -> Result<bool> {
        let flush = self.engine.lock().await.poll_flush(Instant::now());
        let Some(flush) = flush else {
            return Ok(false);
        };

        self.sink.save(flush.project_id, flush.file_id, &flush.content).await?;
        debug!(project_id = flush.project_id, file_id = flush.file_id, "Local change saved");
        self.send(flush.into_event());
        Ok(true)
    }

    /// Autosave loop. Sleeps until the debounce deadline, re-arming on every edit.
    pub async fn run_autosave(&self, shutdown: CancellationToken) {
        loop {
            let deadline = self.engine.lock().await.flush_deadline();
            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.edited.notified() => continue,
                        _ = tokio::time::sleep_until(deadline) => {
                            if let Err(e) = self.tick().await {
                                warn!("Autosave failed: {}", e);
                            }
                        }
                    }
                }
                None => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.edited.notified() => {}
                    }
                }
            }
        }
    }

    pub async fn handle_server_event(&self, event: ServerEvent) -> Result<()> {
        match event {
            ServerEvent::FileUpdated(update) => {
                self.finish_animation_for(update.file_id).await;
                let mut engine = self.engine.lock().await;
                let plan = engine.plan_remote(&update);
                match plan {
                    RemotePlan::Ignore => {}
                    RemotePlan::Replace => engine.apply_remote(&update),
                    RemotePlan::Typewriter { steps } => {
                        drop(engine);
                        self.start_animation(update.file_id, steps).await;
                    }
                }
            }
            ServerEvent::FileAdded(added) => self.reload_files(added.project_id, None).await?,
            ServerEvent::FileRemoved(removed) => {
                self.reload_files(removed.project_id, Some(removed.file_id)).await?
            }
            ServerEvent::KickedFromProject(notice) => {
                let active = self.engine.lock().await.active_file();
                if active.is_some_and(|(project_id, _)| project_id == notice.project_id) {
                    self.cancel_animation().await;
                    self.engine.lock().await.close_file();
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn reload_files(&self, project_id: ProjectId, removed: Option<FileId>) -> Result<()> {
        if let Some(file_id) = removed {
            self.cancel_animation_for(file_id).await;
        }
        let FileListAction::Reload { close_active } = self.engine.lock().await.on_file_list_changed(removed);
        if close_active {
            debug!(project_id, "Active file removed by a collaborator");
        }
        let files = self.sink.list_files(project_id).await?;
        *self.files.lock().await = files;
        Ok(())
    }

    async fn start_animation(&self, file_id: FileId, steps: Vec<String>) {
        let Some(target) = steps.last().cloned() else {
            return;
        };
        self.cancel_animation().await;
        let token = CancellationToken::new();
        let engine = self.engine.clone();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            for step in steps {
                tokio::select! {
                    _ = task_token.cancelled() => return,
                    _ = tokio::time::sleep(TYPEWRITER_STEP) => {}
                }
                engine.lock().await.apply_typing_step(file_id, &step);
            }
        });

        *self.animation.lock().await = Some(Animation { file_id, target, token, handle });
    }

    /// Stops a running playback for `file_id` and jumps straight to its final buffer,
    /// so a newer update is planned against the content the peer actually had.
    async fn finish_animation_for(&self, file_id: FileId) {
        let mut slot = self.animation.lock().await;
        if slot.as_ref().is_some_and(|a| a.file_id == file_id) {
            if let Some(animation) = slot.take() {
                animation.token.cancel();
                animation.handle.abort();
                let mut engine = self.engine.lock().await;
                if engine.known_content(file_id) != Some(animation.target.as_str()) {
                    engine.apply_typing_step(file_id, &animation.target);
                }
            }
        }
    }

    async fn cancel_animation_for(&self, file_id: FileId) {
        let mut slot = self.animation.lock().await;
        if slot.as_ref().is_some_and(|a| a.file_id == file_id) {
            if let Some(animation) = slot.take() {
                animation.token.cancel();
                animation.handle.abort();
            }
        }
    }

    async fn cancel_animation(&self) {
        if let Some(animation) = self.animation.lock().await.take() {
            animation.token.cancel();
            animation.handle.abort();
        }
    }

    fn send(&self, event: ClientEvent) {
        if self.outgoing.send(event).is_err() {
            warn!("Socket writer closed; change was saved but not relayed");
        }
    }
}
