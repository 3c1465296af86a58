//! Client Reconciliation Engine.
//!
//! Keeps one editable buffer consistent across local keystrokes, debounced saves
//! and remote `file-updated` signals. Conflicts resolve last-write-wins on the
//! whole buffer; there is no operational merge.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::debounce::Debouncer;
use crate::models::{FileId, ProjectId};
use crate::realtime::protocol::{FileChange, FileUpdated};
use crate::realtime::{ClientEvent, CursorPosition};

/// Largest appended run still played back as live typing.
pub const MAX_TYPEWRITER_DELTA: usize = 20;

/// Set while the engine writes remote content into the buffer, so the change
/// notification the editor raises for it is not treated as a local edit.
#[derive(Debug, Clone, Default)]
pub struct RemoteApplyFlag(Arc<AtomicBool>);

impl RemoteApplyFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_applying(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn begin_remote_apply(&self) -> RemoteApplyGuard {
        let previous = self.0.swap(true, Ordering::SeqCst);
        RemoteApplyGuard { flag: self.0.clone(), previous }
    }
}

/// Clears the flag on drop, unwinding included.
#[must_use = "the remote-apply flag is cleared as soon as the guard is dropped"]
#[derive(Debug)]
pub struct RemoteApplyGuard {
    flag: Arc<AtomicBool>,
    previous: bool,
}

impl Drop for RemoteApplyGuard {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::SeqCst);
    }
}

/// The editor widget the engine drives.
pub trait EditorBuffer {
    fn content(&self) -> &str;
    fn set_content(&mut self, content: &str);
    fn cursor(&self) -> CursorPosition;
    fn set_cursor(&mut self, position: CursorPosition);
}

/// Char offset of a 1-based position, clamped into the text.
pub fn position_to_offset(text: &str, position: CursorPosition) -> usize {
    let target_line = position.line.max(1) as usize;
    let target_column = position.column.max(1) as usize;

    let mut offset = 0;
    let mut lines = text.split('\n').peekable();
    let mut line_no = 1;
    while let Some(line) = lines.next() {
        let len = line.chars().count();
        if line_no == target_line || lines.peek().is_none() {
            return offset + (target_column - 1).min(len);
        }
        offset += len + 1;
        line_no += 1;
    }
    offset
}

/// 1-based position of a char offset, clamped to the end of the text.
pub fn offset_to_position(text: &str, offset: usize) -> CursorPosition {
    let mut line = 1;
    let mut column = 1;
    for ch in text.chars().take(offset) {
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    CursorPosition { line, column }
}

/// Plain in-memory buffer with a char-offset cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextBuffer {
    text: String,
    cursor: usize,
}

impl TextBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), cursor: 0 }
    }

    pub fn cursor_offset(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor_offset(&mut self, offset: usize) {
        self.cursor = offset.min(self.text.chars().count());
    }

    /// Insert at the cursor and move the cursor past the insertion, like typing.
    pub fn insert(&mut self, s: &str) {
        let byte = self.text.char_indices().nth(self.cursor).map_or(self.text.len(), |(i, _)| i);
        self.text.insert_str(byte, s);
        self.cursor += s.chars().count();
    }
}

impl EditorBuffer for TextBuffer {
    fn content(&self) -> &str {
        &self.text
    }

    fn set_content(&mut self, content: &str) {
        self.text = content.to_string();
        self.cursor = self.cursor.min(self.text.chars().count());
    }

    fn cursor(&self) -> CursorPosition {
        offset_to_position(&self.text, self.cursor)
    }

    fn set_cursor(&mut self, position: CursorPosition) {
        self.cursor = position_to_offset(&self.text, position);
    }
}

/// What to do with an incoming remote update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemotePlan {
    /// Other project, inactive file, or nothing changed.
    Ignore,
    /// Swap the whole buffer in one step.
    Replace,
    /// Play the appended characters back one at a time. Each entry is a full
    /// intermediate buffer; the last one equals the remote content.
    Typewriter { steps: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileListAction {
    /// Refetch the file list. `close_active` is set when the open file went away.
    Reload { close_active: bool },
}

/// A debounced local change ready to be persisted and relayed.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalFlush {
    pub project_id: ProjectId,
    pub file_id: FileId,
    pub content: String,
    pub cursor_position: CursorPosition,
}

impl LocalFlush {
    pub fn into_event(self) -> ClientEvent {
        ClientEvent::FileChange(FileChange {
            project_id: self.project_id,
            file_id: self.file_id,
            content: self.content,
            cursor_position: Some(self.cursor_position),
            is_typing: true,
        })
    }
}

/// Successive buffers for typing `inserted` after `base`.
pub fn typing_steps(base: &str, inserted: &str) -> Vec<String> {
    let mut current = base.to_string();
    inserted
        .chars()
        .map(|ch| {
            current.push(ch);
            current.clone()
        })
        .collect()
}

/// Per-editor session state.
pub struct ReconcileEngine<B: EditorBuffer> {
    buffer: B,
    project_id: Option<ProjectId>,
    active_file: Option<FileId>,
    known: HashMap<FileId, String>,
    debouncer: Debouncer,
    remote: RemoteApplyFlag,
}

impl<B: EditorBuffer> ReconcileEngine<B> {
    pub fn new(buffer: B, quiescence: Duration) -> Self {
        Self {
            buffer,
            project_id: None,
            active_file: None,
            known: HashMap::new(),
            debouncer: Debouncer::new(quiescence),
            remote: RemoteApplyFlag::new(),
        }
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut B {
        &mut self.buffer
    }

    pub fn remote_flag(&self) -> &RemoteApplyFlag {
        &self.remote
    }

    pub fn active_file(&self) -> Option<(ProjectId, FileId)> {
        Some((self.project_id?, self.active_file?))
    }

    pub fn known_content(&self, file_id: FileId) -> Option<&str> {
        self.known.get(&file_id).map(String::as_str)
    }

    pub fn flush_deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    /// Load a file into the buffer. Not a local edit, so nothing is scheduled.
    pub fn open_file(&mut self, project_id: ProjectId, file_id: FileId, content: &str) {
        self.debouncer.cancel();
        self.project_id = Some(project_id);
        self.active_file = Some(file_id);
        self.known.insert(file_id, content.to_string());

        let _guard = self.remote.begin_remote_apply();
        self.buffer.set_content(content);
    }

    pub fn close_file(&mut self) {
        self.debouncer.cancel();
        self.active_file = None;
    }

    /// Editor reported a content change. Returns whether a flush was scheduled;
    /// changes raised while a remote update is being applied are not.
    pub fn on_local_change(&mut self, now: Instant) -> bool {
        if self.remote.is_applying() || self.active_file.is_none() {
            return false;
        }
        self.debouncer.touch(now);
        true
    }

    /// Hands out the pending change once the buffer has been quiet long enough.
    pub fn poll_flush(&mut self, now: Instant) -> Option<LocalFlush> {
        if !self.debouncer.poll(now) {
            return None;
        }
        self.take_flush()
    }

    /// Flush immediately, e.g. before switching files.
    pub fn flush_now(&mut self) -> Option<LocalFlush> {
        if !self.debouncer.is_pending() {
            return None;
        }
        self.debouncer.cancel();
        self.take_flush()
    }

    fn take_flush(&mut self) -> Option<LocalFlush> {
        let (project_id, file_id) = self.active_file()?;
        let content = self.buffer.content();
        if self.known.get(&file_id).is_some_and(|known| known == content) {
            return None;
        }

        let content = content.to_string();
        self.known.insert(file_id, content.clone());
        Some(LocalFlush { project_id, file_id, content, cursor_position: self.buffer.cursor() })
    }

    pub fn plan_remote(&self, update: &FileUpdated) -> RemotePlan {
        if self.active_file() != Some((update.project_id, update.file_id)) {
            return RemotePlan::Ignore;
        }
        if self.buffer.content() == update.content {
            return RemotePlan::Ignore;
        }
        if !update.is_typing {
            return RemotePlan::Replace;
        }

        let base = self
            .known
            .get(&update.file_id)
            .map(String::as_str)
            .unwrap_or_else(|| self.buffer.content());
        match update.content.strip_prefix(base) {
            Some(inserted) if (1..=MAX_TYPEWRITER_DELTA).contains(&inserted.chars().count()) => {
                RemotePlan::Typewriter { steps: typing_steps(base, inserted) }
            }
            _ => RemotePlan::Replace,
        }
    }

    /// One-shot whole-buffer replacement that keeps the local cursor where it was.
    pub fn apply_remote(&mut self, update: &FileUpdated) {
        if Some(update.project_id) == self.project_id {
            self.write_remote(update.file_id, &update.content);
        }
    }

    /// Apply one intermediate typewriter buffer.
    pub fn apply_typing_step(&mut self, file_id: FileId, content: &str) {
        self.write_remote(file_id, content);
    }

    fn write_remote(&mut self, file_id: FileId, content: &str) {
        self.known.insert(file_id, content.to_string());
        if self.active_file != Some(file_id) {
            return;
        }

        let _guard = self.remote.begin_remote_apply();
        let cursor = self.buffer.cursor();
        self.buffer.set_content(content);
        self.buffer.set_cursor(cursor);
    }

    /// A peer added or removed a file. The list is always reloaded in full.
    pub fn on_file_list_changed(&mut self, removed: Option<FileId>) -> FileListAction {
        let close_active = removed.is_some() && removed == self.active_file;
        if let Some(file_id) = removed {
            self.known.remove(&file_id);
        }
        if close_active {
            self.close_file();
        }
        FileListAction::Reload { close_active }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(content: &str, is_typing: bool) -> FileUpdated {
        FileUpdated {
            project_id: 1,
            file_id: 7,
            content: content.to_string(),
            user_id: 2,
            username: "bob".to_string(),
            cursor_position: None,
            is_typing,
        }
    }

    fn engine_with(content: &str) -> ReconcileEngine<TextBuffer> {
        let mut engine = ReconcileEngine::new(TextBuffer::default(), Duration::from_secs(1));
        engine.open_file(1, 7, content);
        engine
    }

    #[test]
    fn test_offset_position_conversion() {
        let text = "ab\ncde\n\nf";
        assert_eq!(offset_to_position(text, 0), CursorPosition { line: 1, column: 1 });
        assert_eq!(offset_to_position(text, 4), CursorPosition { line: 2, column: 2 });
        assert_eq!(offset_to_position(text, 7), CursorPosition { line: 3, column: 1 });
        assert_eq!(position_to_offset(text, CursorPosition { line: 2, column: 2 }), 4);
        // clamped to the line end and to the last line
        assert_eq!(position_to_offset(text, CursorPosition { line: 1, column: 50 }), 2);
        assert_eq!(position_to_offset(text, CursorPosition { line: 9, column: 9 }), 9);
    }

    #[test]
    fn test_guard_clears_flag_even_on_panic() {
        let flag = RemoteApplyFlag::new();
        let cloned = flag.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = cloned.begin_remote_apply();
            panic!("apply failed");
        });
        assert!(result.is_err());
        assert!(!flag.is_applying());
    }

    #[test]
    fn test_remote_apply_does_not_schedule_local_flush() {
        let mut engine = engine_with("hello");
        let now = Instant::now();

        let guard = engine.remote_flag().begin_remote_apply();
        assert!(!engine.on_local_change(now));
        drop(guard);
        assert!(engine.on_local_change(now));
    }

    #[test]
    fn test_local_edits_flush_once_per_quiet_window() {
        let mut engine = engine_with("hello");
        let start = Instant::now();

        engine.buffer_mut().set_cursor_offset(5);
        engine.buffer_mut().insert(" world");
        engine.on_local_change(start);
        assert_eq!(engine.poll_flush(start + Duration::from_millis(500)), None);

        let flush = engine.poll_flush(start + Duration::from_secs(1)).unwrap();
        assert_eq!(flush.content, "hello world");
        assert_eq!(flush.file_id, 7);
        assert_eq!(engine.poll_flush(start + Duration::from_secs(3)), None);
    }

    #[test]
    fn test_unchanged_buffer_is_not_flushed() {
        let mut engine = engine_with("same");
        let start = Instant::now();
        engine.on_local_change(start);
        assert_eq!(engine.poll_flush(start + Duration::from_secs(2)), None);
    }

    #[test]
    fn test_plan_small_append_is_typewriter() {
        let engine = engine_with("hel");
        assert_eq!(
            engine.plan_remote(&update("hello", true)),
            RemotePlan::Typewriter { steps: vec!["hell".to_string(), "hello".to_string()] }
        );
    }

    #[test]
    fn test_plan_large_or_non_append_edits_replace() {
        let engine = engine_with("hello");
        assert_eq!(engine.plan_remote(&update("hello, this is a much longer edit", true)), RemotePlan::Replace);
        assert_eq!(engine.plan_remote(&update("help", true)), RemotePlan::Replace);
        assert_eq!(engine.plan_remote(&update("hello!", false)), RemotePlan::Replace);
    }

    #[test]
    fn test_plan_ignores_other_files_and_noops() {
        let engine = engine_with("hello");
        let mut other = update("x", false);
        other.file_id = 8;
        assert_eq!(engine.plan_remote(&other), RemotePlan::Ignore);
        assert_eq!(engine.plan_remote(&update("hello", false)), RemotePlan::Ignore);
    }

    #[test]
    fn test_apply_remote_keeps_cursor() {
        let mut engine = engine_with("line one\nline two");
        engine.buffer_mut().set_cursor(CursorPosition { line: 2, column: 3 });

        engine.apply_remote(&update("LINE ONE\nline two\nline three", false));
        assert_eq!(engine.buffer().content(), "LINE ONE\nline two\nline three");
        assert_eq!(engine.buffer().cursor(), CursorPosition { line: 2, column: 3 });
        assert!(!engine.remote_flag().is_applying());
    }

    #[test]
    fn test_removed_active_file_closes_it() {
        let mut engine = engine_with("hello");
        assert_eq!(engine.on_file_list_changed(Some(3)), FileListAction::Reload { close_active: false });
        assert_eq!(engine.on_file_list_changed(Some(7)), FileListAction::Reload { close_active: true });
        assert_eq!(engine.active_file(), None);
    }
}
