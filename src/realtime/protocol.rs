//! Socket wire format.
//!
//! Every frame is a JSON text message `{ "event": "<name>", "data": { ... } }`.
//! Client payloads deny unknown fields so that malformed shapes are rejected at
//! the boundary instead of being half-understood by a handler.

use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, FileId, FileSummary, InvitationView, ProjectId, UserId};

/// 1-based editor cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CursorPosition {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinProject(ProjectRef),
    LeaveProject(ProjectRef),
    FileChange(FileChange),
    FileCreated(FileCreated),
    FileDeleted(FileDeleted),
    CursorMove(CursorMove),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinProject(_) => "join-project",
            ClientEvent::LeaveProject(_) => "leave-project",
            ClientEvent::FileChange(_) => "file-change",
            ClientEvent::FileCreated(_) => "file-created",
            ClientEvent::FileDeleted(_) => "file-deleted",
            ClientEvent::CursorMove(_) => "cursor-move",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProjectRef {
    pub project_id: ProjectId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileChange {
    pub project_id: ProjectId,
    pub file_id: FileId,
    pub content: String,
    #[serde(default)]
    pub cursor_position: Option<CursorPosition>,
    #[serde(default)]
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileCreated {
    pub project_id: ProjectId,
    pub file: FileSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileDeleted {
    pub project_id: ProjectId,
    pub file_id: FileId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CursorMove {
    pub project_id: ProjectId,
    pub file_id: FileId,
    pub position: CursorPosition,
}

/// One user present in a project room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMember {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    JoinedProject(JoinedProject),
    CollaboratorsUpdate(CollaboratorsUpdate),
    FileUpdated(FileUpdated),
    FileAdded(FileAdded),
    FileRemoved(FileRemoved),
    CursorPosition(CursorUpdate),
    ChatMessage(ChatMessage),
    InvitationReceived(InvitationView),
    InvitationUpdated(InvitationView),
    KickedFromProject(KickNotice),
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload { message: message.into() })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedProject {
    pub project_id: ProjectId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorsUpdate {
    pub project_id: ProjectId,
    pub collaborators: Vec<PresenceMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUpdated {
    pub project_id: ProjectId,
    pub file_id: FileId,
    pub content: String,
    pub user_id: UserId,
    pub username: String,
    pub cursor_position: Option<CursorPosition>,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAdded {
    pub project_id: ProjectId,
    pub file: FileSummary,
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRemoved {
    pub project_id: ProjectId,
    pub file_id: FileId,
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdate {
    pub project_id: ProjectId,
    pub file_id: FileId,
    pub position: CursorPosition,
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KickNotice {
    pub project_id: ProjectId,
    pub project_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_file_change() {
        let raw = json!({
            "event": "file-change",
            "data": {
                "projectId": 3,
                "fileId": 9,
                "content": "fn main() {}",
                "cursorPosition": { "line": 1, "column": 5 },
                "isTyping": true
            }
        });
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        match event {
            ClientEvent::FileChange(change) => {
                assert_eq!(change.project_id, 3);
                assert_eq!(change.file_id, 9);
                assert_eq!(change.cursor_position, Some(CursorPosition { line: 1, column: 5 }));
                assert!(change.is_typing);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_optional_fields_default() {
        let raw = json!({ "event": "file-change", "data": { "projectId": 1, "fileId": 2, "content": "" } });
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        let ClientEvent::FileChange(change) = event else { panic!("wrong variant") };
        assert!(!change.is_typing);
        assert!(change.cursor_position.is_none());
    }

    #[test]
    fn test_rejects_unknown_shapes() {
        let unknown_event = json!({ "event": "drop-tables", "data": {} });
        assert!(serde_json::from_value::<ClientEvent>(unknown_event).is_err());

        let extra_field = json!({ "event": "join-project", "data": { "projectId": 1, "admin": true } });
        assert!(serde_json::from_value::<ClientEvent>(extra_field).is_err());

        let non_string_content = json!({
            "event": "file-change",
            "data": { "projectId": 1, "fileId": 2, "content": { "evil": 1 } }
        });
        assert!(serde_json::from_value::<ClientEvent>(non_string_content).is_err());

        let string_id = json!({ "event": "join-project", "data": { "projectId": "1" } });
        assert!(serde_json::from_value::<ClientEvent>(string_id).is_err());
    }

    #[test]
    fn test_server_event_names() {
        let value = serde_json::to_value(ServerEvent::error("nope")).unwrap();
        assert_eq!(value, json!({ "event": "error", "data": { "message": "nope" } }));

        let update = ServerEvent::CollaboratorsUpdate(CollaboratorsUpdate {
            project_id: 4,
            collaborators: vec![PresenceMember { user_id: 1, username: "ann".to_string() }],
        });
        let value = serde_json::to_value(update).unwrap();
        assert_eq!(value["event"], "collaborators-update");
        assert_eq!(value["data"]["projectId"], 4);
        assert_eq!(value["data"]["collaborators"][0]["userId"], 1);
    }
}
