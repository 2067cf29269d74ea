use chrono::Utc;

use crate::fragment::{Fragment, FragmentRegistry, RegistryError};
use crate::key::EntityKey;
use crate::mutation::{MutationRequest, MutationSpec, UpdateRule, ViewUpdate};
use crate::selection::{FieldSelection, SelectionSet};
use crate::value::{Fields, Value};

pub const MESSAGE: &str = "Message";
pub const CHAT: &str = "Chat";
pub const FULL_CHAT: &str = "FullChat";

/// Fields of a single chat message.
pub fn message_fragment() -> Fragment {
    Fragment::new(
        MESSAGE,
        "Message",
        SelectionSet::new().field("id").field("content").field("createdAt"),
    )
}

/// Fields shown for a chat in the chat list.
pub fn chat_fragment() -> Fragment {
    Fragment::new(
        CHAT,
        "Chat",
        SelectionSet::new()
            .field("id")
            .field("name")
            .field("picture")
            .object("lastMessage", SelectionSet::new().spread(MESSAGE)),
    )
}

/// A chat with its full message history.
pub fn full_chat_fragment() -> Fragment {
    Fragment::new(
        FULL_CHAT,
        "Chat",
        SelectionSet::new()
            .spread(CHAT)
            .object("messages", SelectionSet::new().spread(MESSAGE)),
    )
}

/// Register the chat fragments in dependency order.
pub fn register_chat_fragments(registry: &mut FragmentRegistry) -> Result<(), RegistryError> {
    registry.register(message_fragment())?;
    registry.register(chat_fragment())?;
    registry.register(full_chat_fragment())?;
    Ok(())
}

/// `chats { ...Chat }` on the query root.
pub fn chats_query() -> SelectionSet {
    SelectionSet::new().object("chats", SelectionSet::new().spread(CHAT))
}

/// `chat(chatId: $id) { ...FullChat }` on the query root.
pub fn chat_query(chat_id: &str) -> SelectionSet {
    SelectionSet::new().with(
        FieldSelection::new("chat")
            .arg("chatId", chat_id)
            .select(SelectionSet::new().spread(FULL_CHAT)),
    )
}

/// `addMessage(chatId, content)` with an optimistic placeholder message.
///
/// On success the chat's `lastMessage` points at the new message, the
/// message is appended to `messages`, and the chat moves to the top of
/// the chat list under `query_root`.
pub fn add_message(query_root: &EntityKey, chat_id: &str, content: &str) -> MutationSpec {
    let chat = EntityKey::new("Chat", chat_id);

    let mut variables = Fields::new();
    variables.insert("chatId".into(), chat_id.into());
    variables.insert("content".into(), content.into());

    let mut optimistic = Fields::new();
    optimistic.insert("__typename".into(), MESSAGE.into());
    optimistic.insert("content".into(), content.into());
    optimistic.insert("createdAt".into(), Utc::now().timestamp_millis().into());

    MutationSpec {
        request: MutationRequest {
            operation_name: "AddMessage".into(),
            variables,
            selection_set: SelectionSet::new().with(
                FieldSelection::new("addMessage")
                    .arg("chatId", chat_id)
                    .arg("content", content)
                    .select(SelectionSet::new().spread(MESSAGE)),
            ),
        },
        result_field: "addMessage".into(),
        fragment: MESSAGE.into(),
        optimistic: Some(optimistic),
        updates: vec![
            ViewUpdate::new("chat last message", chat.clone(), "lastMessage", UpdateRule::Replace),
            ViewUpdate::new("chat messages", chat.clone(), "messages", UpdateRule::Append),
            ViewUpdate::new(
                "chat list order",
                query_root.clone(),
                "chats",
                UpdateRule::MoveToFront { entry: chat },
            ),
        ],
    }
}

/// Response data for a chat message, in the shape `addMessage` returns.
pub fn message_data(id: &str, content: &str, created_at: i64) -> Fields {
    let mut fields = Fields::new();
    fields.insert("__typename".into(), MESSAGE.into());
    fields.insert("id".into(), id.into());
    fields.insert("content".into(), content.into());
    fields.insert("createdAt".into(), Value::Int(created_at));
    fields
}
