//! Fragments, views and mutations of the chat client.

pub mod chat;

pub use chat::register_chat_fragments;
