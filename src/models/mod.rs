pub mod chat;
pub mod decision;
pub mod document;
pub mod source;
pub mod websocket;
