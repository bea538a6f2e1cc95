use super::flow::{Conversation, Sender};
use crate::api::HttpBackend;
use std::sync::Arc;
use teloxide::types::Message;

#[derive(Clone)]
pub struct BotState {
    pub conversation: Arc<Conversation<HttpBackend>>,
}

pub fn message_sender(msg: &Message) -> Option<Sender> {
    msg.from.as_ref().map(|user| Sender {
        id: user.id.0 as i64,
        username: user.username.clone(),
        first_name: Some(user.first_name.clone()).filter(|name| !name.trim().is_empty()),
    })
}
