//! Process-wide directory of logged-in accounts.

use std::sync::Arc;

use dashmap::DashMap;

use crate::bot::BotApi;
use crate::user::UserClient;

/// A registered account of either flavour.
#[derive(Clone)]
pub enum SenderClient {
    User(Arc<dyn UserClient>),
    Bot(Arc<dyn BotApi>),
}

impl SenderClient {
    pub fn is_bot(&self) -> bool {
        matches!(self, SenderClient::Bot(_))
    }
}

/// Registry of every logged-in account, keyed by account uid, with the one
/// designated invoker used for privileged calls.
///
/// Contract: `invoker` is set at construction and never null afterwards.
pub struct Senders {
    clients: DashMap<i64, SenderClient>,
    invoker: Arc<dyn UserClient>,
}

impl Senders {
    pub fn new(invoker: Arc<dyn UserClient>) -> Self {
        let senders = Self {
            clients: DashMap::new(),
            invoker: Arc::clone(&invoker),
        };
        senders.register_user(invoker);
        senders
    }

    pub fn register_user(&self, client: Arc<dyn UserClient>) {
        self.clients.insert(client.uid(), SenderClient::User(client));
    }

    pub fn register_bot(&self, bot: Arc<dyn BotApi>) {
        self.clients.insert(bot.uid(), SenderClient::Bot(bot));
    }

    pub fn invoker(&self) -> Arc<dyn UserClient> {
        Arc::clone(&self.invoker)
    }

    pub fn get(&self, uid: i64) -> Option<SenderClient> {
        self.clients.get(&uid).map(|e| e.value().clone())
    }

    /// True when the uid belongs to a registered bot account.
    pub fn is_bot(&self, uid: i64) -> bool {
        self.get(uid).map(|c| c.is_bot()).unwrap_or(false)
    }

    pub fn user_clients(&self) -> Vec<Arc<dyn UserClient>> {
        self.clients
            .iter()
            .filter_map(|e| match e.value() {
                SenderClient::User(c) => Some(Arc::clone(c)),
                SenderClient::Bot(_) => None,
            })
            .collect()
    }
}
